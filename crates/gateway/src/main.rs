//! Bastion Gateway
//!
//! Operator command line over file-manager volumes.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gateway::{
    run_command, spawn_audit_writer, Cli, Commands, Config, ConfigAssetSource, Connector,
    Requester,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use vfs::ChannelAuditSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Held until exit so buffered log lines are flushed.
    let _log_guard = init_tracing(&config, cli.verbose);
    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    if !cli.command.needs_volume() {
        println!("Configuration is valid");
        println!("  Log level:      {}", config.gateway.log_level);
        println!("  Container root: {}", config.container.root);
        println!("  Exec program:   {}", config.container.kubectl);
        println!("  Assets:         {}", config.assets.len());
        return Ok(());
    }

    let (sink, rx) = ChannelAuditSink::channel(config.audit.channel_capacity);
    let writer = spawn_audit_writer(rx, config.audit.log_path.clone());

    let source = Arc::new(ConfigAssetSource::new(&config.assets));
    let connector = Connector::new(config, source, Arc::new(sink));
    let requester = Requester {
        user: cli.user.clone(),
        remote_addr: cli.addr.clone(),
    };
    let target = cli.target.clone();
    let command: Commands = cli.command.clone();
    let json = cli.json;

    // Volume calls block on remote I/O; keep them off the runtime threads.
    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let volume = connector
            .connect(&requester, &target)
            .context("Failed to open volume")?;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let result = run_command(&volume, &command, json, &mut out);
        out.flush()?;
        volume.close();
        result
    })
    .await
    .context("Volume worker panicked")?;

    // Every sink clone is gone now, so the writer drains and stops.
    match writer.await {
        Ok(Ok(written)) => tracing::debug!("Audit writer handled {} records", written),
        Ok(Err(e)) => tracing::warn!("Audit writer failed: {:#}", e),
        Err(e) => tracing::warn!("Audit writer task failed: {}", e),
    }

    outcome
}

/// Initialize tracing to stderr, or to a daily log file when configured.
fn init_tracing(config: &Config, verbose: bool) -> Option<WorkerGuard> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.gateway.log_level.to_lowercase()))
    };

    match &config.gateway.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "bastion-gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
