//! Background writer draining the audit channel.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vfs::FtpLog;

/// Spawn a task that drains `rx` until every sender is dropped.
///
/// With a `log_path`, each record is appended to it as one JSON line.
/// Without one, records are only logged. The task returns the number of
/// records it handled.
pub fn spawn_audit_writer(
    mut rx: mpsc::Receiver<FtpLog>,
    log_path: Option<PathBuf>,
) -> JoinHandle<Result<usize>> {
    tokio::spawn(async move {
        let mut file = match &log_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.with_context(|| {
                        format!("Failed to create audit log directory: {}", parent.display())
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .with_context(|| format!("Failed to open audit log: {}", path.display()))?;
                debug!("Appending audit records to {:?}", path);
                Some(file)
            }
            None => None,
        };

        let mut written = 0usize;
        while let Some(entry) = rx.recv().await {
            info!(
                user = %entry.user,
                hostname = %entry.hostname,
                operate = %entry.operate,
                path = %entry.path,
                success = entry.is_success,
                "File transfer"
            );
            if let Some(file) = file.as_mut() {
                let mut line = match serde_json::to_vec(&entry) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize audit record");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = file.write_all(&line).await {
                    warn!(error = %e, "Failed to write audit record");
                    continue;
                }
            }
            written += 1;
        }

        if let Some(mut file) = file {
            file.flush().await.context("Failed to flush audit log")?;
        }
        debug!(written, "Audit writer stopped");
        Ok(written)
    })
}
