//! Command-line surface of the gateway.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use vfs::{ChunkRange, FileEntry, Volume};

/// Bastion Gateway - browse and transfer files on hosts and containers.
#[derive(Parser, Debug)]
#[command(name = "bastion-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Gateway user the volume is opened for
    #[arg(long, global = true, default_value = "admin")]
    pub user: String,

    /// Address the user connects from
    #[arg(long, global = true, default_value = "127.0.0.1")]
    pub addr: String,

    /// Target id: empty for all assets, an asset id, or a container query
    #[arg(long, short, global = true, default_value = "")]
    pub target: String,

    /// Print entries as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Show the volume root
    Root,

    /// List a directory
    Ls {
        /// Logical directory
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show one entry
    Stat {
        /// Logical path
        path: String,
    },

    /// List a directory and its ancestors
    Tree {
        /// Logical directory
        path: String,

        /// Number of levels to walk up (0 walks to the root)
        #[arg(long, short, default_value = "0")]
        depth: usize,
    },

    /// Download a file
    Get {
        /// Logical path
        path: String,

        /// Local destination (defaults to stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Upload a local file
    Put {
        /// Local file
        local: PathBuf,

        /// Logical destination directory
        #[arg(default_value = "/")]
        dir: String,

        /// Name on the target (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,

        /// Relative directory the client dropped the file into
        #[arg(long, default_value = "")]
        hint: String,

        /// Upload in chunks of this many bytes
        #[arg(long)]
        chunk_size: Option<u64>,
    },

    /// Upload a local file without overwriting existing names
    Paste {
        /// Local file
        local: PathBuf,

        /// Logical destination directory
        #[arg(default_value = "/")]
        dir: String,

        /// Name on the target (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,

        /// Inserted before the extension when the name is taken
        #[arg(long, default_value = "_copy")]
        suffix: String,
    },

    /// Create a directory
    Mkdir {
        /// Logical parent directory
        dir: String,
        /// New directory name
        name: String,
    },

    /// Create an empty file
    Touch {
        /// Logical parent directory
        dir: String,
        /// New file name
        name: String,
    },

    /// Rename an entry within its directory
    Mv {
        /// Logical path
        path: String,
        /// New name
        new_name: String,
    },

    /// Remove a file or directory tree
    Rm {
        /// Logical path
        path: String,
    },

    /// Find entries whose name contains a key
    Search {
        /// Key to look for
        key: String,

        /// Logical directory to search below
        #[arg(default_value = "/")]
        path: String,
    },

    /// Validate the configuration and print it
    CheckConfig,
}

impl Commands {
    /// Whether the command needs an open volume.
    pub fn needs_volume(&self) -> bool {
        !matches!(self, Commands::CheckConfig)
    }
}

/// Run a volume command, printing results to `out`.
pub fn run_command(volume: &Volume, command: &Commands, json: bool, out: &mut dyn Write) -> Result<()> {
    match command {
        Commands::Root => print_entries(out, &[volume.root_info()], json)?,
        Commands::Ls { path } => {
            let listing = volume.list_dir(path);
            if listing.is_unreadable() {
                tracing::warn!("Directory {} could not be read", path);
            }
            print_entries(out, &listing.into_entries(), json)?;
        }
        Commands::Stat { path } => {
            let entry = volume.stat(path).with_context(|| format!("Failed to stat {path}"))?;
            print_entries(out, &[entry], json)?;
        }
        Commands::Tree { path, depth } => print_entries(out, &volume.parents(path, *depth), json)?,
        Commands::Get { path, output } => {
            let mut reader = volume
                .open(path)
                .with_context(|| format!("Failed to open {path}"))?;
            match output {
                Some(local) => {
                    let mut file = File::create(local)
                        .with_context(|| format!("Failed to create {}", local.display()))?;
                    let copied = io::copy(&mut reader, &mut file)
                        .with_context(|| format!("Failed to download {path}"))?;
                    tracing::info!("Downloaded {} bytes to {:?}", copied, local);
                }
                None => {
                    io::copy(&mut reader, out).with_context(|| format!("Failed to download {path}"))?;
                }
            }
        }
        Commands::Put {
            local,
            dir,
            name,
            hint,
            chunk_size,
        } => {
            let name = target_name(local, name.as_deref())?;
            let mut file =
                File::open(local).with_context(|| format!("Failed to open {}", local.display()))?;
            let entry = match chunk_size {
                Some(size) => upload_chunked(volume, &mut file, dir, hint, &name, *size)?,
                None => volume
                    .upload_file(dir, hint, &name, &mut file)
                    .with_context(|| format!("Failed to upload {}", local.display()))?,
            };
            print_entries(out, &[entry], json)?;
        }
        Commands::Paste {
            local,
            dir,
            name,
            suffix,
        } => {
            let name = target_name(local, name.as_deref())?;
            let file =
                File::open(local).with_context(|| format!("Failed to open {}", local.display()))?;
            let entry = volume
                .paste(dir, &name, suffix, file)
                .with_context(|| format!("Failed to paste {}", local.display()))?;
            print_entries(out, &[entry], json)?;
        }
        Commands::Mkdir { dir, name } => {
            let entry = volume.make_dir(dir, name).context("Failed to create directory")?;
            print_entries(out, &[entry], json)?;
        }
        Commands::Touch { dir, name } => {
            let entry = volume.make_file(dir, name).context("Failed to create file")?;
            print_entries(out, &[entry], json)?;
        }
        Commands::Mv { path, new_name } => {
            let entry = volume
                .rename(path, new_name)
                .with_context(|| format!("Failed to rename {path}"))?;
            print_entries(out, &[entry], json)?;
        }
        Commands::Rm { path } => {
            volume.remove(path).with_context(|| format!("Failed to remove {path}"))?;
            writeln!(out, "removed {path}")?;
        }
        Commands::Search { key, path } => {
            let found = volume
                .search(path, key)
                .with_context(|| format!("Failed to search {path}"))?;
            print_entries(out, &found, json)?;
        }
        Commands::CheckConfig => bail!("check-config does not operate on a volume"),
    }
    Ok(())
}

fn target_name(local: &std::path::Path, name: Option<&str>) -> Result<String> {
    match name {
        Some(name) => Ok(name.to_string()),
        None => local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", local.display())),
    }
}

fn upload_chunked(
    volume: &Volume,
    file: &mut File,
    dir: &str,
    hint: &str,
    name: &str,
    chunk_size: u64,
) -> Result<FileEntry> {
    if chunk_size == 0 {
        bail!("--chunk-size must be greater than 0");
    }
    let total_size = file.metadata().context("Failed to read local file size")?.len();
    let chunk_id = u64::from(std::process::id());

    let mut buf = vec![0u8; usize::try_from(chunk_size).context("--chunk-size is too large")?];
    let mut offset = 0u64;
    let mut chunks = 0u32;
    loop {
        let filled = read_full(file, &mut buf)?;
        if filled == 0 && chunks > 0 {
            break;
        }
        let range = ChunkRange {
            offset,
            length: filled as u64,
            total_size,
        };
        volume
            .upload_chunk(chunk_id, dir, hint, name, range, &mut &buf[..filled])
            .with_context(|| format!("Failed to upload chunk {chunks} of {name}"))?;
        offset += filled as u64;
        chunks += 1;
        tracing::debug!("Uploaded chunk {} ({} of {} bytes)", chunks, offset, total_size);
        if filled < buf.len() {
            break;
        }
    }

    volume
        .merge_chunk(chunk_id, chunks, dir, hint, name)
        .with_context(|| format!("Failed to merge {name}"))
}

/// Fill `buf` unless the reader ends first. Returns the bytes read.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to read local file"),
        }
    }
    Ok(filled)
}

fn print_entries(out: &mut dyn Write, entries: &[FileEntry], json: bool) -> Result<()> {
    for entry in entries {
        if json {
            writeln!(out, "{}", serde_json::to_string(entry)?)?;
        } else {
            writeln!(out, "{}", format_entry(entry))?;
        }
    }
    Ok(())
}

/// One human-readable line: type, permissions, size, time and name.
pub fn format_entry(entry: &FileEntry) -> String {
    let kind = if entry.is_directory { 'd' } else { '-' };
    let read = if entry.can_read { 'r' } else { '-' };
    let write = if entry.can_write { 'w' } else { '-' };
    let modified = DateTime::from_timestamp(entry.modified_at, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{kind}{read}{write} {:>12} {modified} {}",
        entry.size, entry.name
    )
}
