//! Backend for containers reachable only through command exec.
//!
//! There is no file RPC inside a container, so every operation is a
//! coreutils command run through the [`ExecRunner`]: metadata comes from
//! parsing `ls` text, reads stream `cat` output, writes pipe stdin into
//! `cat >>`. Paths are passed as positional shell arguments, never spliced
//! into the script text.

use std::io::{self, Read};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{BackendKind, CountingReader, FileBackend, RemoteWriter};
use crate::entry::{EntryKind, RawEntry};
use crate::error::{Result, VfsError};
use crate::exec::{ExecError, ExecRunner};
use crate::listing::ls;

/// Where a container lives and how to reach its control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOptions {
    /// Control-plane API address.
    pub host: String,
    /// Bearer token for the control plane.
    pub token: String,
    /// System user the session runs as (for audit records).
    pub system_user: String,
    /// Namespace of the pod.
    pub namespace: String,
    /// Pod name.
    pub pod_name: String,
    /// Container within the pod, empty for the default container.
    pub container_name: String,
    /// Skip TLS verification of the control plane.
    pub skip_tls_verify: bool,
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Shell script run with `$1` = path and optional `$2` = offset.
fn script(body: &str, path: &str, extra: &[&str]) -> Vec<String> {
    let mut command = args(&["sh", "-c", body, "sh", path]);
    command.extend(extra.iter().map(|s| s.to_string()));
    command
}

/// File backend that drives a container through exec.
pub struct ContainerBackend {
    runner: ExecRunner,
    options: ContainerOptions,
}

impl ContainerBackend {
    /// Create a backend using `runner` for all commands.
    pub fn new(runner: ExecRunner, options: ContainerOptions) -> Self {
        Self { runner, options }
    }

    /// Connection options of this container.
    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    fn run(&self, command: &[String]) -> Result<String> {
        let out = self.runner.run(command)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl FileBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ContainerExec
    }

    fn stat(&self, path: &str) -> Result<RawEntry> {
        let output = self.run(&args(&["ls", "-ld", "--full-time", "--", path]))?;
        ls::parse_stat(&output).ok_or_else(|| {
            VfsError::MalformedRemoteOutput(format!("no parsable entry for {path}"))
        })
    }

    fn read_dir(&self, path: &str) -> Result<Vec<RawEntry>> {
        // Trailing slash lists the target of a symlinked directory.
        let dir = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        let output = self.run(&args(&["ls", "-l", "--full-time", "--", &dir]))?;
        Ok(ls::parse_listing(&output))
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let entry = self.stat(path)?;
        if entry.kind == EntryKind::Directory {
            return Err(VfsError::InvalidPath(format!("{path} is a directory")));
        }
        let reader = self.runner.stream(args(&["cat", "--", path]))?;
        Ok(Box::new(reader))
    }

    fn open_writer(&self, path: &str, offset: u64) -> Result<Box<dyn RemoteWriter>> {
        let command = if offset == 0 {
            script(": > \"$1\"", path, &[])
        } else {
            let offset = offset.to_string();
            script(
                "dd if=/dev/null of=\"$1\" bs=1 seek=\"$2\" 2>/dev/null",
                path,
                &[&offset],
            )
        };
        self.run(&command)?;
        debug!(path, offset, "Opened container file for writing");
        Ok(Box::new(ContainerWriter {
            runner: self.runner.clone(),
            path: path.to_string(),
        }))
    }

    fn mkdir_all(&self, path: &str) -> Result<()> {
        self.run(&args(&["mkdir", "-p", "--", path]))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        // -T: never move into an existing directory at `to`.
        self.run(&args(&["mv", "-T", "--", from, to]))?;
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        self.run(&args(&["rm", "-f", "--", path]))?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &str) -> Result<()> {
        self.run(&args(&["rm", "-rf", "--", path]))?;
        Ok(())
    }
}

/// Carry an exec failure through `io::Error` without losing its class.
fn exec_to_io(err: ExecError) -> io::Error {
    match VfsError::from(err) {
        VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
        VfsError::PermissionDenied(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
        VfsError::Timeout(msg) => io::Error::new(io::ErrorKind::TimedOut, msg),
        VfsError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::BrokenPipe, other.to_string()),
    }
}

/// Appends stdin to a container file, one exec per chunk.
struct ContainerWriter {
    runner: ExecRunner,
    path: String,
}

impl RemoteWriter for ContainerWriter {
    fn write_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        let mut counted = CountingReader::new(src);
        self.runner
            .run_with_stdin(&script("cat >> \"$1\"", &self.path, &[]), &mut counted)
            .map_err(exec_to_io)?;
        Ok(counted.count())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}
