//! Backend capability interface.
//!
//! A backend is one connected session to a remote target. Two structurally
//! different kinds exist: remote file-transfer sessions, which have native
//! stat/readdir calls, and container exec sessions, which can only run
//! commands. Both implement [`FileBackend`]; the volume holds one of them and
//! never needs to know which beyond choosing a listing adapter.
//!
//! All paths handed to a backend are physical paths, already mapped under
//! the volume's base path.

pub mod container;
pub mod local;
pub mod multi;
#[cfg(feature = "sftp")]
pub mod sftp;

use std::collections::VecDeque;
use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::{EntryKind, RawEntry};
use crate::error::{Result, VfsError};
use crate::path;

pub use container::{ContainerBackend, ContainerOptions};
pub use local::LocalBackend;
pub use multi::{AssetFolder, MultiAssetBackend};
#[cfg(feature = "sftp")]
pub use sftp::{SftpAuth, SftpBackend, SftpOptions};

/// Which family of backend a volume talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// A remote file-transfer session with native file calls.
    RemoteFilesystem,
    /// A container reachable only through command exec.
    ContainerExec,
}

/// An open write handle positioned at some offset of a remote file.
pub trait RemoteWriter: Send {
    /// Copy everything from `src` into the file at the current position.
    ///
    /// Returns the number of bytes written.
    fn write_from(&mut self, src: &mut dyn Read) -> std::io::Result<u64>;

    /// Flush and release the handle.
    fn close(self: Box<Self>) -> std::io::Result<()>;
}

/// The file operations every backend provides.
pub trait FileBackend: Send + Sync {
    /// Backend family.
    fn kind(&self) -> BackendKind;

    /// Metadata of a single path, following symbolic links.
    fn stat(&self, path: &str) -> Result<RawEntry>;

    /// Metadata of the path itself: a final symbolic link is reported as
    /// [`EntryKind::Symlink`] instead of being followed.
    ///
    /// Backends whose `stat` already behaves this way keep the default.
    fn lstat(&self, path: &str) -> Result<RawEntry> {
        self.stat(path)
    }

    /// Entries of a directory. Symbolic links are reported as
    /// [`EntryKind::Symlink`] when the backend can tell.
    fn read_dir(&self, path: &str) -> Result<Vec<RawEntry>>;

    /// Open a file for sequential reading.
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Create (or open) a file for writing, positioned at `offset`.
    ///
    /// An offset of zero truncates; a non-zero offset keeps the bytes before
    /// it so interrupted uploads can resume.
    fn open_writer(&self, path: &str, offset: u64) -> Result<Box<dyn RemoteWriter>>;

    /// Create a directory and any missing parents.
    fn mkdir_all(&self, path: &str) -> Result<()>;

    /// Rename `from` to `to`.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Remove a single file.
    fn remove_file(&self, path: &str) -> Result<()>;

    /// Remove a directory and everything below it.
    ///
    /// Symbolic links met on the way are removed, never descended into.
    fn remove_dir_all(&self, path: &str) -> Result<()>;

    /// Find entries under `root` whose name contains `key`.
    fn search(&self, _root: &str, _key: &str, _limit: usize) -> Result<Vec<RawEntry>> {
        Err(VfsError::Unsupported("search"))
    }

    /// Release the session.
    fn close(&self) {}
}

/// Breadth-first name search built on [`FileBackend::read_dir`].
///
/// Matching is case-insensitive. Directories that cannot be read are
/// skipped and symbolic links are not followed.
pub fn walk_search<B: FileBackend + ?Sized>(
    backend: &B,
    root: &str,
    key: &str,
    limit: usize,
) -> Result<Vec<RawEntry>> {
    let needle = key.to_lowercase();
    let mut found = Vec::new();
    let mut queue = VecDeque::from([path::normalize(root)]);

    while let Some(dir) = queue.pop_front() {
        let entries = match backend.read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %dir, error = %e, "Skipping unreadable directory during search");
                continue;
            }
        };
        for entry in entries {
            if entry.kind == EntryKind::Directory {
                queue.push_back(path::join(&dir, &entry.name));
            }
            if entry.name.to_lowercase().contains(&needle) {
                found.push(entry);
                if found.len() >= limit {
                    return Ok(found);
                }
            }
        }
    }
    Ok(found)
}

/// Counts bytes pulled through a reader.
pub(crate) struct CountingReader<'a> {
    inner: &'a mut dyn Read,
    count: u64,
}

impl<'a> CountingReader<'a> {
    pub(crate) fn new(inner: &'a mut dyn Read) -> Self {
        Self { inner, count: 0 }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

impl Read for CountingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}
