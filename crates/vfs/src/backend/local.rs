//! Backend over a directory tree of the gateway host itself.
//!
//! Serves assets kept on the gateway host and behaves like a remote
//! file-transfer session: native stat/readdir, symlinks reported as links.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

use crate::backend::{walk_search, BackendKind, FileBackend, RemoteWriter};
use crate::entry::{EntryKind, RawEntry};
use crate::error::{Result, VfsError};
use crate::path;

/// File backend on the local filesystem.
///
/// Paths are absolute host paths, or relative to `root` for a rooted
/// backend, which then stands in for a remote session whose `/` is `root`.
#[derive(Debug, Default, Clone)]
pub struct LocalBackend {
    root: Option<String>,
}

impl LocalBackend {
    /// Create a local backend over absolute host paths.
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Create a backend whose `/` is the host directory `dir`.
    pub fn rooted(dir: impl Into<String>) -> Self {
        Self {
            root: Some(dir.into()),
        }
    }

    fn at(&self, p: &str) -> String {
        match &self.root {
            Some(root) => path::physical(root, p),
            None => p.to_string(),
        }
    }
}

fn unix_seconds(time: io::Result<SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn raw_from_metadata(name: &str, kind: EntryKind, metadata: &Metadata) -> RawEntry {
    use std::os::unix::fs::MetadataExt;
    RawEntry::from_mode(
        name,
        kind,
        metadata.len(),
        unix_seconds(metadata.modified()),
        metadata.mode(),
    )
}

#[cfg(not(unix))]
fn raw_from_metadata(name: &str, kind: EntryKind, metadata: &Metadata) -> RawEntry {
    let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
    RawEntry::from_mode(
        name,
        kind,
        metadata.len(),
        unix_seconds(metadata.modified()),
        mode,
    )
}

fn kind_of(file_type: fs::FileType) -> EntryKind {
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

impl FileBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteFilesystem
    }

    fn stat(&self, path: &str) -> Result<RawEntry> {
        let metadata = fs::metadata(self.at(path))?;
        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Ok(raw_from_metadata(path::base_name(path), kind, &metadata))
    }

    fn lstat(&self, path: &str) -> Result<RawEntry> {
        let metadata = fs::symlink_metadata(self.at(path))?;
        let kind = kind_of(metadata.file_type());
        Ok(raw_from_metadata(path::base_name(path), kind, &metadata))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<RawEntry>> {
        let mut results = Vec::new();
        for entry_result in fs::read_dir(self.at(path))? {
            let entry = match entry_result {
                Ok(e) => e,
                Err(_) => continue,
            };
            let metadata = match fs::symlink_metadata(entry.path()) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().to_string();
            let kind = kind_of(metadata.file_type());
            let mut raw = raw_from_metadata(&name, kind, &metadata);
            if kind == EntryKind::Symlink {
                raw.link_target = fs::read_link(entry.path())
                    .ok()
                    .map(|t| t.to_string_lossy().to_string());
            }
            results.push(raw);
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = File::open(self.at(path))?;
        if file.metadata()?.is_dir() {
            return Err(VfsError::InvalidPath(format!("{path} is a directory")));
        }
        Ok(Box::new(file))
    }

    fn open_writer(&self, path: &str, offset: u64) -> Result<Box<dyn RemoteWriter>> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(offset == 0)
            .open(self.at(path))?;
        if offset > 0 {
            file.set_len(offset)?;
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Box::new(LocalWriter { file }))
    }

    fn mkdir_all(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.at(path))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.at(from), self.at(to))?;
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        fs::remove_file(self.at(path))?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &str) -> Result<()> {
        fs::remove_dir_all(self.at(path))?;
        Ok(())
    }

    fn search(&self, root: &str, key: &str, limit: usize) -> Result<Vec<RawEntry>> {
        walk_search(self, root, key, limit)
    }
}

struct LocalWriter {
    file: File,
}

impl RemoteWriter for LocalWriter {
    fn write_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        io::copy(src, &mut self.file)
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}
