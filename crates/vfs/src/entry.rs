//! File entry records.
//!
//! Backends describe what they see as [`RawEntry`] values; the volume turns
//! them into client-facing [`FileEntry`] records by stamping the opaque
//! hashes and the volume id.

use serde::{Deserialize, Serialize};

use crate::hash;
use crate::path;

/// Kind of a raw backend entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file (or anything that is not a directory or link).
    File,
    /// Directory.
    Directory,
    /// Symbolic link whose target type is not yet known.
    Symlink,
}

/// An entry as reported by a backend, before hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry kind.
    pub kind: EntryKind,
    /// Size in bytes.
    pub size: u64,
    /// Last modification, unix seconds.
    pub modified: i64,
    /// Owner may read.
    pub can_read: bool,
    /// Owner may write.
    pub can_write: bool,
    /// Link target when the entry is a symbolic link and the backend knows it.
    pub link_target: Option<String>,
}

impl RawEntry {
    /// Build a raw entry from unix permission bits.
    pub fn from_mode(name: impl Into<String>, kind: EntryKind, size: u64, modified: i64, mode: u32) -> Self {
        let (can_read, can_write) = read_write_from_mode(mode);
        Self {
            name: name.into(),
            kind,
            size,
            modified,
            can_read,
            can_write,
            link_target: None,
        }
    }
}

/// Owner read/write bits of a unix mode.
pub fn read_write_from_mode(mode: u32) -> (bool, bool) {
    (mode & 0o400 != 0, mode & 0o200 != 0)
}

/// The normalized record returned by stat and list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Entry name.
    pub name: String,
    /// Opaque id of this path.
    pub hash: String,
    /// Opaque id of the parent directory, empty at the volume root.
    pub parent_hash: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification, unix seconds.
    pub modified_at: i64,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Whether the entry can be read.
    pub can_read: bool,
    /// Whether the entry can be written.
    pub can_write: bool,
    /// Volume the entry belongs to.
    pub volume_id: String,
}

impl FileEntry {
    /// Stamp a raw entry located at `logical` (its full logical path).
    pub fn at_path(volume_id: &str, logical: &str, raw: &RawEntry) -> Self {
        let (hash, parent_hash) = hash::hash_pair(volume_id, logical);
        Self {
            name: raw.name.clone(),
            hash,
            parent_hash,
            size: raw.size,
            modified_at: raw.modified,
            is_directory: raw.kind == EntryKind::Directory,
            can_read: raw.can_read,
            can_write: raw.can_write,
            volume_id: volume_id.to_string(),
        }
    }

    /// Stamp a raw entry found while listing the logical directory `dir`.
    pub fn in_dir(volume_id: &str, dir: &str, raw: &RawEntry) -> Self {
        Self::at_path(volume_id, &path::join(dir, &raw.name), raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, kind: EntryKind) -> RawEntry {
        RawEntry::from_mode(name, kind, 42, 1_704_067_200, 0o644)
    }

    #[test]
    fn test_read_write_from_mode() {
        assert_eq!(read_write_from_mode(0o644), (true, true));
        assert_eq!(read_write_from_mode(0o444), (true, false));
        assert_eq!(read_write_from_mode(0o000), (false, false));
    }

    #[test]
    fn test_in_dir_stamps_hashes() {
        let entry = FileEntry::in_dir("vol", "/docs", &raw("a.txt", EntryKind::File));
        assert_eq!(entry.name, "a.txt");
        assert_eq!(entry.hash, hash::hash_path("vol", "/docs/a.txt"));
        assert_eq!(entry.parent_hash, hash::hash_path("vol", "/docs"));
        assert_eq!(entry.size, 42);
        assert_eq!(entry.modified_at, 1_704_067_200);
        assert!(!entry.is_directory);
        assert!(entry.can_read && entry.can_write);
        assert_eq!(entry.volume_id, "vol");
    }

    #[test]
    fn test_symlink_is_not_a_directory() {
        let entry = FileEntry::in_dir("vol", "/", &raw("link", EntryKind::Symlink));
        assert!(!entry.is_directory);
    }

    #[test]
    fn test_root_self_parent_collapses() {
        let entry = FileEntry::at_path("vol", "/", &raw("Home", EntryKind::Directory));
        assert!(entry.parent_hash.is_empty());
        assert!(entry.is_directory);
    }
}
