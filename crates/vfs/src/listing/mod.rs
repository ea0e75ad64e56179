//! Directory listing adapters.
//!
//! Both backend families produce [`RawEntry`] lists, but they disagree on
//! what a symbolic link is worth. The remote-filesystem adapter probes each
//! link to find out whether it leads to a directory; the container adapter
//! trusts the text scraped by [`ls`] and reports links as plain files.
//!
//! A listing either succeeds or fails as a whole. [`Listing`] keeps the two
//! outcomes distinct, although the volume's public contract collapses both
//! into a sequence.

pub mod ls;
mod remote;

use tracing::warn;

use crate::backend::{BackendKind, FileBackend};
use crate::entry::{EntryKind, FileEntry, RawEntry};
use crate::error::VfsError;

/// Outcome of listing one directory.
#[derive(Debug)]
pub enum Listing {
    /// The directory was read; it may be empty.
    Entries(Vec<FileEntry>),
    /// The directory could not be read.
    Unreadable(VfsError),
}

impl Listing {
    /// Entries of the listing, empty when the read failed.
    pub fn into_entries(self) -> Vec<FileEntry> {
        match self {
            Listing::Entries(entries) => entries,
            Listing::Unreadable(_) => Vec::new(),
        }
    }

    /// Whether the directory could not be read.
    pub fn is_unreadable(&self) -> bool {
        matches!(self, Listing::Unreadable(_))
    }
}

/// Backend specific translation of raw entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingAdapter {
    /// Native directory reads, symlinks resolved by probing.
    RemoteFilesystem,
    /// Parsed `ls -l --full-time` text, symlinks kept as files.
    ContainerExec,
}

impl ListingAdapter {
    /// Adapter matching a backend family.
    pub fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::RemoteFilesystem => ListingAdapter::RemoteFilesystem,
            BackendKind::ContainerExec => ListingAdapter::ContainerExec,
        }
    }

    /// List `physical_dir` and stamp the entries as children of `logical_dir`.
    pub fn list(
        &self,
        backend: &dyn FileBackend,
        volume_id: &str,
        logical_dir: &str,
        physical_dir: &str,
    ) -> Listing {
        let raw = match backend.read_dir(physical_dir) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %logical_dir, error = %e, "Directory listing failed");
                return Listing::Unreadable(e);
            }
        };
        let raw = match self {
            ListingAdapter::RemoteFilesystem => remote::resolve_links(backend, physical_dir, raw),
            ListingAdapter::ContainerExec => raw.into_iter().map(links_as_files).collect(),
        };
        Listing::Entries(
            raw.iter()
                .map(|entry| FileEntry::in_dir(volume_id, logical_dir, entry))
                .collect(),
        )
    }
}

fn links_as_files(mut entry: RawEntry) -> RawEntry {
    if entry.kind == EntryKind::Symlink {
        entry.kind = EntryKind::File;
    }
    entry
}
