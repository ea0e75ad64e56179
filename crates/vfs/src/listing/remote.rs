//! Symlink resolution for remote file-transfer listings.

use tracing::{debug, warn};

use crate::backend::FileBackend;
use crate::entry::{EntryKind, RawEntry};
use crate::path;

/// Reclassify symbolic links by trying to read them as directories.
///
/// A link whose target can be listed becomes a directory, anything else a
/// file. Probe failures are logged and never returned.
pub(crate) fn resolve_links(
    backend: &dyn FileBackend,
    physical_dir: &str,
    entries: Vec<RawEntry>,
) -> Vec<RawEntry> {
    entries
        .into_iter()
        .map(|mut entry| {
            if entry.kind != EntryKind::Symlink {
                return entry;
            }
            let link_path = path::join(physical_dir, &entry.name);
            match backend.read_dir(&link_path) {
                Ok(_) => {
                    debug!(path = %link_path, "Symlink resolves to a directory");
                    entry.kind = EntryKind::Directory;
                }
                Err(e) => {
                    warn!(path = %link_path, error = %e, "Symlink does not resolve to a directory");
                    entry.kind = EntryKind::File;
                }
            }
            entry
        })
        .collect()
}
