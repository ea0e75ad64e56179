//! The volume façade.
//!
//! A [`Volume`] is what the client-facing protocol talks to: one logical
//! tree rooted at `/`, mapped onto `base_path` of a single backend. Every
//! path it accepts or returns is logical; backend paths and the base path
//! stay inside.
//!
//! Error policy differs per operation. Listings (`list`, `parents`) never
//! fail outward and degrade to empty or partial results. Everything else
//! propagates backend errors unchanged in kind.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::audit::{AuditContext, AuditSink, Operation, TracingAuditSink};
use crate::backend::{BackendKind, FileBackend, RemoteWriter};
use crate::chunk::{ChunkId, ChunkRange, ChunkTable};
use crate::entry::{EntryKind, FileEntry};
use crate::error::{Result, VfsError};
use crate::hash;
use crate::listing::{Listing, ListingAdapter};
use crate::path;
use crate::target::VolumeLayout;

/// Synthetic folder search results are reported under.
pub const SEARCH_FOLDER_NAME: &str = "_Search";

/// Default cap on search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 200;

/// Attempts at finding a free name before `paste` gives up.
const MAX_PASTE_ATTEMPTS: usize = 32;

/// Sequential reader over a remote file.
///
/// Only [`Read`] is exposed, so generic copy helpers cannot reach for
/// size or seek calls of the underlying handle.
pub struct FileReader {
    inner: Box<dyn Read + Send>,
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// One logical file tree on one backend.
pub struct Volume {
    id: String,
    home_name: String,
    base_path: String,
    backend: Box<dyn FileBackend>,
    adapter: ListingAdapter,
    chunks: ChunkTable,
    audit: Arc<dyn AuditSink>,
    audit_context: AuditContext,
    search_limit: usize,
    closed: AtomicBool,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("id", &self.id)
            .field("home_name", &self.home_name)
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

impl Volume {
    /// Create a volume over `backend`.
    pub fn new(id: impl Into<String>, layout: VolumeLayout, backend: Box<dyn FileBackend>) -> Self {
        let adapter = ListingAdapter::for_kind(backend.kind());
        Self {
            id: id.into(),
            home_name: layout.home_name,
            base_path: path::normalize(&layout.base_path),
            backend,
            adapter,
            chunks: ChunkTable::new(),
            audit: Arc::new(TracingAuditSink),
            audit_context: AuditContext::default(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            closed: AtomicBool::new(false),
        }
    }

    /// Send transfer records to `sink`, stamped with `context`.
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>, context: AuditContext) -> Self {
        self.audit = sink;
        self.audit_context = context;
        self
    }

    /// Cap the number of search results.
    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn home_name(&self) -> &str {
        &self.home_name
    }

    /// Backend family this volume was built on.
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Chunk ids with an open upload handle.
    pub fn open_chunks(&self) -> Vec<ChunkId> {
        self.chunks.open_ids()
    }

    fn physical(&self, logical: &str) -> String {
        path::physical(&self.base_path, logical)
    }

    /// Entry of the logical root.
    ///
    /// Permissions come from the base path when it can be read, otherwise
    /// the root is reported read-only.
    pub fn root_info(&self) -> FileEntry {
        let (size, modified, can_read, can_write) = match self.backend.stat(&self.base_path) {
            Ok(raw) => (raw.size, raw.modified, raw.can_read, raw.can_write),
            Err(e) => {
                debug!(volume = %self.id, error = %e, "Root stat failed, reporting read-only root");
                (0, unix_now(), true, false)
            }
        };
        FileEntry {
            name: self.home_name.clone(),
            hash: hash::hash_path(&self.id, path::ROOT),
            parent_hash: String::new(),
            size,
            modified_at: modified,
            is_directory: true,
            can_read,
            can_write,
            volume_id: self.id.clone(),
        }
    }

    /// Metadata of one logical path.
    pub fn stat(&self, logical: &str) -> Result<FileEntry> {
        let logical = path::normalize(logical);
        if path::is_root(&logical) {
            return Ok(self.root_info());
        }
        let mut raw = self.backend.stat(&self.physical(&logical))?;
        raw.name = path::base_name(&logical).to_string();
        Ok(FileEntry::at_path(&self.id, &logical, &raw))
    }

    /// List a directory, keeping read failures distinguishable.
    pub fn list_dir(&self, logical: &str) -> Listing {
        let logical = path::normalize(logical);
        debug!(volume = %self.id, path = %logical, "list");
        self.adapter
            .list(self.backend.as_ref(), &self.id, &logical, &self.physical(&logical))
    }

    /// Entries of a directory, empty when it cannot be read.
    pub fn list(&self, logical: &str) -> Vec<FileEntry> {
        self.list_dir(logical).into_entries()
    }

    /// Contents of `logical` and of each of its ancestors.
    ///
    /// `depth` caps the number of directories listed, zero means all the
    /// way to the root. Stops early at the first unreadable directory and
    /// returns what was collected so far.
    pub fn parents(&self, logical: &str, depth: usize) -> Vec<FileEntry> {
        let mut dir = path::normalize(logical);
        let mut entries = Vec::new();
        let mut levels = 0;
        loop {
            match self.list_dir(&dir) {
                Listing::Entries(found) => entries.extend(found),
                Listing::Unreadable(_) => return entries,
            }
            levels += 1;
            if path::is_root(&dir) || (depth > 0 && levels >= depth) {
                return entries;
            }
            dir = path::parent(&dir);
        }
    }

    /// Open a file for download.
    pub fn open(&self, logical: &str) -> Result<FileReader> {
        let physical = self.physical(logical);
        let result = self.backend.open(&physical);
        self.record(Operation::Download, &physical, result.is_ok());
        let inner = result?;
        debug!(volume = %self.id, path = %logical, "Opened file for download");
        Ok(FileReader { inner })
    }

    /// Upload a whole file into `dir`.
    ///
    /// The destination follows [`path::resolve_upload_path`]. An audit
    /// record is emitted whether or not the write succeeds.
    pub fn upload_file(
        &self,
        dir: &str,
        upload_hint: &str,
        filename: &str,
        data: &mut dyn Read,
    ) -> Result<FileEntry> {
        path::validate_name(filename)?;
        let logical = path::resolve_upload_path(dir, upload_hint, filename);
        let physical = self.physical(&logical);
        debug!(volume = %self.id, path = %logical, "upload");

        let result = self.write_new(&logical, &physical, data);
        self.record(Operation::Upload, &physical, result.is_ok());
        result?;
        self.stat(&logical)
    }

    /// Write one chunk of a chunked upload.
    pub fn upload_chunk(
        &self,
        chunk_id: ChunkId,
        dir: &str,
        upload_hint: &str,
        filename: &str,
        range: ChunkRange,
        data: &mut dyn Read,
    ) -> Result<()> {
        path::validate_name(filename)?;
        let logical = path::resolve_upload_path(dir, upload_hint, filename);
        let physical = self.physical(&logical);
        self.chunks.write_chunk(chunk_id, &physical, range, data, |offset| {
            self.ensure_parent(&logical)?;
            self.backend.open_writer(&physical, offset)
        })?;
        Ok(())
    }

    /// Finish a chunked upload and return the assembled file.
    ///
    /// Does not check that `total_chunks` chunks arrived. Merging an id
    /// that is not open only stats the target.
    pub fn merge_chunk(
        &self,
        chunk_id: ChunkId,
        total_chunks: u32,
        dir: &str,
        upload_hint: &str,
        filename: &str,
    ) -> Result<FileEntry> {
        path::validate_name(filename)?;
        let logical = path::resolve_upload_path(dir, upload_hint, filename);
        let physical = self.physical(&logical);
        match self.chunks.close(chunk_id) {
            Ok(Some(size)) => {
                debug!(volume = %self.id, chunk_id, total_chunks, size, path = %logical, "Merged chunks");
                self.record(Operation::Upload, &physical, true);
            }
            Ok(None) => {
                debug!(volume = %self.id, chunk_id, "Merge of chunk id without open handle");
            }
            Err(e) => {
                self.record(Operation::Upload, &physical, false);
                return Err(e);
            }
        }
        self.stat(&logical)
    }

    /// Create a directory (and missing parents) under `dir`.
    pub fn make_dir(&self, dir: &str, name: &str) -> Result<FileEntry> {
        let logical = path::join(dir, name.trim_start_matches('/'));
        if path::is_root(&logical) || name.trim_matches('/').is_empty() {
            return Err(VfsError::InvalidPath(format!("invalid directory name: {name:?}")));
        }
        self.backend.mkdir_all(&self.physical(&logical))?;
        self.stat(&logical)
    }

    /// Create an empty file in `dir`, truncating an existing one.
    pub fn make_file(&self, dir: &str, name: &str) -> Result<FileEntry> {
        let name = path::validate_name(name)?;
        let logical = path::join(dir, name);
        let writer = self.backend.open_writer(&self.physical(&logical), 0)?;
        writer.close()?;
        self.stat(&logical)
    }

    /// Rename an entry within its directory.
    pub fn rename(&self, old: &str, new_name: &str) -> Result<FileEntry> {
        let new_name = path::validate_name(new_name)?;
        let old = path::normalize(old);
        if path::is_root(&old) {
            return Err(VfsError::InvalidPath("cannot rename the volume root".to_string()));
        }
        let new = path::join(&path::parent(&old), new_name);
        self.backend.rename(&self.physical(&old), &self.physical(&new))?;
        self.stat(&new)
    }

    /// Remove a file, or a directory with everything below it.
    pub fn remove(&self, logical: &str) -> Result<()> {
        let logical = path::normalize(logical);
        if path::is_root(&logical) {
            return Err(VfsError::InvalidPath("cannot remove the volume root".to_string()));
        }
        let physical = self.physical(&logical);
        // A link is removed itself; its target is left alone.
        let raw = self.backend.lstat(&physical)?;
        if raw.kind == EntryKind::Directory {
            self.backend.remove_dir_all(&physical)
        } else {
            self.backend.remove_file(&physical)
        }
    }

    /// Write `data` as `filename` in `dir` without overwriting.
    ///
    /// An existing name gets `suffix` inserted before its extension, again
    /// until the name is free. `data` is consumed and dropped exactly once.
    pub fn paste<R: Read>(&self, dir: &str, filename: &str, suffix: &str, mut data: R) -> Result<FileEntry> {
        path::validate_name(filename)?;
        if suffix.is_empty() || suffix.contains('/') {
            return Err(VfsError::InvalidPath(format!("invalid conflict suffix: {suffix:?}")));
        }

        let mut name = filename.to_string();
        let mut logical = path::join(dir, &name);
        let mut attempts = 0;
        loop {
            match self.backend.stat(&self.physical(&logical)) {
                Ok(_) => {
                    attempts += 1;
                    if attempts >= MAX_PASTE_ATTEMPTS {
                        return Err(VfsError::InvalidPath(format!("no free name for {filename:?} in {dir}")));
                    }
                    name = path::with_suffix(&name, suffix);
                    logical = path::join(dir, &name);
                }
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            }
        }

        let physical = self.physical(&logical);
        debug!(volume = %self.id, path = %logical, "paste");
        let result = self.write_new(&logical, &physical, &mut data);
        drop(data);
        self.record(Operation::Upload, &physical, result.is_ok());
        result?;
        self.stat(&logical)
    }

    /// Find entries below `logical` whose name contains `key`.
    ///
    /// Results are placed under the synthetic `/_Search` folder.
    pub fn search(&self, logical: &str, key: &str) -> Result<Vec<FileEntry>> {
        let found = self
            .backend
            .search(&self.physical(logical), key, self.search_limit)?;
        let folder = path::join(path::ROOT, SEARCH_FOLDER_NAME);
        Ok(found
            .iter()
            .map(|raw| FileEntry::in_dir(&self.id, &folder, raw))
            .collect())
    }

    /// Release the backend. Later calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(volume = %self.id, "Volume already closed");
            return;
        }
        let open = self.chunks.open_ids();
        if !open.is_empty() {
            warn!(volume = %self.id, chunks = ?open, "Closing volume with unmerged chunk uploads");
        }
        self.backend.close();
        info!(volume = %self.id, user = %self.audit_context.user, "Volume closed");
    }

    /// Whether [`Volume::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_parent(&self, logical: &str) -> Result<()> {
        let parent = path::parent(logical);
        if path::is_root(&parent) {
            return Ok(());
        }
        self.backend.mkdir_all(&self.physical(&parent))
    }

    fn write_new(&self, logical: &str, physical: &str, data: &mut dyn Read) -> Result<u64> {
        self.ensure_parent(logical)?;
        let mut writer: Box<dyn RemoteWriter> = self.backend.open_writer(physical, 0)?;
        let written = match writer.write_from(data) {
            Ok(n) => n,
            Err(e) => {
                if let Err(close_err) = writer.close() {
                    debug!(path = %logical, error = %close_err, "Closing failed upload handle");
                }
                return Err(e.into());
            }
        };
        writer.close()?;
        Ok(written)
    }

    fn record(&self, operation: Operation, physical: &str, success: bool) {
        self.audit
            .record(self.audit_context.record(operation, physical, success));
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        self.close();
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
