//! One backend over several assets.
//!
//! The root lists one folder per asset, named after its hostname. A path
//! `/<folder>/rest` is served by that asset's own session at `/rest`.
//! Sessions are opened the first time a folder is entered and reused until
//! the backend is closed, so listing the root never connects anywhere.

use std::io::Read;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::backend::{walk_search, BackendKind, FileBackend, RemoteWriter};
use crate::entry::{EntryKind, RawEntry};
use crate::error::{Result, VfsError};
use crate::path;

/// Opens the session of one asset.
pub type Connect = Box<dyn Fn() -> Result<Box<dyn FileBackend>> + Send + Sync>;

/// An asset shown as a top-level folder.
pub struct AssetFolder {
    name: String,
    connect: Connect,
    session: Mutex<Option<Arc<dyn FileBackend>>>,
}

impl AssetFolder {
    /// Folder `name` whose session is opened by `connect` on first use.
    pub fn new(name: impl Into<String>, connect: Connect) -> Self {
        Self {
            name: name.into(),
            connect,
            session: Mutex::new(None),
        }
    }

    /// Folder whose session is opened right away.
    pub fn connected(name: impl Into<String>, connect: Connect) -> Result<Self> {
        let folder = Self::new(name, connect);
        folder.session()?;
        Ok(folder)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn session(&self) -> Result<Arc<dyn FileBackend>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| VfsError::BackendUnavailable(format!("session lock of {} poisoned", self.name)))?;
        if let Some(backend) = session.as_ref() {
            return Ok(Arc::clone(backend));
        }
        let backend: Arc<dyn FileBackend> = Arc::from((self.connect)()?);
        info!(asset = %self.name, "Asset session opened");
        *session = Some(Arc::clone(&backend));
        Ok(backend)
    }

    fn close(&self) {
        let taken = match self.session.lock() {
            Ok(mut session) => session.take(),
            Err(_) => None,
        };
        if let Some(backend) = taken {
            backend.close();
            debug!(asset = %self.name, "Asset session closed");
        }
    }
}

/// Where a physical path lands.
enum Route<'a> {
    /// The virtual root.
    Root,
    /// The top of an asset folder.
    Folder(&'a AssetFolder),
    /// A path inside an asset session.
    Inside(&'a AssetFolder, String),
}

/// File backend that fans out to per-asset sessions.
pub struct MultiAssetBackend {
    folders: Vec<AssetFolder>,
}

impl MultiAssetBackend {
    /// Build from `folders`; a folder name seen twice keeps the first one.
    pub fn new(folders: Vec<AssetFolder>) -> Self {
        let mut kept: Vec<AssetFolder> = Vec::with_capacity(folders.len());
        for folder in folders {
            if kept.iter().any(|k| k.name == folder.name) {
                warn!(folder = %folder.name, "Duplicate asset folder name, keeping the first");
                continue;
            }
            kept.push(folder);
        }
        kept.sort_by(|a, b| a.name.cmp(&b.name));
        Self { folders: kept }
    }

    /// Folder names in listing order.
    pub fn folder_names(&self) -> Vec<&str> {
        self.folders.iter().map(|f| f.name.as_str()).collect()
    }

    fn route(&self, physical: &str) -> Result<Route<'_>> {
        let normalized = path::normalize(physical);
        let trimmed = normalized.trim_start_matches('/');
        if trimmed.is_empty() {
            return Ok(Route::Root);
        }
        let (name, rest) = match trimmed.split_once('/') {
            Some((name, rest)) => (name, rest),
            None => (trimmed, ""),
        };
        let folder = self
            .folders
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| VfsError::NotFound(normalized.clone()))?;
        if rest.is_empty() {
            Ok(Route::Folder(folder))
        } else {
            Ok(Route::Inside(folder, path::join(path::ROOT, rest)))
        }
    }

    /// Route a path that must lie inside an asset.
    fn inside(&self, physical: &str, what: &str) -> Result<(Arc<dyn FileBackend>, String)> {
        match self.route(physical)? {
            Route::Inside(folder, rest) => Ok((folder.session()?, rest)),
            Route::Folder(folder) => Err(VfsError::PermissionDenied(format!(
                "cannot {what} asset folder {}",
                folder.name
            ))),
            Route::Root => Err(VfsError::PermissionDenied(format!("cannot {what} the asset root"))),
        }
    }
}

fn virtual_dir(name: &str, mode: u32) -> RawEntry {
    RawEntry::from_mode(name, EntryKind::Directory, 0, 0, mode)
}

impl FileBackend for MultiAssetBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteFilesystem
    }

    fn stat(&self, physical: &str) -> Result<RawEntry> {
        match self.route(physical)? {
            Route::Root => Ok(virtual_dir(path::ROOT, 0o555)),
            Route::Folder(folder) => Ok(virtual_dir(&folder.name, 0o755)),
            Route::Inside(folder, rest) => folder.session()?.stat(&rest),
        }
    }

    fn lstat(&self, physical: &str) -> Result<RawEntry> {
        match self.route(physical)? {
            Route::Inside(folder, rest) => folder.session()?.lstat(&rest),
            _ => self.stat(physical),
        }
    }

    fn read_dir(&self, physical: &str) -> Result<Vec<RawEntry>> {
        match self.route(physical)? {
            Route::Root => Ok(self
                .folders
                .iter()
                .map(|f| virtual_dir(&f.name, 0o755))
                .collect()),
            Route::Folder(folder) => folder.session()?.read_dir(path::ROOT),
            Route::Inside(folder, rest) => folder.session()?.read_dir(&rest),
        }
    }

    fn open(&self, physical: &str) -> Result<Box<dyn Read + Send>> {
        match self.route(physical)? {
            Route::Inside(folder, rest) => folder.session()?.open(&rest),
            _ => Err(VfsError::InvalidPath(format!("{physical} is a directory"))),
        }
    }

    fn open_writer(&self, physical: &str, offset: u64) -> Result<Box<dyn RemoteWriter>> {
        let (backend, rest) = self.inside(physical, "write")?;
        backend.open_writer(&rest, offset)
    }

    fn mkdir_all(&self, physical: &str) -> Result<()> {
        match self.route(physical)? {
            Route::Root | Route::Folder(_) => Ok(()),
            Route::Inside(folder, rest) => folder.session()?.mkdir_all(&rest),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        match (self.route(from)?, self.route(to)?) {
            (Route::Inside(source, from_rest), Route::Inside(target, to_rest))
                if std::ptr::eq(source, target) =>
            {
                source.session()?.rename(&from_rest, &to_rest)
            }
            (Route::Inside(..), _) => Err(VfsError::PermissionDenied(format!(
                "cannot move {from} to {to} across assets"
            ))),
            _ => Err(VfsError::PermissionDenied(format!("cannot rename {from}"))),
        }
    }

    fn remove_file(&self, physical: &str) -> Result<()> {
        let (backend, rest) = self.inside(physical, "remove")?;
        backend.remove_file(&rest)
    }

    fn remove_dir_all(&self, physical: &str) -> Result<()> {
        let (backend, rest) = self.inside(physical, "remove")?;
        backend.remove_dir_all(&rest)
    }

    fn search(&self, root: &str, key: &str, limit: usize) -> Result<Vec<RawEntry>> {
        match self.route(root)? {
            Route::Root => walk_search(self, root, key, limit),
            Route::Folder(folder) => folder.session()?.search(path::ROOT, key, limit),
            Route::Inside(folder, rest) => folder.session()?.search(&rest, key, limit),
        }
    }

    fn close(&self) {
        for folder in &self.folders {
            folder.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn folder(name: &str, dir: &TempDir, connects: &Arc<AtomicUsize>) -> AssetFolder {
        let root = dir.path().to_string_lossy().into_owned();
        let connects = Arc::clone(connects);
        AssetFolder::new(
            name,
            Box::new(move || {
                connects.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(LocalBackend::rooted(root.clone())) as Box<dyn FileBackend>)
            }),
        )
    }

    fn two_assets() -> (MultiAssetBackend, TempDir, TempDir, Arc<AtomicUsize>) {
        let web = TempDir::new().unwrap();
        let db = TempDir::new().unwrap();
        let connects = Arc::new(AtomicUsize::new(0));
        let backend = MultiAssetBackend::new(vec![
            folder("web-01", &web, &connects),
            folder("db-01", &db, &connects),
        ]);
        (backend, web, db, connects)
    }

    #[test]
    fn test_root_lists_folders_without_connecting() {
        let (backend, _web, _db, connects) = two_assets();
        let names: Vec<String> = backend.read_dir("/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["db-01", "web-01"]);
        assert_eq!(backend.stat("/web-01").unwrap().kind, EntryKind::Directory);
        assert_eq!(connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_paths_route_to_their_asset() {
        let (backend, web, db, connects) = two_assets();
        fs::write(web.path().join("index.html"), "<html>").unwrap();

        let listed = backend.read_dir("/web-01").unwrap();
        assert_eq!(listed[0].name, "index.html");
        assert_eq!(backend.stat("/web-01/index.html").unwrap().size, 6);

        let mut writer = backend.open_writer("/db-01/dump.sql", 0).unwrap();
        writer.write_from(&mut &b"select 1;"[..]).unwrap();
        writer.close().unwrap();
        assert_eq!(fs::read_to_string(db.path().join("dump.sql")).unwrap(), "select 1;");

        backend.read_dir("/web-01").unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_folder_is_not_found() {
        let (backend, _web, _db, _) = two_assets();
        assert!(backend.stat("/mail-01").unwrap_err().is_not_found());
        assert!(backend.read_dir("/mail-01/x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_folders_cannot_be_removed_or_renamed() {
        let (backend, web, _db, _) = two_assets();
        fs::write(web.path().join("a.txt"), "a").unwrap();

        assert!(matches!(backend.remove_dir_all("/web-01"), Err(VfsError::PermissionDenied(_))));
        assert!(matches!(backend.remove_file("/"), Err(VfsError::PermissionDenied(_))));
        assert!(matches!(
            backend.rename("/web-01/a.txt", "/db-01/a.txt"),
            Err(VfsError::PermissionDenied(_))
        ));
        backend.rename("/web-01/a.txt", "/web-01/b.txt").unwrap();
        assert!(web.path().join("b.txt").exists());
    }

    #[test]
    fn test_failed_connect_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let backend = MultiAssetBackend::new(vec![AssetFolder::new(
            "web-01",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(VfsError::BackendUnavailable("connection refused".to_string()))
            }),
        )]);
        assert!(backend.read_dir("/web-01").is_err());
        assert!(backend.read_dir("/web-01").is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_connected_folder_opens_immediately() {
        let dir = TempDir::new().unwrap();
        let connects = Arc::new(AtomicUsize::new(0));
        let root = dir.path().to_string_lossy().into_owned();
        let counter = Arc::clone(&connects);
        let folder = AssetFolder::connected(
            "web-01",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(LocalBackend::rooted(root.clone())) as Box<dyn FileBackend>)
            }),
        )
        .unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        let backend = MultiAssetBackend::new(vec![folder]);
        backend.read_dir("/web-01").unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        backend.close();
        backend.read_dir("/web-01").unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let (a, b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let connects = Arc::new(AtomicUsize::new(0));
        let backend = MultiAssetBackend::new(vec![folder("web", &a, &connects), folder("web", &b, &connects)]);
        assert_eq!(backend.folder_names(), vec!["web"]);
    }
}
