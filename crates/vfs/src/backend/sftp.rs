//! Remote file-transfer backend over SSH/SFTP.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use ssh2::{ErrorCode, FileStat, OpenFlags, OpenType, Session, Sftp};
use tracing::{debug, info, warn};

use crate::backend::{walk_search, BackendKind, FileBackend, RemoteWriter};
use crate::entry::{EntryKind, RawEntry};
use crate::error::{Result, VfsError};
use crate::exec::DEFAULT_DEADLINE;
use crate::path;

const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_PERMISSION_DENIED: i32 = 3;
const SESSION_TIMEOUT: i32 = -9;

/// How to authenticate the SSH session.
#[derive(Debug, Clone)]
pub enum SftpAuth {
    Password(String),
    /// Private key file with optional passphrase.
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct SftpOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SftpAuth,
    /// Deadline for connecting and for every blocking call.
    pub timeout: Duration,
}

impl SftpOptions {
    /// Options with the default five minute deadline.
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, auth: SftpAuth) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth,
            timeout: DEFAULT_DEADLINE,
        }
    }
}

fn map_ssh_error(err: ssh2::Error) -> VfsError {
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => VfsError::NotFound(err.message().to_string()),
        ErrorCode::SFTP(SFTP_PERMISSION_DENIED) => VfsError::PermissionDenied(err.message().to_string()),
        ErrorCode::Session(SESSION_TIMEOUT) => VfsError::Timeout(err.message().to_string()),
        _ => VfsError::BackendUnavailable(err.to_string()),
    }
}

/// Classify from the type bits; a link stat is never a directory.
fn kind_of(stat: &FileStat) -> EntryKind {
    let file_type = stat.file_type();
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

fn raw_from_stat(name: &str, stat: &FileStat, kind: EntryKind) -> RawEntry {
    RawEntry::from_mode(
        name,
        kind,
        stat.size.unwrap_or(0),
        stat.mtime.map(|t| t as i64).unwrap_or(0),
        stat.perm.unwrap_or(0),
    )
}

/// File backend on one SFTP session.
pub struct SftpBackend {
    session: Session,
    sftp: Mutex<Sftp>,
}

impl SftpBackend {
    /// Connect, authenticate and open the SFTP subsystem.
    pub fn connect(options: &SftpOptions) -> Result<Self> {
        let addr = (options.host.as_str(), options.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| VfsError::BackendUnavailable(format!("cannot resolve {}", options.host)))?;
        let tcp = TcpStream::connect_timeout(&addr, options.timeout)?;

        let mut session = Session::new().map_err(map_ssh_error)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(options.timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake().map_err(map_ssh_error)?;

        match &options.auth {
            SftpAuth::Password(password) => session
                .userauth_password(&options.username, password)
                .map_err(map_ssh_error)?,
            SftpAuth::KeyFile { path, passphrase } => session
                .userauth_pubkey_file(&options.username, None, path, passphrase.as_deref())
                .map_err(map_ssh_error)?,
        }
        if !session.authenticated() {
            return Err(VfsError::PermissionDenied(format!(
                "authentication failed for {}@{}",
                options.username, options.host
            )));
        }

        let sftp = session.sftp().map_err(map_ssh_error)?;
        info!(host = %options.host, port = options.port, user = %options.username, "SFTP session established");
        Ok(Self {
            session,
            sftp: Mutex::new(sftp),
        })
    }

    fn sftp(&self) -> Result<MutexGuard<'_, Sftp>> {
        self.sftp
            .lock()
            .map_err(|_| VfsError::BackendUnavailable("sftp session lock poisoned".to_string()))
    }
}

impl FileBackend for SftpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteFilesystem
    }

    fn stat(&self, path: &str) -> Result<RawEntry> {
        let stat = self.sftp()?.stat(Path::new(path)).map_err(map_ssh_error)?;
        let kind = if stat.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Ok(raw_from_stat(path::base_name(path), &stat, kind))
    }

    fn lstat(&self, path: &str) -> Result<RawEntry> {
        let stat = self.sftp()?.lstat(Path::new(path)).map_err(map_ssh_error)?;
        Ok(raw_from_stat(path::base_name(path), &stat, kind_of(&stat)))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<RawEntry>> {
        let entries = self.sftp()?.readdir(Path::new(path)).map_err(map_ssh_error)?;
        let mut results: Vec<RawEntry> = entries
            .iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy().to_string();
                if name == "." || name == ".." {
                    return None;
                }
                Some(raw_from_stat(&name, stat, kind_of(stat)))
            })
            .collect();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = self.sftp()?.open(Path::new(path)).map_err(map_ssh_error)?;
        Ok(Box::new(file))
    }

    fn open_writer(&self, path: &str, offset: u64) -> Result<Box<dyn RemoteWriter>> {
        let sftp = self.sftp()?;
        let flags = if offset == 0 {
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE
        } else {
            OpenFlags::WRITE | OpenFlags::CREATE
        };
        let mut file = sftp
            .open_mode(Path::new(path), flags, 0o644, OpenType::File)
            .map_err(map_ssh_error)?;
        if offset > 0 {
            let truncate = FileStat {
                size: Some(offset),
                uid: None,
                gid: None,
                perm: None,
                atime: None,
                mtime: None,
            };
            sftp.setstat(Path::new(path), truncate).map_err(map_ssh_error)?;
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Box::new(SftpWriter { file }))
    }

    fn mkdir_all(&self, path: &str) -> Result<()> {
        let sftp = self.sftp()?;
        let mut current = String::new();
        for segment in path::normalize(path).split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            match sftp.stat(Path::new(&current)) {
                Ok(stat) if stat.is_dir() => continue,
                Ok(_) => {
                    return Err(VfsError::InvalidPath(format!("{current} exists and is not a directory")));
                }
                Err(_) => sftp.mkdir(Path::new(&current), 0o755).map_err(map_ssh_error)?,
            }
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.sftp()?
            .rename(Path::new(from), Path::new(to), None)
            .map_err(map_ssh_error)
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        self.sftp()?.unlink(Path::new(path)).map_err(map_ssh_error)
    }

    fn remove_dir_all(&self, path: &str) -> Result<()> {
        let sftp = self.sftp()?;
        let stat = sftp.lstat(Path::new(path)).map_err(map_ssh_error)?;
        if kind_of(&stat) == EntryKind::Directory {
            remove_tree(&sftp, path)
        } else {
            sftp.unlink(Path::new(path)).map_err(map_ssh_error)
        }
    }

    fn search(&self, root: &str, key: &str, limit: usize) -> Result<Vec<RawEntry>> {
        walk_search(self, root, key, limit)
    }

    fn close(&self) {
        if let Err(e) = self.session.disconnect(None, "volume closed", None) {
            warn!(error = %e, "SFTP disconnect failed");
        }
    }
}

/// Depth-first removal of a directory that is known not to be a link.
///
/// Children are classified from the readdir attributes, which describe the
/// entry itself, so a link inside the tree is unlinked and not followed.
fn remove_tree(sftp: &Sftp, path: &str) -> Result<()> {
    let entries = sftp.readdir(Path::new(path)).map_err(map_ssh_error)?;
    for (entry_path, stat) in entries {
        let name = entry_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.is_empty() || name == "." || name == ".." {
            continue;
        }
        let child = path::join(path, &name);
        if kind_of(&stat) == EntryKind::Directory {
            remove_tree(sftp, &child)?;
        } else {
            sftp.unlink(Path::new(&child)).map_err(map_ssh_error)?;
        }
    }
    debug!(path, "Removing remote directory");
    sftp.rmdir(Path::new(path)).map_err(map_ssh_error)
}

struct SftpWriter {
    file: ssh2::File,
}

impl RemoteWriter for SftpWriter {
    fn write_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        io::copy(src, &mut self.file)
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush()?;
        self.file.close().map_err(io::Error::from)
    }
}
