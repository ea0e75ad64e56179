//! Error types for the virtual filesystem bridge.

use thiserror::Error;

use crate::chunk::ChunkId;

/// Error type covering every failure a volume operation can report.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The backend session is gone or refused the request.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The requested path does not exist on the backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend denied access to the path.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A backend call exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Text returned by a remote command could not be interpreted.
    #[error("malformed remote output: {0}")]
    MalformedRemoteOutput(String),

    /// A chunked upload was driven into an inconsistent state.
    #[error("chunk {chunk_id} state conflict: {reason}")]
    ChunkStateConflict {
        /// Client-supplied chunk id.
        chunk_id: ChunkId,
        /// What went wrong.
        reason: String,
    },

    /// The backend has no implementation of this operation.
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    /// A client-supplied name or path was rejected.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, VfsError>;

impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => VfsError::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => VfsError::PermissionDenied(err.to_string()),
            ErrorKind::TimedOut | ErrorKind::WouldBlock => VfsError::Timeout(err.to_string()),
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe => VfsError::BackendUnavailable(err.to_string()),
            _ => VfsError::Io(err),
        }
    }
}

impl VfsError {
    /// Classify the text a remote command wrote to stderr.
    ///
    /// Coreutils report missing paths and access failures with stable
    /// English phrases; anything else is treated as a backend failure.
    pub fn from_remote_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.contains("No such file or directory") {
            VfsError::NotFound(trimmed.to_string())
        } else if trimmed.contains("Permission denied") || trimmed.contains("Operation not permitted") {
            VfsError::PermissionDenied(trimmed.to_string())
        } else {
            VfsError::BackendUnavailable(trimmed.to_string())
        }
    }

    /// Whether the error means the path is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound(_))
    }
}
