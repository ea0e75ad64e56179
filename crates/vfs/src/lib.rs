//! # Bastion Virtual Filesystem Bridge
//!
//! This crate puts one file-manager contract in front of two very different
//! kinds of remote target:
//!
//! - hosts reached by a remote file-transfer session, which offer native
//!   stat/readdir/open calls, one at a time or several side by side under
//!   a shared root;
//! - containers reached only through a cluster control-plane exec channel,
//!   where every operation is a coreutils command and metadata is scraped
//!   from `ls` output.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Volume                       │  logical paths, hashes,
//! │   stat · list · upload · chunks · search     │  audit records
//! ├───────────────────────┬──────────────────────┤
//! │   ListingAdapter      │     ChunkTable       │
//! ├───────────────────────┴──────────────────────┤
//! │              dyn FileBackend                 │
//! ├──────────────┬───────────────┬───────────────┤
//! │ MultiAsset   │ SftpBackend   │ ContainerBack │
//! │ Backend      │ (feature)     │ end → Exec    │
//! │  └ per-asset │ LocalBackend  │               │
//! └──────────────┴───────────────┴───────────────┘
//! ```
//!
//! Clients never see backend paths. Entries are linked by opaque hashes
//! derived from the volume id and the logical path (see [`hash`]).
//!
//! ## Example
//!
//! ```rust
//! use vfs::{LocalBackend, Volume, VolumeLayout};
//!
//! let dir = std::env::temp_dir();
//! let volume = Volume::new(
//!     vfs::hash::volume_id("alice", "127.0.0.1:50000"),
//!     VolumeLayout::local(&dir.to_string_lossy()),
//!     Box::new(LocalBackend::new()),
//! );
//! let root = volume.root_info();
//! assert_eq!(root.name, "Home");
//! assert!(root.parent_hash.is_empty());
//! ```
//!
//! ## Modules
//!
//! - [`volume`]: the façade
//! - [`backend`]: capability trait and backends
//! - [`exec`]: command execution for containers
//! - [`listing`]: listing adapters and the `ls` parser
//! - [`chunk`]: chunked upload reassembly
//! - [`hash`], [`path`]: addressing
//! - [`audit`], [`source`], [`target`]: collaborators and target ids
//! - [`error`]: error types

pub mod audit;
pub mod backend;
pub mod chunk;
pub mod entry;
pub mod error;
pub mod exec;
pub mod hash;
pub mod listing;
pub mod path;
pub mod source;
pub mod target;
pub mod volume;

pub use audit::{AuditContext, AuditSink, ChannelAuditSink, FtpLog, Operation, TracingAuditSink};
pub use backend::{
    AssetFolder, BackendKind, ContainerBackend, ContainerOptions, FileBackend, LocalBackend,
    MultiAssetBackend, RemoteWriter,
};
#[cfg(feature = "sftp")]
pub use backend::{SftpAuth, SftpBackend, SftpOptions};
pub use chunk::{ChunkId, ChunkRange, ChunkTable};
pub use entry::{EntryKind, FileEntry, RawEntry};
pub use error::{Result, VfsError};
pub use exec::{ExecError, ExecRunner, ExecTransport, ProcessExec};
pub use listing::{Listing, ListingAdapter};
pub use source::{ApplicationRecord, AssetRecord, AssetSource, AuthRecord, SourceError};
pub use target::{asset_folder_name, ContainerTarget, TargetError, VolumeLayout, VolumeTarget};
pub use volume::{FileReader, Volume};
