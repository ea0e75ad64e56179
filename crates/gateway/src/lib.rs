//! # Bastion Gateway
//!
//! Opens file-manager volumes on hosts, one at a time or all of a user's
//! under one root, and on containers, and drives them from the command line.
//!
//! - [`config`]: TOML configuration with environment overrides
//! - [`assets`]: asset source backed by configuration
//! - [`connect`]: target id to [`vfs::Volume`]
//! - [`audit`]: writer task for transfer records
//! - [`cli`]: command-line surface

pub mod assets;
pub mod audit;
pub mod cli;
pub mod config;
pub mod connect;

pub use assets::ConfigAssetSource;
pub use audit::spawn_audit_writer;
pub use cli::{run_command, Cli, Commands};
pub use config::{Config, ConfigError};
pub use connect::{ConnectError, Connector, Requester};
