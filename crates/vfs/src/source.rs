//! Asset and credential lookups.
//!
//! The bridge never talks to the inventory service itself. Whoever builds a
//! volume supplies an [`AssetSource`] returning plain records.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by an asset source.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    /// No record with this id is visible to the user.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record type that was looked up.
        kind: &'static str,
        /// Id that was looked up.
        id: String,
    },

    /// The source itself failed.
    #[error("asset source unavailable: {0}")]
    Unavailable(String),
}

/// A host the user may connect to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetRecord {
    pub id: String,
    pub hostname: String,
    pub address: String,
    pub port: u16,
}

/// Credentials of a system user on a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRecord {
    /// Account name on the target.
    pub username: String,
    pub password: Option<String>,
    /// Path of a private key file.
    pub private_key: Option<String>,
    /// Control-plane bearer token (applications only).
    pub token: Option<String>,
}

/// A cluster application hosting containers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationRecord {
    pub id: String,
    pub name: String,
    /// Control-plane API address.
    pub cluster: String,
}

/// Source of asset, application and credential records.
pub trait AssetSource: Send + Sync {
    /// Asset `asset_id` as visible to `user_id`.
    fn asset_by_id(&self, user_id: &str, asset_id: &str) -> Result<AssetRecord, SourceError>;

    /// Every asset `user_id` may reach by file transfer.
    fn assets_for_user(&self, user_id: &str) -> Result<Vec<AssetRecord>, SourceError>;

    /// Credentials `user` holds for `target` (an asset or application id).
    fn auth_info_for(&self, target: &str, user: &str) -> Result<AuthRecord, SourceError>;

    /// Application `app_id`.
    fn application_by_id(&self, app_id: &str) -> Result<ApplicationRecord, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = SourceError::NotFound {
            kind: "asset",
            id: "a1".to_string(),
        };
        assert_eq!(err.to_string(), "asset not found: a1");
    }

    #[test]
    fn test_records_deserialize_with_defaults() {
        let asset: AssetRecord = serde_json::from_str(r#"{"id":"a1","hostname":"web-01"}"#).unwrap();
        assert_eq!(asset.hostname, "web-01");
        assert_eq!(asset.port, 0);
        let auth: AuthRecord = serde_json::from_str(r#"{"username":"root"}"#).unwrap();
        assert!(auth.password.is_none());
    }
}
