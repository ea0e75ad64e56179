//! Asset source backed by the `[[assets]]` configuration section.

use std::collections::HashMap;

use vfs::{ApplicationRecord, AssetRecord, AssetSource, AuthRecord, SourceError};

use crate::config::AssetConfig;

/// Serves asset, application and credential records from static config.
///
/// Entries with a `cluster` address are applications; the rest are hosts.
/// Every configured asset is visible to every user.
#[derive(Debug, Clone, Default)]
pub struct ConfigAssetSource {
    assets: HashMap<String, AssetConfig>,
}

impl ConfigAssetSource {
    pub fn new(assets: &[AssetConfig]) -> Self {
        Self {
            assets: assets
                .iter()
                .map(|asset| (asset.id.clone(), asset.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    fn lookup(&self, kind: &'static str, id: &str) -> Result<&AssetConfig, SourceError> {
        self.assets.get(id).ok_or_else(|| SourceError::NotFound {
            kind,
            id: id.to_string(),
        })
    }
}

fn record(asset: &AssetConfig) -> AssetRecord {
    AssetRecord {
        id: asset.id.clone(),
        hostname: asset.hostname.clone(),
        address: asset.address.clone(),
        port: if asset.port == 0 { 22 } else { asset.port },
    }
}

impl AssetSource for ConfigAssetSource {
    fn asset_by_id(&self, _user_id: &str, asset_id: &str) -> Result<AssetRecord, SourceError> {
        let asset = self.lookup("asset", asset_id)?;
        if asset.cluster.is_some() {
            return Err(SourceError::NotFound {
                kind: "asset",
                id: asset_id.to_string(),
            });
        }
        Ok(record(asset))
    }

    fn assets_for_user(&self, _user_id: &str) -> Result<Vec<AssetRecord>, SourceError> {
        let mut records: Vec<AssetRecord> = self
            .assets
            .values()
            .filter(|asset| asset.cluster.is_none())
            .map(record)
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    fn auth_info_for(&self, target: &str, _user: &str) -> Result<AuthRecord, SourceError> {
        let asset = self.lookup("credentials", target)?;
        Ok(AuthRecord {
            username: asset.username.clone(),
            password: asset.password.clone(),
            private_key: asset
                .private_key
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned()),
            token: asset.token.clone(),
        })
    }

    fn application_by_id(&self, app_id: &str) -> Result<ApplicationRecord, SourceError> {
        let asset = self.lookup("application", app_id)?;
        let cluster = asset.cluster.clone().ok_or_else(|| SourceError::NotFound {
            kind: "application",
            id: app_id.to_string(),
        })?;
        Ok(ApplicationRecord {
            id: asset.id.clone(),
            name: asset.hostname.clone(),
            cluster,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn source() -> ConfigAssetSource {
        ConfigAssetSource::new(&[
            AssetConfig {
                id: "web".to_string(),
                hostname: "web-01".to_string(),
                address: "10.0.0.10".to_string(),
                username: "root".to_string(),
                private_key: Some(PathBuf::from("/keys/id_ed25519")),
                ..Default::default()
            },
            AssetConfig {
                id: "k8s".to_string(),
                hostname: "prod-cluster".to_string(),
                username: "deploy".to_string(),
                cluster: Some("https://k8s.example:6443".to_string()),
                token: Some("t0ken".to_string()),
                ..Default::default()
            },
        ])
    }

    #[test]
    fn test_asset_lookup_defaults_port() {
        let asset = source().asset_by_id("alice", "web").unwrap();
        assert_eq!(asset.hostname, "web-01");
        assert_eq!(asset.port, 22);
    }

    #[test]
    fn test_assets_for_user_skips_applications() {
        let assets = source().assets_for_user("alice").unwrap();
        let ids: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["web"]);
    }

    #[test]
    fn test_applications_are_not_assets() {
        assert!(matches!(
            source().asset_by_id("alice", "k8s"),
            Err(SourceError::NotFound { kind: "asset", .. })
        ));
        assert!(source().application_by_id("web").is_err());
    }

    #[test]
    fn test_application_lookup() {
        let app = source().application_by_id("k8s").unwrap();
        assert_eq!(app.cluster, "https://k8s.example:6443");
        assert_eq!(app.name, "prod-cluster");
    }

    #[test]
    fn test_auth_info() {
        let auth = source().auth_info_for("web", "alice").unwrap();
        assert_eq!(auth.username, "root");
        assert_eq!(auth.private_key.as_deref(), Some("/keys/id_ed25519"));
        assert!(auth.password.is_none());

        let auth = source().auth_info_for("k8s", "alice").unwrap();
        assert_eq!(auth.token.as_deref(), Some("t0ken"));
    }

    #[test]
    fn test_unknown_id() {
        let err = source().auth_info_for("nope", "alice").unwrap_err();
        assert_eq!(err.to_string(), "credentials not found: nope");
    }
}
