//! Target ids and volume layout.
//!
//! Clients name what they want to browse with a single id string:
//!
//! - empty: every asset the user may reach, one folder each;
//! - a query string containing `namespace`, e.g.
//!   `app_id=..&pod=web-0&namespace=prod&container=nginx&system_user_id=..`:
//!   a container;
//! - anything else: an asset id.

use thiserror::Error;
use url::form_urlencoded;

use crate::backend::ContainerOptions;
use crate::path;
use crate::source::{AssetRecord, AssetSource, SourceError};

/// Home name of volumes without a more specific one.
pub const DEFAULT_HOME_NAME: &str = "Home";

/// Errors from parsing a target id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    /// A container id lacks a required parameter.
    #[error("container target is missing `{0}`")]
    MissingField(&'static str),
}

/// Container coordinates from a target id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerTarget {
    pub app_id: String,
    pub pod: String,
    pub namespace: String,
    pub container: String,
    pub system_user_id: String,
}

impl ContainerTarget {
    /// Resolve control-plane address and credentials through `source`.
    pub fn options(&self, source: &dyn AssetSource, user: &str) -> Result<ContainerOptions, SourceError> {
        let application = source.application_by_id(&self.app_id)?;
        let auth = source.auth_info_for(&self.app_id, user)?;
        Ok(ContainerOptions {
            host: application.cluster,
            token: auth.token.unwrap_or_default(),
            system_user: auth.username,
            namespace: self.namespace.clone(),
            pod_name: self.pod.clone(),
            container_name: self.container.clone(),
            skip_tls_verify: true,
        })
    }
}

/// What a target id points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeTarget {
    /// All assets of the user under one root.
    AllAssets,
    /// A host reachable by remote file transfer.
    Asset {
        /// Asset id.
        asset_id: String,
    },
    /// A container reachable by exec.
    Container(ContainerTarget),
}

impl VolumeTarget {
    /// Parse a client target id.
    pub fn parse(id: &str) -> Result<Self, TargetError> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(VolumeTarget::AllAssets);
        }
        if !id.contains("namespace") {
            return Ok(VolumeTarget::Asset {
                asset_id: id.to_string(),
            });
        }

        let mut target = ContainerTarget::default();
        for (key, value) in form_urlencoded::parse(id.trim_start_matches('?').as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "app_id" => target.app_id = value,
                "pod" => target.pod = value,
                "namespace" => target.namespace = value,
                "container" => target.container = value,
                "system_user_id" => target.system_user_id = value,
                _ => {}
            }
        }
        if target.namespace.is_empty() {
            return Err(TargetError::MissingField("namespace"));
        }
        if target.pod.is_empty() {
            return Err(TargetError::MissingField("pod"));
        }
        Ok(VolumeTarget::Container(target))
    }
}

/// Display root and backend root of a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLayout {
    /// Name shown for the logical root.
    pub home_name: String,
    /// Backend path that logical `/` maps onto.
    pub base_path: String,
}

/// Folder an asset appears under in a multi-asset root.
///
/// The hostname with `/` replaced by `_`, or the asset id when the hostname
/// is empty.
pub fn asset_folder_name(asset: &AssetRecord) -> String {
    if asset.hostname.is_empty() {
        asset.id.replace('/', "_")
    } else {
        asset.hostname.replace('/', "_")
    }
}

impl VolumeLayout {
    /// Layout rooted at directory `dir`, shown as `Home`.
    pub fn local(dir: &str) -> Self {
        Self {
            home_name: DEFAULT_HOME_NAME.to_string(),
            base_path: dir.to_string(),
        }
    }

    /// Layout of the multi-asset root.
    pub fn all_assets() -> Self {
        Self::local(path::ROOT)
    }

    /// Layout of a single asset inside a multi-asset root: named after its
    /// folder and based at it.
    pub fn asset(asset: &AssetRecord) -> Self {
        let home_name = asset_folder_name(asset);
        Self {
            base_path: path::join(path::ROOT, &home_name),
            home_name,
        }
    }

    /// Layout of a container: named after the pod, rooted at `root`.
    pub fn container(target: &ContainerTarget, root: &str) -> Self {
        Self {
            home_name: target.pod.clone(),
            base_path: root.to_string(),
        }
    }
}
