//! Building volumes from client target ids.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use vfs::backend::multi::Connect;
use vfs::{
    asset_folder_name, hash, AssetFolder, AssetRecord, AssetSource, AuditContext, AuditSink,
    ContainerBackend, ContainerTarget, ExecRunner, FileBackend, LocalBackend, MultiAssetBackend,
    ProcessExec, SourceError, TargetError, VfsError, Volume, VolumeLayout, VolumeTarget,
};

use crate::config::Config;

/// Errors from opening a volume.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid target id: {0}")]
    Target(#[from] TargetError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("exec program `{program}` not found: {reason}")]
    ExecProgramMissing { program: String, reason: String },

    #[error(transparent)]
    Backend(#[from] VfsError),
}

/// Who is asking for a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requester {
    /// Gateway user name.
    pub user: String,
    /// Address the user connected from.
    pub remote_addr: String,
}

/// Opens volumes for target ids.
pub struct Connector {
    config: Config,
    source: Arc<dyn AssetSource>,
    audit: Arc<dyn AuditSink>,
}

impl Connector {
    pub fn new(config: Config, source: Arc<dyn AssetSource>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            config,
            source,
            audit,
        }
    }

    /// Open the volume `target_id` names for `requester`.
    pub fn connect(&self, requester: &Requester, target_id: &str) -> Result<Volume, ConnectError> {
        let target = VolumeTarget::parse(target_id)?;
        let volume_id = hash::volume_id(&requester.user, &requester.remote_addr);
        debug!(user = %requester.user, volume = %volume_id, ?target, "Opening volume");

        let (layout, backend, system_user) = match &target {
            VolumeTarget::AllAssets => self.all_assets(requester)?,
            VolumeTarget::Asset { asset_id } => self.asset(requester, asset_id)?,
            VolumeTarget::Container(container) => self.container(requester, container)?,
        };

        let context = AuditContext {
            user: requester.user.clone(),
            hostname: layout.home_name.clone(),
            system_user,
            remote_addr: requester.remote_addr.clone(),
        };
        info!(
            user = %requester.user,
            volume = %volume_id,
            home = %layout.home_name,
            kind = ?backend.kind(),
            "Volume opened"
        );
        Ok(Volume::new(volume_id, layout, backend)
            .with_audit(Arc::clone(&self.audit), context)
            .with_search_limit(self.config.transfer.search_limit))
    }

    fn deadline(&self) -> Duration {
        self.config
            .transfer
            .read_timeout()
            .max(self.config.transfer.write_timeout())
    }

    /// Every asset of the user, one folder each, connected on first use.
    fn all_assets(
        &self,
        requester: &Requester,
    ) -> Result<(VolumeLayout, Box<dyn FileBackend>, String), ConnectError> {
        let assets = self.source.assets_for_user(&requester.user)?;
        debug!(user = %requester.user, count = assets.len(), "Building multi-asset root");
        let folders = assets
            .into_iter()
            .map(|asset| AssetFolder::new(asset_folder_name(&asset), self.session(requester, asset)))
            .collect();
        Ok((
            VolumeLayout::all_assets(),
            Box::new(MultiAssetBackend::new(folders)),
            String::new(),
        ))
    }

    /// One asset, based at its folder of a single-folder root.
    fn asset(
        &self,
        requester: &Requester,
        asset_id: &str,
    ) -> Result<(VolumeLayout, Box<dyn FileBackend>, String), ConnectError> {
        let asset = self.source.asset_by_id(&requester.user, asset_id)?;
        let system_user = self
            .source
            .auth_info_for(asset_id, &requester.user)
            .map(|auth| auth.username)
            .unwrap_or_default();
        let layout = VolumeLayout::asset(&asset);
        let folder = AssetFolder::connected(asset_folder_name(&asset), self.session(requester, asset))?;
        Ok((
            layout,
            Box::new(MultiAssetBackend::new(vec![folder])),
            system_user,
        ))
    }

    /// Opener for the session of `asset`.
    ///
    /// Assets with a `local_root` are served from that gateway directory;
    /// the rest go over SFTP.
    fn session(&self, requester: &Requester, asset: AssetRecord) -> Connect {
        let local_root = self
            .config
            .assets
            .iter()
            .find(|configured| configured.id == asset.id)
            .and_then(|configured| configured.local_root.clone());
        if let Some(dir) = local_root {
            return Box::new(move || local_session(&dir));
        }
        let source = Arc::clone(&self.source);
        let user = requester.user.clone();
        let deadline = self.deadline();
        Box::new(move || sftp_session(source.as_ref(), &user, &asset, deadline))
    }

    fn container(
        &self,
        requester: &Requester,
        target: &ContainerTarget,
    ) -> Result<(VolumeLayout, Box<dyn FileBackend>, String), ConnectError> {
        let mut options = target.options(self.source.as_ref(), &requester.user)?;
        options.skip_tls_verify = self.config.container.skip_tls_verify;

        let program = &self.config.container.kubectl;
        let program_path =
            which::which(program).map_err(|e| ConnectError::ExecProgramMissing {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        let transport = ProcessExec::kubectl(program_path, &options);
        let runner = ExecRunner::new(Arc::new(transport)).with_deadline(self.deadline());
        let system_user = options.system_user.clone();
        let layout = VolumeLayout::container(target, &self.config.container.root);
        Ok((
            layout,
            Box::new(ContainerBackend::new(runner, options)),
            system_user,
        ))
    }
}

fn local_session(dir: &Path) -> vfs::Result<Box<dyn FileBackend>> {
    fs::create_dir_all(dir)?;
    Ok(Box::new(LocalBackend::rooted(dir.to_string_lossy())))
}

#[cfg(feature = "sftp")]
fn sftp_session(
    source: &dyn AssetSource,
    user: &str,
    asset: &AssetRecord,
    deadline: Duration,
) -> vfs::Result<Box<dyn FileBackend>> {
    use std::path::PathBuf;
    use vfs::{SftpAuth, SftpBackend, SftpOptions};

    let auth = source
        .auth_info_for(&asset.id, user)
        .map_err(|e| VfsError::PermissionDenied(e.to_string()))?;
    let method = match (auth.private_key, auth.password) {
        (Some(key), passphrase) => SftpAuth::KeyFile {
            path: PathBuf::from(key),
            passphrase,
        },
        (None, Some(password)) => SftpAuth::Password(password),
        (None, None) => {
            return Err(VfsError::PermissionDenied(format!(
                "no credentials for asset {}",
                asset.id
            )))
        }
    };
    let mut options = SftpOptions::new(&asset.address, asset.port, &auth.username, method);
    options.timeout = deadline;
    Ok(Box::new(SftpBackend::connect(&options)?))
}

#[cfg(not(feature = "sftp"))]
fn sftp_session(
    _source: &dyn AssetSource,
    _user: &str,
    _asset: &AssetRecord,
    _deadline: Duration,
) -> vfs::Result<Box<dyn FileBackend>> {
    Err(VfsError::Unsupported(
        "asset sessions need the gateway built with the `sftp` feature",
    ))
}
