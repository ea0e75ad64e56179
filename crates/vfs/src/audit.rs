//! File transfer audit records.
//!
//! Every upload and download produces one [`FtpLog`]. Sinks are write-only
//! and fire-and-forget: recording must never block or fail the transfer
//! itself, so a sink that cannot take a record drops it with a warning.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Organization id stamped on records of the default organization.
pub const DEFAULT_ORG_ID: &str = "00000000-0000-0000-0000-000000000002";

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Client to target.
    Upload,
    /// Target to client.
    Download,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Upload => write!(f, "upload"),
            Operation::Download => write!(f, "download"),
        }
    }
}

/// One file transfer audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtpLog {
    pub user: String,
    pub hostname: String,
    pub org_id: String,
    pub system_user: String,
    pub remote_addr: String,
    pub operate: Operation,
    pub path: String,
    pub date_start: DateTime<Utc>,
    pub is_success: bool,
}

/// Identity fields shared by all records of one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditContext {
    /// Gateway user.
    pub user: String,
    /// Display name of the target.
    pub hostname: String,
    /// Account used on the target.
    pub system_user: String,
    /// Address the user connected from.
    pub remote_addr: String,
}

impl AuditContext {
    /// Build a record for `operate` on `path`, started now.
    pub fn record(&self, operate: Operation, path: &str, is_success: bool) -> FtpLog {
        FtpLog {
            user: self.user.clone(),
            hostname: self.hostname.clone(),
            org_id: DEFAULT_ORG_ID.to_string(),
            system_user: self.system_user.clone(),
            remote_addr: self.remote_addr.clone(),
            operate,
            path: path.to_string(),
            date_start: Utc::now(),
            is_success,
        }
    }
}

/// Destination of audit records.
pub trait AuditSink: Send + Sync {
    /// Hand over a record. Must not block.
    fn record(&self, entry: FtpLog);
}

/// Sink feeding a bounded channel drained by a writer task.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<FtpLog>,
}

impl ChannelAuditSink {
    /// Create a sink and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FtpLog>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, entry: FtpLog) {
        if let Err(e) = self.tx.try_send(entry) {
            let reason = match &e {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "channel closed",
            };
            let entry = e.into_inner();
            warn!(
                operate = %entry.operate,
                path = %entry.path,
                reason,
                "Dropping audit record"
            );
        }
    }
}

/// Sink that only logs records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: FtpLog) {
        info!(
            user = %entry.user,
            hostname = %entry.hostname,
            operate = %entry.operate,
            path = %entry.path,
            success = entry.is_success,
            "File transfer"
        );
    }
}
