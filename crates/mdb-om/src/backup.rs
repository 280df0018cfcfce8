//! Backup config records and their legal status transitions
//!
//! The Automation Controller provisions one backup config per monitored
//! deployment component, keyed by an opaque cluster id it assigns. Status
//! transitions are restricted on the remote side; [`next_status`] encodes the
//! two intermediate steps the API requires so the operator never submits an
//! illegal transition.

use serde::{Deserialize, Serialize};

use mdb_common::crd::BackupMode;

/// Status of a backup config as reported by the Automation Controller
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    /// Backup has never been started, or terminate finished cleanup
    #[default]
    Inactive,
    /// Continuous backup is running
    Started,
    /// Backup is stopped; snapshots are retained
    Stopped,
    /// Backup is shutting down and deleting snapshot data
    Terminating,
}

/// One backup config record on the remote side
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    /// Opaque identity assigned by the Automation Controller
    pub cluster_id: String,

    /// Project the monitored deployment belongs to
    #[serde(default)]
    pub project_id: String,

    /// Current status
    #[serde(default)]
    pub status: BackupStatus,
}

/// Type of the monitored host cluster a backup config refers to
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterType {
    /// A plain replica set, or one shard of a sharded cluster
    ReplicaSet,
    /// The umbrella record for a sharded cluster as a whole
    ShardedReplicaSet,
    /// The config server replica set of a sharded cluster
    ConfigServerReplicaSet,
}

/// Identity of the monitored cluster behind a backup config
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostCluster {
    /// Deployment name as registered by the agents
    pub cluster_name: String,

    /// Cluster type, distinguishing shard records from the umbrella record
    pub type_name: ClusterType,
}

impl BackupStatus {
    /// Wire-format name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Inactive => "INACTIVE",
            BackupStatus::Started => "STARTED",
            BackupStatus::Stopped => "STOPPED",
            BackupStatus::Terminating => "TERMINATING",
        }
    }
}

/// Map the declared backup mode to the remote status it asks for
pub fn desired_status(mode: BackupMode) -> BackupStatus {
    match mode {
        BackupMode::Enabled => BackupStatus::Started,
        BackupMode::Disabled => BackupStatus::Stopped,
        BackupMode::Terminated => BackupStatus::Terminating,
    }
}

/// Compute the status to submit this pass, given where the record currently is.
///
/// Two transitions are not accepted directly by the remote API:
/// Started -> Terminating must stop first, and Terminating -> Stopped can
/// only come back through Started. Everything else submits the desired
/// status unchanged; reaching the final state across an intermediate step
/// takes one reconciliation pass per step.
pub fn next_status(desired: BackupStatus, current: BackupStatus) -> BackupStatus {
    match (desired, current) {
        (BackupStatus::Terminating, BackupStatus::Started) => BackupStatus::Stopped,
        (BackupStatus::Stopped, BackupStatus::Terminating) => BackupStatus::Started,
        (desired, _) => desired,
    }
}
