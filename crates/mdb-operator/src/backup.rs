//! Backup status driving loop
//!
//! One pass advances the remote backup config by at most one legal
//! transition toward the declared mode, then polls (bounded) for the remote
//! side to report it. Multi-step journeys — terminating a running backup
//! must stop it first — intentionally take one reconciliation pass per
//! step, so every intermediate state is separately confirmed.

use std::time::Duration;

use tracing::{debug, info};

use mdb_common::crd::{BackupMode, ResourceType};
use mdb_common::Result;
use mdb_om::backup::desired_status;
use mdb_om::{next_status, BackupStatus, ClusterType, OmConnection};

/// Outcome of one backup reconciliation step
#[derive(Clone, Debug, PartialEq)]
pub enum BackupOutcome {
    /// The matching record reports the status the declared mode asks for
    InSync(BackupStatus),
    /// More passes are needed; requeue shortly
    Pending {
        /// Why the pass could not finish (provisioning lag, intermediate
        /// transition, convergence wait exhausted)
        message: String,
        /// Last status observed for the matching record, if any
        observed: Option<BackupStatus>,
    },
}

/// Bounded polling parameters for backup status confirmation
#[derive(Clone, Copy, Debug)]
pub struct BackupPollOpts {
    /// Maximum number of status reads per pass
    pub attempts: u32,
    /// Fixed delay between reads
    pub interval: Duration,
}

impl Default for BackupPollOpts {
    fn default() -> Self {
        BackupPollOpts {
            attempts: 10,
            interval: Duration::from_secs(3),
        }
    }
}

/// Whether this backup config record is the one the resource owns.
///
/// A sharded cluster is monitored as several records — one per shard, one
/// for the config server, and one umbrella record for the cluster as a
/// whole. Only the umbrella record accepts status changes; submitting to a
/// shard record is rejected remotely. Replica sets match their single
/// record. Standalones are never backed up.
fn record_matches(resource_name: &str, resource_type: ResourceType, cluster_name: &str, cluster_type: ClusterType) -> bool {
    if cluster_name != resource_name {
        return false;
    }
    match resource_type {
        ResourceType::ReplicaSet => cluster_type == ClusterType::ReplicaSet,
        ResourceType::ShardedCluster => cluster_type == ClusterType::ShardedReplicaSet,
        ResourceType::Standalone => false,
    }
}

/// Drive the resource's backup config one legal step toward the declared mode.
///
/// Mutates at most one record per pass. Returns Pending when the remote
/// side has not provisioned configs yet, when an intermediate transition was
/// submitted, or when the poll budget ran out before the new status was
/// observed.
pub async fn ensure_backup_status(
    conn: &dyn OmConnection,
    resource_name: &str,
    resource_type: ResourceType,
    mode: BackupMode,
    poll: BackupPollOpts,
) -> Result<BackupOutcome> {
    let configs = conn.read_backup_configs().await?;
    if configs.is_empty() {
        // configs are provisioned asynchronously after first registration
        return Ok(BackupOutcome::Pending {
            message: "waiting for backup configs to be provisioned".to_string(),
            observed: None,
        });
    }

    let desired = desired_status(mode);

    for config in configs {
        let cluster = conn.read_host_cluster(&config.cluster_id).await?;
        if !record_matches(resource_name, resource_type, &cluster.cluster_name, cluster.type_name) {
            continue;
        }

        let next = next_status(desired, config.status);
        let intermediate = next != desired;

        if next == config.status {
            // re-sending an already-achieved status is rejected remotely
            debug!(status = ?next, "Backup config already at the computed status");
            if intermediate {
                return Ok(BackupOutcome::Pending {
                    message: format!("backup at intermediate status {:?}, continuing next pass", next),
                    observed: Some(config.status),
                });
            }
            return Ok(BackupOutcome::InSync(config.status));
        }

        if next == BackupStatus::Stopped && config.status == BackupStatus::Inactive {
            // stopping a backup that never started is rejected remotely
            debug!("Backup was never started; nothing to stop");
            return Ok(BackupOutcome::InSync(config.status));
        }

        let updated = conn.update_backup_status(&config.cluster_id, next).await?;
        info!(cluster_id = %updated.cluster_id, status = ?next, "Submitted backup status");

        let mut observed = updated.status;
        for _ in 0..poll.attempts {
            if observed == next {
                break;
            }
            tokio::time::sleep(poll.interval).await;
            observed = conn.read_backup_config(&config.cluster_id).await?.status;
        }

        if observed != next {
            return Ok(BackupOutcome::Pending {
                message: format!("backup config has not reached {:?} yet", next),
                observed: Some(observed),
            });
        }

        if intermediate {
            return Ok(BackupOutcome::Pending {
                message: format!("backup reached intermediate status {:?}, continuing next pass", next),
                observed: Some(observed),
            });
        }
        return Ok(BackupOutcome::InSync(observed));
    }

    // the matching record may not be registered yet
    Ok(BackupOutcome::Pending {
        message: format!("no backup config found for {}", resource_name),
        observed: None,
    })
}
