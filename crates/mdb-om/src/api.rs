//! Connection trait and convergence helpers
//!
//! [`OmConnection`] abstracts the Automation Controller API surface the
//! reconciliation engine needs. Production uses the HTTP client in
//! [`crate::client`]; tests inject [`MockOmConnection`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

use mdb_common::{Error, Result};

use crate::backup::{BackupConfig, BackupStatus, HostCluster};
use crate::deployment::{AutomationStatus, Deployment};

/// Automation Controller API surface used by the reconciliation engine
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait OmConnection: Send + Sync {
    /// Read the current deployment config
    async fn read_deployment(&self) -> Result<Deployment>;

    /// Replace the deployment config; agents start converging to it
    async fn update_deployment(&self, deployment: Deployment) -> Result<()>;

    /// Read the automation status (goal version and per-process progress)
    async fn read_automation_status(&self) -> Result<AutomationStatus>;

    /// Read all backup configs visible in the project
    async fn read_backup_configs(&self) -> Result<Vec<BackupConfig>>;

    /// Read one backup config by its cluster id
    async fn read_backup_config(&self, cluster_id: &str) -> Result<BackupConfig>;

    /// Submit a new status for one backup config
    async fn update_backup_status(&self, cluster_id: &str, status: BackupStatus) -> Result<BackupConfig>;

    /// Read the monitored host cluster a backup config refers to
    async fn read_host_cluster(&self, cluster_id: &str) -> Result<HostCluster>;
}

/// Read-modify-write over the deployment config.
///
/// The mutator may fail independently of transport errors; its failure aborts
/// the update without pushing anything.
pub async fn read_update_deployment<F>(conn: &dyn OmConnection, mutate: F) -> Result<()>
where
    F: FnOnce(&mut Deployment) -> Result<()>,
{
    let mut deployment = conn.read_deployment().await?;
    mutate(&mut deployment)?;
    conn.update_deployment(deployment).await
}

/// Bounded polling parameters for convergence waits
#[derive(Clone, Copy, Debug)]
pub struct WaitOpts {
    /// Maximum number of status reads before giving up
    pub attempts: u32,
    /// Fixed delay between reads
    pub interval: Duration,
}

impl Default for WaitOpts {
    fn default() -> Self {
        WaitOpts {
            attempts: 20,
            interval: Duration::from_secs(3),
        }
    }
}

/// Block until every host has applied the current goal config version.
///
/// Returns `Error::Timeout` when the attempt budget is exhausted; callers
/// surface that as a pending pass, not a terminal failure.
pub async fn wait_for_goal_state(
    conn: &dyn OmConnection,
    hosts: &[String],
    opts: WaitOpts,
) -> Result<()> {
    if hosts.is_empty() {
        return Ok(());
    }

    let mut lagging = hosts.to_vec();
    for attempt in 0..opts.attempts {
        let status = conn.read_automation_status().await?;
        if status.hosts_reached_goal(hosts) {
            debug!(goal_version = status.goal_version, "All hosts reached goal state");
            return Ok(());
        }
        lagging = status.lagging_hosts(hosts);
        debug!(
            attempt,
            goal_version = status.goal_version,
            lagging = ?lagging,
            "Hosts have not reached goal state yet"
        );
        tokio::time::sleep(opts.interval).await;
    }

    Err(Error::timeout(
        "goal state",
        format!("hosts not converged after {} attempts: {}", opts.attempts, lagging.join(", ")),
    ))
}
