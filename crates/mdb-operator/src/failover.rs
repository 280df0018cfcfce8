//! Cluster failover: health checks, member redistribution, failover annotations
//!
//! When a member cluster stops responding to health checks, its members are
//! redistributed across the remaining clusters and the resulting placement
//! is recorded as an override annotation on the resource. The reconciler
//! consumes the override in place of the declared cluster spec list until
//! the failure is resolved.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

use mdb_common::crd::{ClusterSpecItem, MongoDbDeployment};
use mdb_common::{annotations, Result, CLUSTER_SPEC_OVERRIDE_ANNOTATION, FAILED_CLUSTERS_ANNOTATION};

use crate::state::StateWriter;

/// Record of one failed member cluster
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedCluster {
    /// Name of the cluster that failed its health checks
    pub cluster_name: String,

    /// Members it was hosting when it failed
    pub members: i32,
}

/// Evenly redistribute a failed cluster's members across the remaining ones.
///
/// The failed entry is removed and its member count is handed out one unit
/// at a time, each time to whichever surviving cluster currently has the
/// fewest members (ties broken by input order). The total member count is
/// conserved: the validated deployment keeps its size.
pub fn redistribute(mut clusters: Vec<ClusterSpecItem>, failed_cluster: &str) -> Vec<ClusterSpecItem> {
    let mut members_to_fail_over = 0;
    if let Some(position) = clusters.iter().position(|c| c.cluster_name == failed_cluster) {
        members_to_fail_over = clusters.remove(position).members;
    }

    while members_to_fail_over > 0 && !clusters.is_empty() {
        // first minimum wins, so ties resolve in input order
        let mut min_position = 0;
        for (i, c) in clusters.iter().enumerate() {
            if c.members < clusters[min_position].members {
                min_position = i;
            }
        }
        clusters[min_position].members += 1;
        members_to_fail_over -= 1;
    }

    clusters
}

/// The cluster spec list the reconciler should act on: the failover override
/// when present, the declared list otherwise.
pub fn effective_cluster_spec_list(mdb: &MongoDbDeployment) -> Result<Vec<ClusterSpecItem>> {
    let override_list: Option<Vec<ClusterSpecItem>> =
        annotations::get_json(&mdb.metadata, CLUSTER_SPEC_OVERRIDE_ANNOTATION)?;
    Ok(override_list.unwrap_or_else(|| mdb.spec.cluster_spec_list.clone()))
}

/// Failed clusters recorded on the resource so far
pub fn failed_clusters(mdb: &MongoDbDeployment) -> Result<Vec<FailedCluster>> {
    Ok(annotations::get_json(&mdb.metadata, FAILED_CLUSTERS_ANNOTATION)?.unwrap_or_default())
}

/// Compute the annotations recording a cluster failure: the redistributed
/// placement override plus the appended failed-cluster record. Idempotent
/// per cluster name — a cluster already recorded as failed adds nothing.
pub fn failover_annotations(
    mdb: &MongoDbDeployment,
    failed_cluster: &str,
) -> Result<Option<BTreeMap<String, String>>> {
    let mut failed = failed_clusters(mdb)?;
    if failed.iter().any(|f| f.cluster_name == failed_cluster) {
        return Ok(None);
    }

    let current = effective_cluster_spec_list(mdb)?;
    let members = current
        .iter()
        .find(|c| c.cluster_name == failed_cluster)
        .map(|c| c.members)
        .unwrap_or(0);
    failed.push(FailedCluster {
        cluster_name: failed_cluster.to_string(),
        members,
    });

    let redistributed = redistribute(current, failed_cluster);
    info!(
        cluster = %failed_cluster,
        members,
        placement = ?redistributed,
        "Redistributing members away from failed cluster"
    );

    let mut result = BTreeMap::new();
    for entry in [
        annotations::encode_json(CLUSTER_SPEC_OVERRIDE_ANNOTATION, &redistributed)?,
        annotations::encode_json(FAILED_CLUSTERS_ANNOTATION, &failed)?,
    ] {
        result.insert(entry.0, entry.1);
    }
    Ok(Some(result))
}

/// Reachability probe for member clusters
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait ClusterHealthCheck: Send + Sync {
    /// Whether the named member cluster currently answers health checks
    async fn is_reachable(&self, cluster_name: &str) -> bool;
}

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// [`ClusterHealthCheck`] probing one HTTP health endpoint per member
/// cluster.
///
/// Clusters without a configured endpoint are treated as reachable; a
/// cluster that cannot be probed must never be failed over.
pub struct HttpClusterHealthCheck {
    endpoints: BTreeMap<String, String>,
    http: reqwest::Client,
}

impl HttpClusterHealthCheck {
    /// Create a checker from a cluster-name-to-health-URL map
    #[must_use]
    pub fn new(endpoints: BTreeMap<String, String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HEALTH_CHECK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        HttpClusterHealthCheck { endpoints, http }
    }
}

#[async_trait]
impl ClusterHealthCheck for HttpClusterHealthCheck {
    async fn is_reachable(&self, cluster_name: &str) -> bool {
        let url = match self.endpoints.get(cluster_name) {
            Some(url) => url,
            None => {
                debug!(cluster = %cluster_name, "No health endpoint configured; assuming reachable");
                return true;
            }
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(cluster = %cluster_name, error = %e, "Health check request failed");
                false
            }
        }
    }
}

/// Probe the member clusters the resource is currently placed on and record
/// a failover for the first one that fails its health check.
///
/// At most one failover is recorded per call; the redistributed placement
/// is consumed on the next pass through [`effective_cluster_spec_list`].
/// Clusters already failed over are no longer in the effective list and are
/// not probed again. Returns whether anything was written.
pub async fn check_and_record_failover(
    mdb: &MongoDbDeployment,
    health: &dyn ClusterHealthCheck,
    writer: &dyn StateWriter,
) -> Result<bool> {
    if !mdb.spec.is_multi_cluster() {
        return Ok(false);
    }

    let name = mdb.name_any();
    let namespace = mdb.namespace().unwrap_or_else(|| "default".to_string());
    for cluster in effective_cluster_spec_list(mdb)? {
        if health.is_reachable(&cluster.cluster_name).await {
            continue;
        }
        if let Some(annotations) = failover_annotations(mdb, &cluster.cluster_name)? {
            warn!(
                resource = %name,
                cluster = %cluster.cluster_name,
                "Member cluster is unreachable; recording failover"
            );
            writer.apply_annotations(&namespace, &name, annotations).await?;
            return Ok(true);
        }
    }
    Ok(false)
}
