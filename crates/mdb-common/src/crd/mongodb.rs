//! MongoDbDeployment Custom Resource Definition
//!
//! A MongoDbDeployment declares a MongoDB topology (standalone, replica set,
//! sharded cluster) together with its security and backup configuration. The
//! operator drives both the StatefulSets backing the deployment and the
//! Automation Controller's deployment config toward this declaration.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Deployment component kind
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ResourceType {
    /// A single mongod process
    Standalone,
    /// A replicated set of mongod processes
    #[default]
    ReplicaSet,
    /// A sharded cluster (mongos, config servers, shards)
    ShardedCluster,
}

/// Whether the deployment spans one Kubernetes cluster or several
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Topology {
    /// All members run in the cluster the operator runs in
    #[default]
    SingleCluster,
    /// Members are spread across the clusters named in `clusterSpecList`
    MultiCluster,
}

/// Desired member placement for one member cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpecItem {
    /// Name of the member cluster as known to the operator
    pub cluster_name: String,

    /// Number of replica set members to run in this cluster
    pub members: i32,
}

/// TLS configuration for deployment members
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// Whether members require TLS connections
    #[serde(default)]
    pub enabled: bool,

    /// Name of a ConfigMap holding a custom CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

/// Agent authentication settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentAuthSpec {
    /// Authentication mode the automation agents use (e.g., "X509", "SCRAM")
    pub mode: String,
}

/// Deployment authentication settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationSpec {
    /// Whether authentication is enabled for the deployment
    #[serde(default)]
    pub enabled: bool,

    /// Enabled authentication modes, in order of preference
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modes: Vec<String>,

    /// Agent-specific authentication override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentAuthSpec>,
}

/// Security configuration for the deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    /// TLS settings
    #[serde(default)]
    pub tls: TlsSpec,

    /// Authentication settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationSpec>,
}

impl SecuritySpec {
    /// The agent authentication mode this spec asks for, falling back to the
    /// mode currently configured in the project when the spec is silent.
    pub fn effective_agent_auth_mode(&self, current: Option<&str>) -> Option<String> {
        let auth = match &self.authentication {
            Some(auth) if auth.enabled => auth,
            _ => return current.map(str::to_string),
        };
        if let Some(agents) = &auth.agents {
            return Some(agents.mode.clone());
        }
        auth.modes
            .first()
            .cloned()
            .or_else(|| current.map(str::to_string))
    }
}

/// Desired backup state for the deployment
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// Continuous backup is running
    #[default]
    Enabled,
    /// Backup is stopped but snapshots are retained
    Disabled,
    /// Backup is terminated and snapshot data deleted
    Terminated,
}

/// Backup configuration for the deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Desired backup mode
    #[serde(default)]
    pub mode: BackupMode,
}

/// Spec for the MongoDbDeployment custom resource
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "mdb.io",
    version = "v1",
    kind = "MongoDbDeployment",
    namespaced,
    status = "MongoDbDeploymentStatus",
    shortname = "mdb",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MongoDbDeploymentSpec {
    /// MongoDB server version (e.g., "7.0.5")
    pub version: String,

    /// Deployment component kind
    #[serde(default, rename = "type")]
    pub resource_type: ResourceType,

    /// Single- or multi-cluster topology
    #[serde(default)]
    pub topology: Topology,

    /// Total member count (single-cluster topologies)
    #[serde(default)]
    pub members: i32,

    /// Per-cluster member placement (multi-cluster topologies)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_spec_list: Vec<ClusterSpecItem>,

    /// Security configuration
    #[serde(default)]
    pub security: SecuritySpec,

    /// Backup configuration; absent means backup is not managed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupSpec>,
}

impl MongoDbDeploymentSpec {
    /// Whether this deployment spans multiple member clusters
    pub fn is_multi_cluster(&self) -> bool {
        self.topology == Topology::MultiCluster
    }

    /// Whether the MongoDB version differs from the last achieved spec.
    ///
    /// A missing last spec means first deployment, which is not a version
    /// change.
    pub fn is_changing_version(&self, last: Option<&MongoDbDeploymentSpec>) -> bool {
        match last {
            Some(last) => !last.version.is_empty() && last.version != self.version,
            None => false,
        }
    }

    /// Total desired member count across all clusters
    pub fn total_members(&self) -> i32 {
        if self.is_multi_cluster() {
            self.cluster_spec_list.iter().map(|c| c.members).sum()
        } else {
            self.members
        }
    }

    /// Semantic validation beyond what the CRD schema enforces
    pub fn validate(&self, resource_name: &str) -> Result<()> {
        if self.is_multi_cluster() && self.cluster_spec_list.is_empty() {
            return Err(Error::validation(
                resource_name,
                "clusterSpecList must be non-empty for MultiCluster topology",
            ));
        }
        if !self.is_multi_cluster() && self.members < 0 {
            return Err(Error::validation(resource_name, "members must be non-negative"));
        }
        if self.cluster_spec_list.iter().any(|c| c.members < 0) {
            return Err(Error::validation(
                resource_name,
                "clusterSpecList members must be non-negative",
            ));
        }
        if self.resource_type == ResourceType::Standalone && self.total_members() > 1 {
            return Err(Error::validation(
                resource_name,
                "a Standalone deployment has exactly one member",
            ));
        }
        Ok(())
    }
}

/// Observed phase of the deployment
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeploymentPhase {
    /// Reconciliation has not completed yet, or is waiting on the remote system
    #[default]
    Pending,
    /// The deployment matches its declared spec
    Running,
    /// The last reconciliation pass failed
    Failed,
}

/// Status for the MongoDbDeployment custom resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MongoDbDeploymentStatus {
    /// Current phase
    #[serde(default)]
    pub phase: DeploymentPhase,

    /// Last observed live member count.
    ///
    /// Also serves as the migration source for resources created before
    /// structured per-cluster state existed.
    #[serde(default)]
    pub members: i32,

    /// Human-readable detail for Pending/Failed phases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last observed backup status reported by the Automation Controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_status: Option<String>,
}
