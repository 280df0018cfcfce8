//! Durable reconciliation state store
//!
//! The operator persists what was last successfully achieved as three JSON
//! documents in the resource's annotations: the full last-achieved spec, a
//! stable cluster-name-to-index mapping, and the last applied member count
//! per cluster. The three are written together in a single metadata patch,
//! and only after a pass fully succeeds; a failed pass always retries
//! against the previous known-good baseline.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

use mdb_common::crd::{MongoDbDeployment, MongoDbDeploymentSpec};
use mdb_common::{
    annotations, Result, CLUSTER_MAPPING_ANNOTATION, LAST_ACHIEVED_SPEC_ANNOTATION,
    LAST_APPLIED_MEMBER_SPEC_ANNOTATION, LEGACY_CENTRAL_CLUSTER_NAME,
};

/// State persisted between reconciliations of one resource
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeploymentState {
    /// What the spec looked like when we last reached Running
    pub last_achieved_spec: Option<MongoDbDeploymentSpec>,

    /// Stable index per member cluster, used for StatefulSet naming.
    /// Indexes stick around forever, even when clusters come and go.
    pub cluster_mapping: BTreeMap<String, i32>,

    /// Member count per cluster from the last successful reconciliation.
    /// Compared against the desired counts to detect scale-downs.
    pub last_applied_member_spec: BTreeMap<String, i32>,
}

impl DeploymentState {
    /// Return the stable index for a member cluster, assigning the smallest
    /// unused non-negative index on first sight.
    ///
    /// An index, once assigned, is never reused for a different cluster name
    /// within the lifetime of the resource; downstream StatefulSet naming
    /// depends on that stability.
    pub fn assign_cluster_index(&mut self, cluster_name: &str) -> i32 {
        if let Some(index) = self.cluster_mapping.get(cluster_name) {
            return *index;
        }
        let mut candidate = 0;
        while self.cluster_mapping.values().any(|v| *v == candidate) {
            candidate += 1;
        }
        self.cluster_mapping.insert(cluster_name.to_string(), candidate);
        candidate
    }

    /// Assign indexes for every named cluster, in the given order
    pub fn assign_cluster_indexes(&mut self, cluster_names: &[String]) {
        for name in cluster_names {
            self.assign_cluster_index(name);
        }
    }

    /// Last applied member count for a cluster; zero when never applied
    pub fn last_applied_members(&self, cluster_name: &str) -> i32 {
        self.last_applied_member_spec.get(cluster_name).copied().unwrap_or(0)
    }
}

/// Read the persisted state off the resource's annotations.
///
/// Malformed JSON in any of the three annotations is a hard error; the pass
/// aborts before mutating anything. A missing annotation is the signal to
/// default or migrate instead:
///
/// Single-cluster resources created before structured state existed get a
/// one-time migration: the implicit cluster's member count is synthesized
/// from the last observed live member count in `status.members`.
/// Multi-cluster resources never receive this fallback — they have no legacy
/// single-number equivalent, so absent structured state means "never
/// successfully reconciled".
pub fn read_state(mdb: &MongoDbDeployment) -> Result<DeploymentState> {
    let last_achieved_spec: Option<MongoDbDeploymentSpec> =
        annotations::get_json(&mdb.metadata, LAST_ACHIEVED_SPEC_ANNOTATION)?;
    let cluster_mapping: BTreeMap<String, i32> =
        annotations::get_json(&mdb.metadata, CLUSTER_MAPPING_ANNOTATION)?.unwrap_or_default();
    let mut last_applied_member_spec: BTreeMap<String, i32> =
        annotations::get_json(&mdb.metadata, LAST_APPLIED_MEMBER_SPEC_ANNOTATION)?.unwrap_or_default();

    if last_applied_member_spec.is_empty() && !mdb.spec.is_multi_cluster() {
        let observed = mdb.status.as_ref().map(|s| s.members).unwrap_or(0);
        last_applied_member_spec.insert(LEGACY_CENTRAL_CLUSTER_NAME.to_string(), observed);
        debug!(
            members = observed,
            "Initialized last applied member spec from observed members (legacy migration)"
        );
    }

    Ok(DeploymentState {
        last_achieved_spec,
        cluster_mapping,
        last_applied_member_spec,
    })
}

/// Encode the state and the newly-achieved spec as the annotation set to
/// persist. Pure; the derived status fields never enter the annotation (only
/// the spec is serialized, so transient observation state cannot leak into
/// the baseline).
pub fn state_annotations(
    state: &DeploymentState,
    achieved_spec: &MongoDbDeploymentSpec,
) -> Result<BTreeMap<String, String>> {
    let mut result = BTreeMap::new();
    for entry in [
        annotations::encode_json(LAST_ACHIEVED_SPEC_ANNOTATION, achieved_spec)?,
        annotations::encode_json(CLUSTER_MAPPING_ANNOTATION, &state.cluster_mapping)?,
        annotations::encode_json(LAST_APPLIED_MEMBER_SPEC_ANNOTATION, &state.last_applied_member_spec)?,
    ] {
        result.insert(entry.0, entry.1);
    }
    Ok(result)
}

/// Sink for annotation patches against the resource's metadata.
///
/// The production implementation goes through the Kubernetes API; tests
/// capture the patch instead.
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait StateWriter: Send + Sync {
    /// Merge the given annotations into the resource's metadata in a single
    /// atomic patch
    async fn apply_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;
}

/// [`StateWriter`] backed by the Kubernetes API
pub struct KubeStateWriter {
    client: Client,
}

impl KubeStateWriter {
    /// Create a writer using the given client
    pub fn new(client: Client) -> Self {
        KubeStateWriter { client }
    }
}

#[async_trait]
impl StateWriter for KubeStateWriter {
    async fn apply_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<MongoDbDeployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "metadata": { "annotations": annotations } });
        api.patch_metadata(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Persist the state after a fully successful pass.
///
/// This is the single write of a pass and must be its last operation;
/// nothing may run after it, and it must never be called on a partial or
/// failed pass.
pub async fn write_state(
    writer: &dyn StateWriter,
    namespace: &str,
    name: &str,
    state: &DeploymentState,
    achieved_spec: &MongoDbDeploymentSpec,
) -> Result<()> {
    let annotations = state_annotations(state, achieved_spec)?;
    writer.apply_annotations(namespace, name, annotations).await?;
    debug!(
        resource = %name,
        cluster_mapping = ?state.cluster_mapping,
        last_applied_member_spec = ?state.last_applied_member_spec,
        "Wrote reconciliation state"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mdb_common::crd::{ClusterSpecItem, MongoDbDeploymentStatus, Topology};

    fn resource(spec: MongoDbDeploymentSpec, status_members: i32) -> MongoDbDeployment {
        let mut mdb = MongoDbDeployment::new("my-rs", spec);
        mdb.metadata = ObjectMeta {
            name: Some("my-rs".to_string()),
            namespace: Some("mongodb".to_string()),
            ..Default::default()
        };
        mdb.status = Some(MongoDbDeploymentStatus {
            members: status_members,
            ..Default::default()
        });
        mdb
    }

    fn single_cluster_spec(members: i32) -> MongoDbDeploymentSpec {
        MongoDbDeploymentSpec {
            version: "7.0.5".to_string(),
            members,
            ..Default::default()
        }
    }

    fn multi_cluster_spec() -> MongoDbDeploymentSpec {
        MongoDbDeploymentSpec {
            version: "7.0.5".to_string(),
            topology: Topology::MultiCluster,
            cluster_spec_list: vec![ClusterSpecItem {
                cluster_name: "cluster-a".to_string(),
                members: 3,
            }],
            ..Default::default()
        }
    }

    fn apply(mdb: &mut MongoDbDeployment, annotations: BTreeMap<String, String>) {
        mdb.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(annotations);
    }

    #[test]
    fn test_read_after_write_returns_equal_state() {
        let mut mdb = resource(single_cluster_spec(3), 3);
        let mut state = DeploymentState::default();
        state.cluster_mapping.insert("cluster-a".to_string(), 0);
        state.last_applied_member_spec.insert("cluster-a".to_string(), 3);
        state.last_achieved_spec = Some(mdb.spec.clone());

        let annotations = state_annotations(&state, &mdb.spec).unwrap();
        apply(&mut mdb, annotations);

        let read = read_state(&mdb).unwrap();
        assert_eq!(read, state);
    }

    #[test]
    fn test_single_cluster_migration_from_observed_members() {
        let mdb = resource(single_cluster_spec(5), 5);
        let state = read_state(&mdb).unwrap();
        assert_eq!(
            state.last_applied_member_spec,
            BTreeMap::from([(LEGACY_CENTRAL_CLUSTER_NAME.to_string(), 5)])
        );
        assert!(state.last_achieved_spec.is_none());
    }

    #[test]
    fn test_multi_cluster_never_migrates() {
        let mdb = resource(multi_cluster_spec(), 5);
        let state = read_state(&mdb).unwrap();
        assert!(state.last_applied_member_spec.is_empty());
    }

    #[test]
    fn test_malformed_annotation_aborts_read() {
        let mut mdb = resource(single_cluster_spec(3), 3);
        apply(
            &mut mdb,
            BTreeMap::from([(CLUSTER_MAPPING_ANNOTATION.to_string(), "{oops".to_string())]),
        );
        assert!(read_state(&mdb).is_err());
    }

    #[test]
    fn test_cluster_index_stability() {
        let mut state = DeploymentState::default();
        assert_eq!(state.assign_cluster_index("cluster-a"), 0);
        assert_eq!(state.assign_cluster_index("cluster-b"), 1);
        assert_eq!(state.assign_cluster_index("cluster-a"), 0);

        // removal never frees an index for a different name ...
        state.cluster_mapping.remove("cluster-a");
        state.cluster_mapping.insert("cluster-a".to_string(), 0);
        // ... and a new cluster takes the smallest unused index
        assert_eq!(state.assign_cluster_index("cluster-c"), 2);
    }

    #[test]
    fn test_gap_in_mapping_is_filled_by_new_cluster() {
        let mut state = DeploymentState::default();
        state.cluster_mapping.insert("cluster-a".to_string(), 0);
        state.cluster_mapping.insert("cluster-c".to_string(), 2);
        assert_eq!(state.assign_cluster_index("cluster-d"), 1);
    }

    #[tokio::test]
    async fn test_write_state_issues_single_patch_with_all_documents() {
        let state = DeploymentState {
            last_achieved_spec: None,
            cluster_mapping: BTreeMap::from([("cluster-a".to_string(), 0)]),
            last_applied_member_spec: BTreeMap::from([("cluster-a".to_string(), 3)]),
        };
        let spec = single_cluster_spec(3);

        let mut writer = MockStateWriter::new();
        writer
            .expect_apply_annotations()
            .times(1)
            .withf(|ns, name, annotations| {
                ns == "mongodb"
                    && name == "my-rs"
                    && annotations.contains_key(LAST_ACHIEVED_SPEC_ANNOTATION)
                    && annotations.contains_key(CLUSTER_MAPPING_ANNOTATION)
                    && annotations.contains_key(LAST_APPLIED_MEMBER_SPEC_ANNOTATION)
            })
            .returning(|_, _, _| Ok(()));

        write_state(&writer, "mongodb", "my-rs", &state, &spec).await.unwrap();
    }
}
