//! Reconciler orchestration for a single pass
//!
//! A pass owns no logic of its own beyond sequencing: read the durable
//! state, decide the safe push order, prepare any scale-down, push in that
//! order, drive backup one step, and — only when everything succeeded —
//! write the new state as the very last operation. Errors and pending
//! results abandon the pass with the baseline untouched, so a retry
//! re-plans against the last known-good configuration.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::ResourceExt;
use tracing::{debug, info};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

use mdb_common::crd::MongoDbDeployment;
use mdb_common::{Result, LEGACY_CENTRAL_CLUSTER_NAME};
use mdb_om::{BackupStatus, OmConnection, WaitOpts};

use crate::backup::{ensure_backup_status, BackupOutcome, BackupPollOpts};
use crate::failover::effective_cluster_spec_list;
use crate::ordering::should_publish_config_first;
use crate::scaledown::prepare_scale_down;
use crate::state::{read_state, write_state, StateWriter};
use crate::{dns, state::DeploymentState};

/// What a pass decided to push, derived fresh each pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassPlan {
    /// Desired replica count per StatefulSet
    pub replicas_by_statefulset: BTreeMap<String, i32>,

    /// Total desired member count of the replica set
    pub total_members: i32,
}

/// The two externally-visible mutations of a pass.
///
/// Building the workload descriptor and the deployment config payloads is
/// mechanical; the engine only decides their order. Production
/// implementations live in [`crate::steps`].
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait DeploymentSteps: Send + Sync {
    /// Push the deployment config to the Automation Controller
    async fn publish_automation_config(&self, mdb: &MongoDbDeployment, plan: &PassPlan) -> Result<()>;

    /// Apply the workload StatefulSet changes to the cluster
    async fn apply_workload(&self, mdb: &MongoDbDeployment, plan: &PassPlan) -> Result<()>;
}

/// Result of a completed pass
#[derive(Clone, Debug, PartialEq)]
pub enum PassOutcome {
    /// Everything applied and the new state was persisted
    Applied {
        /// Backup status observed at the end of the pass, if backup is managed
        backup_status: Option<BackupStatus>,
    },
    /// The pass stopped at a safe point; reschedule a fresh pass shortly
    Pending {
        /// Why the pass could not finish
        message: String,
    },
}

/// Tunables for the blocking waits of a pass
#[derive(Clone, Debug, Default)]
pub struct ReconcileOpts {
    /// Agent authentication mode currently configured in the project
    pub current_agent_auth_mode: Option<String>,

    /// Custom CA reference currently configured in the project
    pub current_ca_config_ref: Option<String>,

    /// Goal-state wait bounds for scale-down preparation
    pub wait: WaitOpts,

    /// Poll bounds for backup status confirmation
    pub backup_poll: BackupPollOpts,
}

/// Per-cluster desired member counts, keyed by cluster name.
///
/// Single-cluster resources use the implicit legacy cluster name.
fn desired_members(
    mdb: &MongoDbDeployment,
    state: &mut DeploymentState,
) -> Result<BTreeMap<String, i32>> {
    if mdb.spec.is_multi_cluster() {
        let clusters = effective_cluster_spec_list(mdb)?;
        let names: Vec<String> = clusters.iter().map(|c| c.cluster_name.clone()).collect();
        state.assign_cluster_indexes(&names);
        Ok(clusters.into_iter().map(|c| (c.cluster_name, c.members)).collect())
    } else {
        Ok(BTreeMap::from([(LEGACY_CENTRAL_CLUSTER_NAME.to_string(), mdb.spec.members)]))
    }
}

fn statefulset_name(resource_name: &str, cluster_index: Option<i32>) -> String {
    match cluster_index {
        Some(index) => format!("{}-{}", resource_name, index),
        None => resource_name.to_string(),
    }
}

/// Members being removed this pass, keyed by replica set name
fn scale_down_members(
    resource_name: &str,
    desired: &BTreeMap<String, i32>,
    state: &DeploymentState,
    multi_cluster: bool,
) -> BTreeMap<String, Vec<String>> {
    let mut removed = Vec::new();
    for (cluster, desired_count) in desired {
        let last_applied = state.last_applied_members(cluster);
        if *desired_count >= last_applied {
            continue;
        }
        let index = if multi_cluster {
            state.cluster_mapping.get(cluster).copied()
        } else {
            None
        };
        removed.extend(dns::member_names(resource_name, index, *desired_count..last_applied));
    }

    let mut result = BTreeMap::new();
    if !removed.is_empty() {
        result.insert(resource_name.to_string(), removed);
    }
    result
}

/// Names of the StatefulSets backing this resource, one per member cluster.
///
/// Derived from the same persisted cluster mapping the pass itself plans
/// against, so callers fetching live workloads look up exactly the
/// StatefulSets the pass will mutate.
pub fn workload_names(mdb: &MongoDbDeployment) -> Result<Vec<String>> {
    let name = mdb.name_any();
    let mut state = read_state(mdb)?;
    let desired = desired_members(mdb, &mut state)?;
    Ok(desired
        .keys()
        .map(|cluster| {
            let index = if mdb.spec.is_multi_cluster() {
                state.cluster_mapping.get(cluster).copied()
            } else {
                None
            };
            statefulset_name(&name, index)
        })
        .collect())
}

/// Run one reconciliation pass.
///
/// `live_workloads` are the currently-deployed StatefulSets backing the
/// resource (one per member cluster, see [`workload_names`]), already
/// fetched by the caller.
pub async fn run_pass(
    mdb: &MongoDbDeployment,
    live_workloads: &[StatefulSet],
    conn: &dyn OmConnection,
    steps: &dyn DeploymentSteps,
    writer: &dyn StateWriter,
    opts: &ReconcileOpts,
) -> Result<PassOutcome> {
    let name = mdb.name_any();
    let namespace = mdb.namespace().unwrap_or_else(|| "default".to_string());

    mdb.spec.validate(&name)?;

    let mut state = read_state(mdb)?;
    let desired = desired_members(mdb, &mut state)?;
    let scale_down = scale_down_members(&name, &desired, &state, mdb.spec.is_multi_cluster());

    let plan = PassPlan {
        replicas_by_statefulset: desired
            .iter()
            .map(|(cluster, count)| {
                let index = if mdb.spec.is_multi_cluster() {
                    state.cluster_mapping.get(cluster).copied()
                } else {
                    None
                };
                (statefulset_name(&name, index), *count)
            })
            .collect(),
        total_members: desired.values().sum(),
    };

    let empty = BTreeMap::new();
    let resource_annotations = mdb.metadata.annotations.as_ref().unwrap_or(&empty);
    // a shrink detected against per-cluster accounting forces config-first
    // even when no live StatefulSet shows it; any single risky live
    // StatefulSet is enough for the whole pass
    let mut config_first = !scale_down.is_empty();
    for sts in live_workloads {
        let desired_replicas = sts
            .metadata
            .name
            .as_deref()
            .and_then(|sts_name| plan.replicas_by_statefulset.get(sts_name))
            .copied()
            .unwrap_or_else(|| mdb.spec.total_members());
        if should_publish_config_first(
            Some(sts),
            desired_replicas,
            &mdb.spec,
            state.last_achieved_spec.as_ref(),
            opts.current_agent_auth_mode.as_deref(),
            opts.current_ca_config_ref.as_deref(),
            resource_annotations,
        ) {
            config_first = true;
        }
    }

    debug!(resource = %name, config_first, scale_down = ?scale_down, "Planned reconciliation pass");

    if config_first {
        prepare_scale_down(conn, &scale_down, opts.wait).await?;
        steps.publish_automation_config(mdb, &plan).await?;
        steps.apply_workload(mdb, &plan).await?;
    } else {
        steps.apply_workload(mdb, &plan).await?;
        steps.publish_automation_config(mdb, &plan).await?;
    }

    let mut backup_status = None;
    if let Some(backup) = &mdb.spec.backup {
        let outcome = ensure_backup_status(
            conn,
            &name,
            mdb.spec.resource_type,
            backup.mode,
            opts.backup_poll,
        )
        .await?;
        match outcome {
            BackupOutcome::InSync(status) => backup_status = Some(status),
            BackupOutcome::Pending { message, .. } => {
                // state stays at the previous baseline; a fresh pass re-plans
                return Ok(PassOutcome::Pending { message });
            }
        }
    }

    state.last_applied_member_spec = desired;
    state.last_achieved_spec = Some(mdb.spec.clone());
    write_state(writer, &namespace, &name, &state, &mdb.spec).await?;

    info!(resource = %name, members = plan.total_members, "Reconciliation pass complete");
    Ok(PassOutcome::Applied { backup_status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::{Container, PodSpec, VolumeMount};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mdb_common::crd::{
        BackupMode, BackupSpec, ClusterSpecItem, MongoDbDeploymentSpec, MongoDbDeploymentStatus,
        Topology,
    };
    use mdb_common::DATABASE_CONTAINER_NAME;
    use mdb_om::MockOmConnection;
    use mockall::Sequence;
    use std::time::Duration;

    use crate::state::MockStateWriter;

    fn resource(members: i32, status_members: i32) -> MongoDbDeployment {
        let mut mdb = MongoDbDeployment::new(
            "my-rs",
            MongoDbDeploymentSpec {
                version: "7.0.5".to_string(),
                members,
                ..Default::default()
            },
        );
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

    fn live_sts(name: &str, replicas: i32) -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn live_sts_with_volume(name: &str, replicas: i32, volume: &str) -> StatefulSet {
        let mut sts = live_sts(name, replicas);
        sts.spec.as_mut().unwrap().template.spec = Some(PodSpec {
            containers: vec![Container {
                name: DATABASE_CONTAINER_NAME.to_string(),
                volume_mounts: Some(vec![VolumeMount {
                    name: volume.to_string(),
                    mount_path: format!("/var/lib/{}", volume),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        });
        sts
    }

    fn quick_opts() -> ReconcileOpts {
        ReconcileOpts {
            wait: WaitOpts { attempts: 2, interval: Duration::from_millis(1) },
            backup_poll: BackupPollOpts { attempts: 2, interval: Duration::from_millis(1) },
            ..Default::default()
        }
    }

    fn converged_status() -> mdb_om::AutomationStatus {
        mdb_om::AutomationStatus {
            goal_version: 1,
            processes: vec![],
        }
    }

    #[tokio::test]
    async fn test_grow_applies_workload_first_and_writes_state() {
        let mdb = resource(5, 3);
        let conn = MockOmConnection::new();

        let mut seq = Sequence::new();
        let mut steps = MockDeploymentSteps::new();
        steps
            .expect_apply_workload()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        steps
            .expect_publish_automation_config()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut writer = MockStateWriter::new();
        writer
            .expect_apply_annotations()
            .times(1)
            .withf(|ns, name, annotations| {
                ns == "mongodb" && name == "my-rs" && annotations.len() == 3
            })
            .returning(|_, _, _| Ok(()));

        let outcome = run_pass(&mdb, &[live_sts("my-rs", 3)], &conn, &steps, &writer, &quick_opts())
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::Applied { backup_status: None });
    }

    #[tokio::test]
    async fn test_shrink_prepares_scale_down_then_config_then_workload() {
        let mdb = resource(3, 5);

        let mut seq = Sequence::new();
        let mut conn = MockOmConnection::new();
        // scale-down preparation: unvote my-rs-3 and my-rs-4, then wait
        conn.expect_read_deployment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(mdb_om::Deployment {
                    version: 1,
                    processes: vec![],
                    replica_sets: vec![mdb_om::ReplicaSet {
                        id: "my-rs".to_string(),
                        members: (0..5)
                            .map(|i| mdb_om::ReplicaSetMember {
                                id: i,
                                host: format!("my-rs-{}", i),
                                votes: 1,
                                priority: 1.0,
                            })
                            .collect(),
                    }],
                })
            });
        conn.expect_update_deployment()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|d| {
                let members = &d.replica_sets[0].members;
                members[3].votes == 0 && members[4].votes == 0 && members[2].votes == 1
            })
            .returning(|_| Ok(()));
        conn.expect_read_automation_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(converged_status()));

        let mut steps = MockDeploymentSteps::new();
        steps
            .expect_publish_automation_config()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        steps
            .expect_apply_workload()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, plan| plan.replicas_by_statefulset.get("my-rs") == Some(&3))
            .returning(|_, _| Ok(()));

        let mut writer = MockStateWriter::new();
        writer
            .expect_apply_annotations()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let outcome = run_pass(&mdb, &[live_sts("my-rs", 5)], &conn, &steps, &writer, &quick_opts())
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::Applied { backup_status: None });
    }

    #[tokio::test]
    async fn test_failed_step_leaves_state_unwritten() {
        let mdb = resource(5, 3);
        let conn = MockOmConnection::new();

        let mut steps = MockDeploymentSteps::new();
        steps.expect_apply_workload().returning(|_, _| Ok(()));
        steps
            .expect_publish_automation_config()
            .returning(|_, _| Err(mdb_common::Error::ops_manager("deployment", "connection reset")));

        let mut writer = MockStateWriter::new();
        writer.expect_apply_annotations().times(0);

        let result = run_pass(&mdb, &[live_sts("my-rs", 3)], &conn, &steps, &writer, &quick_opts()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pending_backup_leaves_state_unwritten() {
        let mut mdb = resource(3, 3);
        mdb.spec.backup = Some(BackupSpec { mode: BackupMode::Enabled });

        let mut conn = MockOmConnection::new();
        conn.expect_read_backup_configs().returning(|| Ok(vec![]));

        let mut steps = MockDeploymentSteps::new();
        steps.expect_apply_workload().returning(|_, _| Ok(()));
        steps.expect_publish_automation_config().returning(|_, _| Ok(()));

        let mut writer = MockStateWriter::new();
        writer.expect_apply_annotations().times(0);

        let outcome = run_pass(&mdb, &[live_sts("my-rs", 3)], &conn, &steps, &writer, &quick_opts())
            .await
            .unwrap();
        assert!(matches!(outcome, PassOutcome::Pending { .. }));
    }

    #[tokio::test]
    async fn test_first_creation_has_no_live_workload_and_no_scale_down() {
        let mdb = resource(3, 0);
        let conn = MockOmConnection::new();

        let mut seq = Sequence::new();
        let mut steps = MockDeploymentSteps::new();
        steps
            .expect_apply_workload()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        steps
            .expect_publish_automation_config()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut writer = MockStateWriter::new();
        writer.expect_apply_annotations().times(1).returning(|_, _, _| Ok(()));

        let outcome = run_pass(&mdb, &[], &conn, &steps, &writer, &quick_opts())
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::Applied { backup_status: None });
    }

    fn multi_resource() -> MongoDbDeployment {
        let mut mdb = MongoDbDeployment::new(
            "my-rs",
            MongoDbDeploymentSpec {
                version: "7.0.5".to_string(),
                topology: Topology::MultiCluster,
                cluster_spec_list: vec![
                    ClusterSpecItem { cluster_name: "cluster-a".to_string(), members: 2 },
                    ClusterSpecItem { cluster_name: "cluster-b".to_string(), members: 1 },
                ],
                ..Default::default()
            },
        );
        mdb.metadata = ObjectMeta {
            name: Some("my-rs".to_string()),
            namespace: Some("mongodb".to_string()),
            ..Default::default()
        };
        mdb
    }

    #[test]
    fn test_workload_names_follow_cluster_indexes() {
        assert_eq!(workload_names(&multi_resource()).unwrap(), vec!["my-rs-0", "my-rs-1"]);
        assert_eq!(workload_names(&resource(3, 3)).unwrap(), vec!["my-rs"]);
    }

    #[tokio::test]
    async fn test_multi_cluster_steady_state_keeps_workload_first() {
        let mdb = multi_resource();
        let conn = MockOmConnection::new();

        let mut seq = Sequence::new();
        let mut steps = MockDeploymentSteps::new();
        steps
            .expect_apply_workload()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, plan| {
                plan.replicas_by_statefulset
                    == BTreeMap::from([("my-rs-0".to_string(), 2), ("my-rs-1".to_string(), 1)])
            })
            .returning(|_, _| Ok(()));
        steps
            .expect_publish_automation_config()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut writer = MockStateWriter::new();
        writer.expect_apply_annotations().times(1).returning(|_, _, _| Ok(()));

        let live = [live_sts("my-rs-0", 2), live_sts("my-rs-1", 1)];
        let outcome = run_pass(&mdb, &live, &conn, &steps, &writer, &quick_opts())
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::Applied { backup_status: None });
    }

    #[tokio::test]
    async fn test_multi_cluster_cert_mount_forces_config_first() {
        // TLS is off in the spec while one member cluster's pods still
        // mount member certificates
        let mdb = multi_resource();
        let conn = MockOmConnection::new();

        let mut seq = Sequence::new();
        let mut steps = MockDeploymentSteps::new();
        steps
            .expect_publish_automation_config()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        steps
            .expect_apply_workload()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut writer = MockStateWriter::new();
        writer.expect_apply_annotations().times(1).returning(|_, _, _| Ok(()));

        let live = [
            live_sts("my-rs-0", 2),
            live_sts_with_volume("my-rs-1", 1, mdb_common::MEMBER_CERT_VOLUME_NAME),
        ];
        let outcome = run_pass(&mdb, &live, &conn, &steps, &writer, &quick_opts())
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::Applied { backup_status: None });
    }
}
