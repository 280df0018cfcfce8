//! Scale-down safety coordination
//!
//! Before Kubernetes removes the pods of members being scaled out of a
//! replica set, those members must lose their ability to win an election:
//! the deployment config strips their votes and priority, and the change
//! must be observed as applied by every affected agent. Only then may the
//! StatefulSet replica count drop. Removing a pod whose vote-weight change
//! was requested but not yet confirmed can still cause an election.

use std::collections::BTreeMap;

use tracing::{info, warn};

use mdb_common::Result;
use mdb_om::{read_update_deployment, wait_for_goal_state, OmConnection, WaitOpts};

/// Strip election eligibility from the named members and wait until the
/// change is live.
///
/// `members_by_replica_set` maps replica set names to the member hosts about
/// to be removed. An empty map is a no-op and issues no remote calls. A
/// member missing from the remote config is logged and skipped — it was most
/// likely already removed out-of-band — and does not fail the preparation.
///
/// A deliberate simplification: there is no second "mark processes disabled"
/// stage (see `Deployment::disable_processes` for the retained hook point).
pub async fn prepare_scale_down(
    conn: &dyn OmConnection,
    members_by_replica_set: &BTreeMap<String, Vec<String>>,
    wait: WaitOpts,
) -> Result<()> {
    if members_by_replica_set.is_empty() {
        return Ok(());
    }

    read_update_deployment(conn, |deployment| {
        for (rs_name, members) in members_by_replica_set {
            if let Err(e) = deployment.mark_members_unvoted(rs_name, members) {
                // the member may already be gone; skip and continue
                warn!(replica_set = %rs_name, error = %e, "Could not unvote some members");
            }
        }
        Ok(())
    })
    .await?;

    let all_hosts: Vec<String> = members_by_replica_set.values().flatten().cloned().collect();
    wait_for_goal_state(conn, &all_hosts, wait).await?;

    info!(hosts = ?all_hosts, "Members prepared for scale down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mdb_om::{
        AutomationStatus, Deployment, MockOmConnection, Process, ProcessStatus, ReplicaSet,
        ReplicaSetMember,
    };

    fn deployment(rs: &str, hosts: &[&str]) -> Deployment {
        Deployment {
            version: 11,
            processes: hosts
                .iter()
                .map(|h| Process {
                    name: h.to_string(),
                    hostname: h.to_string(),
                    disabled: false,
                })
                .collect(),
            replica_sets: vec![ReplicaSet {
                id: rs.to_string(),
                members: hosts
                    .iter()
                    .enumerate()
                    .map(|(i, h)| ReplicaSetMember {
                        id: i as i32,
                        host: h.to_string(),
                        votes: 1,
                        priority: 1.0,
                    })
                    .collect(),
            }],
        }
    }

    fn converged_status(hosts: &[&str]) -> AutomationStatus {
        AutomationStatus {
            goal_version: 12,
            processes: hosts
                .iter()
                .map(|h| ProcessStatus {
                    name: h.to_string(),
                    hostname: h.to_string(),
                    last_goal_version_achieved: 12,
                })
                .collect(),
        }
    }

    fn quick_wait() -> WaitOpts {
        WaitOpts {
            attempts: 2,
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_empty_map_is_noop_with_zero_remote_calls() {
        let conn = MockOmConnection::new();
        prepare_scale_down(&conn, &BTreeMap::new(), quick_wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unvotes_members_then_waits_for_convergence() {
        let mut conn = MockOmConnection::new();
        conn.expect_read_deployment()
            .times(1)
            .returning(|| Ok(deployment("my-rs", &["my-rs-0", "my-rs-1", "my-rs-2"])));
        conn.expect_update_deployment()
            .times(1)
            .withf(|d| {
                let members = &d.replica_sets[0].members;
                members[2].votes == 0 && members[2].priority == 0.0 && members[0].votes == 1
            })
            .returning(|_| Ok(()));
        conn.expect_read_automation_status()
            .times(1)
            .returning(|| Ok(converged_status(&["my-rs-0", "my-rs-1", "my-rs-2"])));

        let members = BTreeMap::from([("my-rs".to_string(), vec!["my-rs-2".to_string()])]);
        prepare_scale_down(&conn, &members, quick_wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_member_is_skipped_not_escalated() {
        let mut conn = MockOmConnection::new();
        conn.expect_read_deployment()
            .times(1)
            .returning(|| Ok(deployment("my-rs", &["my-rs-0"])));
        // the push still happens even though my-rs-9 was not found
        conn.expect_update_deployment().times(1).returning(|_| Ok(()));
        conn.expect_read_automation_status()
            .returning(|| Ok(converged_status(&["my-rs-0"])));

        let members = BTreeMap::from([("my-rs".to_string(), vec!["my-rs-9".to_string()])]);
        prepare_scale_down(&conn, &members, quick_wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_convergence_timeout_reports_pending() {
        let mut conn = MockOmConnection::new();
        conn.expect_read_deployment()
            .times(1)
            .returning(|| Ok(deployment("my-rs", &["my-rs-0", "my-rs-1"])));
        conn.expect_update_deployment().times(1).returning(|_| Ok(()));
        conn.expect_read_automation_status().returning(|| {
            Ok(AutomationStatus {
                goal_version: 12,
                processes: vec![ProcessStatus {
                    name: "my-rs-1".to_string(),
                    hostname: "my-rs-1".to_string(),
                    last_goal_version_achieved: 11,
                }],
            })
        });

        let members = BTreeMap::from([("my-rs".to_string(), vec!["my-rs-1".to_string()])]);
        let err = prepare_scale_down(&conn, &members, quick_wait()).await.unwrap_err();
        assert!(err.is_pending());
    }
}
