//! Deployment config (automation config) document
//!
//! The deployment config is a single JSON document describing every process
//! and replica set the automation agents manage. The operator only ever
//! mutates it through read-modify-write (see [`crate::read_update_deployment`]);
//! agents converge to it asynchronously and report progress through the
//! automation status document.

use serde::{Deserialize, Serialize};

use mdb_common::{Error, Result};

/// One managed mongod/mongos process
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Process name, unique within the deployment
    pub name: String,

    /// Hostname the process is reachable at
    pub hostname: String,

    /// When true, the agent shuts the process down and keeps it down
    #[serde(default)]
    pub disabled: bool,
}

/// One member of a replica set, referencing a process by host
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetMember {
    /// Member id, unique within the replica set
    #[serde(rename = "_id")]
    pub id: i32,

    /// Host (process name) backing this member
    pub host: String,

    /// Vote weight in elections; zero removes election eligibility
    pub votes: i32,

    /// Election priority; zero means the member can never become primary
    pub priority: f64,
}

/// A replica set within the deployment config
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    /// Replica set name
    #[serde(rename = "_id")]
    pub id: String,

    /// Member list
    #[serde(default)]
    pub members: Vec<ReplicaSetMember>,
}

impl ReplicaSet {
    fn member_by_host_mut(&mut self, host: &str) -> Option<&mut ReplicaSetMember> {
        self.members.iter_mut().find(|m| m.host == host)
    }
}

/// The deployment config document
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Monotonic config version, bumped by the Automation Controller on update
    #[serde(default)]
    pub version: i64,

    /// All managed processes
    #[serde(default)]
    pub processes: Vec<Process>,

    /// All replica sets
    #[serde(default)]
    pub replica_sets: Vec<ReplicaSet>,
}

impl Deployment {
    /// Find a replica set by name
    pub fn replica_set_mut(&mut self, name: &str) -> Option<&mut ReplicaSet> {
        self.replica_sets.iter_mut().find(|rs| rs.id == name)
    }

    /// Strip voting rights and election priority from the named members.
    ///
    /// Members that cannot be found are reported in the error; the ones that
    /// were found have already been updated. Callers scaling down treat a
    /// missing member as already removed out-of-band and do not escalate.
    pub fn mark_members_unvoted(&mut self, rs_name: &str, member_hosts: &[String]) -> Result<()> {
        let rs = self
            .replica_set_mut(rs_name)
            .ok_or_else(|| Error::ops_manager("deployment", format!("replica set {} not found", rs_name)))?;

        let mut missing = Vec::new();
        for host in member_hosts {
            match rs.member_by_host_mut(host) {
                Some(member) => {
                    member.votes = 0;
                    member.priority = 0.0;
                }
                None => missing.push(host.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(Error::ops_manager(
                "deployment",
                format!(
                    "failed to find members of replica set {}: {}",
                    rs_name,
                    missing.join(", ")
                ),
            ));
        }
        Ok(())
    }

    /// Mark the named processes disabled so the agents shut them down.
    ///
    /// Scale-down once had a second stage built on this; production behavior
    /// proved correct without it and agents occasionally got stuck on the
    /// disable step, so the coordinator no longer calls it. The operation is
    /// kept as the hook point in case that evidence changes.
    pub fn disable_processes(&mut self, process_names: &[String]) {
        for process in &mut self.processes {
            if process_names.contains(&process.name) {
                process.disabled = true;
            }
        }
    }

    /// Drop replica set members (and their processes) beyond `count`, by
    /// member id order. Used when publishing a shrunk deployment config.
    pub fn truncate_replica_set(&mut self, rs_name: &str, count: usize) {
        let removed_hosts: Vec<String> = match self.replica_set_mut(rs_name) {
            Some(rs) => {
                rs.members.sort_by_key(|m| m.id);
                if rs.members.len() <= count {
                    return;
                }
                rs.members.split_off(count).into_iter().map(|m| m.host).collect()
            }
            None => return,
        };
        self.processes.retain(|p| !removed_hosts.contains(&p.name));
    }
}

/// Per-process convergence status reported by an automation agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    /// Process name
    pub name: String,

    /// Hostname the agent runs on
    pub hostname: String,

    /// Last deployment config version this process fully applied
    pub last_goal_version_achieved: i64,
}

/// Automation status document: goal version plus per-process progress
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatus {
    /// The deployment config version agents are converging to
    pub goal_version: i64,

    /// Per-process convergence reports
    #[serde(default)]
    pub processes: Vec<ProcessStatus>,
}

impl AutomationStatus {
    /// Whether every listed host has applied the goal config version.
    ///
    /// Hosts absent from the status document are treated as converged: the
    /// corresponding process was removed from the config and has nothing
    /// left to apply.
    pub fn hosts_reached_goal(&self, hosts: &[String]) -> bool {
        hosts.iter().all(|host| {
            self.processes
                .iter()
                .filter(|p| &p.hostname == host || &p.name == host)
                .all(|p| p.last_goal_version_achieved >= self.goal_version)
        })
    }

    /// Hosts from the list that have not yet applied the goal version
    pub fn lagging_hosts(&self, hosts: &[String]) -> Vec<String> {
        hosts
            .iter()
            .filter(|host| {
                self.processes
                    .iter()
                    .any(|p| (&p.hostname == *host || &p.name == *host) && p.last_goal_version_achieved < self.goal_version)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment_with_rs(name: &str, hosts: &[&str]) -> Deployment {
        Deployment {
            version: 7,
            processes: hosts
                .iter()
                .map(|h| Process {
                    name: h.to_string(),
                    hostname: format!("{}.svc.cluster.local", h),
                    disabled: false,
                })
                .collect(),
            replica_sets: vec![ReplicaSet {
                id: name.to_string(),
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

    #[test]
    fn test_mark_members_unvoted() {
        let mut d = deployment_with_rs("my-rs", &["my-rs-0", "my-rs-1", "my-rs-2"]);
        d.mark_members_unvoted("my-rs", &["my-rs-2".to_string()]).unwrap();

        let rs = &d.replica_sets[0];
        assert_eq!(rs.members[2].votes, 0);
        assert_eq!(rs.members[2].priority, 0.0);
        assert_eq!(rs.members[0].votes, 1);
        assert_eq!(rs.members[1].votes, 1);
    }

    #[test]
    fn test_mark_members_unvoted_reports_missing_but_updates_found() {
        let mut d = deployment_with_rs("my-rs", &["my-rs-0", "my-rs-1"]);
        let err = d
            .mark_members_unvoted("my-rs", &["my-rs-1".to_string(), "my-rs-9".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("my-rs-9"));
        // the member that was found has still been stripped
        assert_eq!(d.replica_sets[0].members[1].votes, 0);
    }

    #[test]
    fn test_mark_members_unvoted_unknown_replica_set() {
        let mut d = deployment_with_rs("my-rs", &["my-rs-0"]);
        assert!(d.mark_members_unvoted("other-rs", &["my-rs-0".to_string()]).is_err());
    }

    #[test]
    fn test_disable_processes_hook() {
        let mut d = deployment_with_rs("my-rs", &["my-rs-0", "my-rs-1"]);
        d.disable_processes(&["my-rs-1".to_string()]);
        assert!(!d.processes[0].disabled);
        assert!(d.processes[1].disabled);
    }

    #[test]
    fn test_truncate_replica_set_removes_members_and_processes() {
        let mut d = deployment_with_rs("my-rs", &["my-rs-0", "my-rs-1", "my-rs-2"]);
        d.truncate_replica_set("my-rs", 2);
        assert_eq!(d.replica_sets[0].members.len(), 2);
        assert_eq!(d.processes.len(), 2);
        assert!(d.processes.iter().all(|p| p.name != "my-rs-2"));
    }

    #[test]
    fn test_hosts_reached_goal() {
        let status = AutomationStatus {
            goal_version: 5,
            processes: vec![
                ProcessStatus {
                    name: "my-rs-0".to_string(),
                    hostname: "my-rs-0".to_string(),
                    last_goal_version_achieved: 5,
                },
                ProcessStatus {
                    name: "my-rs-1".to_string(),
                    hostname: "my-rs-1".to_string(),
                    last_goal_version_achieved: 4,
                },
            ],
        };
        assert!(status.hosts_reached_goal(&["my-rs-0".to_string()]));
        assert!(!status.hosts_reached_goal(&["my-rs-0".to_string(), "my-rs-1".to_string()]));
        // removed processes no longer report and count as converged
        assert!(status.hosts_reached_goal(&["my-rs-9".to_string()]));
        assert_eq!(
            status.lagging_hosts(&["my-rs-0".to_string(), "my-rs-1".to_string()]),
            vec!["my-rs-1".to_string()]
        );
    }
}
