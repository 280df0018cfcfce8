//! Ops Manager (Automation Controller) client model
//!
//! The Automation Controller owns the authoritative live deployment
//! configuration for the managed mongod processes. This crate models the two
//! documents the operator mutates — the deployment config and the backup
//! configs — together with the connection trait, the read-modify-write
//! helper, and the bounded goal-state convergence wait.
//!
//! The HTTP transport lives in [`client`]; everything else is transport-free
//! so it can be exercised against mocks.

#![deny(missing_docs)]

pub mod api;
pub mod backup;
pub mod client;
pub mod deployment;

pub use api::{read_update_deployment, wait_for_goal_state, OmConnection, WaitOpts};
pub use backup::{next_status, BackupConfig, BackupStatus, ClusterType, HostCluster};
pub use deployment::{AutomationStatus, Deployment, Process, ProcessStatus, ReplicaSet, ReplicaSetMember};

#[cfg(any(test, feature = "test-mocks"))]
pub use api::MockOmConnection;
