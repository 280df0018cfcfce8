//! Reconciliation safety engine for MongoDbDeployment resources
//!
//! One reconciliation pass reads the durable "last achieved" state, decides
//! the safe order in which the Automation Controller config and the workload
//! StatefulSets may be changed, prepares any scale-down so member removal
//! cannot trigger an election, drives the remote backup config through its
//! legal transitions, and records the new state only when everything
//! succeeded.

#![deny(missing_docs)]

/// Backup status driving loop
pub mod backup;
/// kube controller wiring (watch loop, status updates)
pub mod controller;
/// Member hostname derivation
pub mod dns;
/// Cluster failover: health checks, member redistribution, failover annotations
pub mod failover;
/// Change-ordering decision engine
pub mod ordering;
/// Reconciler orchestration for a single pass
pub mod reconciler;
/// Scale-down safety coordination
pub mod scaledown;
/// Durable reconciliation state store
pub mod state;
/// Production implementations of the reconciler step traits
pub mod steps;
