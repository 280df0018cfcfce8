//! MongoDbDeployment controller wiring
//!
//! Thin layer between the kube runtime and [`crate::reconciler::run_pass`]:
//! fetch what the pass needs, translate its outcome into a status patch and
//! a requeue interval, and map errors to either "pending, retry shortly" or
//! a genuine failure.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use mdb_common::crd::{DeploymentPhase, MongoDbDeployment, MongoDbDeploymentStatus};
use mdb_common::Error;
use mdb_om::OmConnection;

use crate::failover::{check_and_record_failover, ClusterHealthCheck};
use crate::reconciler::{run_pass, workload_names, DeploymentSteps, PassOutcome, ReconcileOpts};
use crate::state::StateWriter;

/// Requeue interval after a fully successful pass
pub const REQUEUE_SUCCESS_SECS: u64 = 300;
/// Requeue interval while waiting on the remote system
pub const REQUEUE_PENDING_SECS: u64 = 10;
/// Requeue interval after a failed pass
pub const REQUEUE_FAILURE_SECS: u64 = 30;

/// Controller context shared across reconciliation calls
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,
    /// Automation Controller connection
    pub conn: Arc<dyn OmConnection>,
    /// The pass's externally-visible mutations
    pub steps: Arc<dyn DeploymentSteps>,
    /// Sink for the durable state patch
    pub writer: Arc<dyn StateWriter>,
    /// Reachability probe for member clusters
    pub health: Arc<dyn ClusterHealthCheck>,
    /// Pass tunables
    pub opts: ReconcileOpts,
}

/// Status to report for a completed pass
fn outcome_status(outcome: &PassOutcome, total_members: i32) -> MongoDbDeploymentStatus {
    match outcome {
        PassOutcome::Applied { backup_status } => MongoDbDeploymentStatus {
            phase: DeploymentPhase::Running,
            members: total_members,
            message: None,
            backup_status: backup_status.map(|s| s.as_str().to_string()),
        },
        PassOutcome::Pending { message } => MongoDbDeploymentStatus {
            phase: DeploymentPhase::Pending,
            members: total_members,
            message: Some(message.clone()),
            ..Default::default()
        },
    }
}

/// Status to report for a pass that errored out
fn error_status(error: &Error, observed_members: i32) -> MongoDbDeploymentStatus {
    MongoDbDeploymentStatus {
        phase: if error.is_pending() {
            DeploymentPhase::Pending
        } else {
            DeploymentPhase::Failed
        },
        members: observed_members,
        message: Some(error.to_string()),
        ..Default::default()
    }
}

async fn patch_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: &MongoDbDeploymentStatus,
) -> Result<(), Error> {
    let api: Api<MongoDbDeployment> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Reconcile one MongoDbDeployment resource
#[instrument(skip(mdb, ctx), fields(resource = %mdb.name_any()))]
pub async fn reconcile(mdb: Arc<MongoDbDeployment>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = mdb.name_any();
    let namespace = mdb.namespace().unwrap_or_else(|| "default".to_string());
    debug!("Reconciling deployment");

    if check_and_record_failover(&mdb, ctx.health.as_ref(), ctx.writer.as_ref()).await? {
        info!("Recorded member cluster failover; replanning against the new placement");
        return Ok(Action::requeue(Duration::from_secs(REQUEUE_PENDING_SECS)));
    }

    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &namespace);
    let observed_members = mdb.status.as_ref().map(|s| s.members).unwrap_or(0);

    let result = match workload_names(&mdb) {
        Ok(names) => {
            // one StatefulSet per member cluster; absent ones are simply not
            // live yet
            let mut live_workloads = Vec::new();
            for sts_name in &names {
                if let Some(sts) = sts_api.get_opt(sts_name).await? {
                    live_workloads.push(sts);
                }
            }
            run_pass(
                &mdb,
                &live_workloads,
                ctx.conn.as_ref(),
                ctx.steps.as_ref(),
                ctx.writer.as_ref(),
                &ctx.opts,
            )
            .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            let status = outcome_status(&outcome, mdb.spec.total_members());
            patch_status(&ctx.client, &namespace, &name, &status).await?;
            match outcome {
                PassOutcome::Applied { .. } => {
                    info!("Deployment reconciled");
                    Ok(Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)))
                }
                PassOutcome::Pending { message } => {
                    info!(%message, "Deployment pending");
                    Ok(Action::requeue(Duration::from_secs(REQUEUE_PENDING_SECS)))
                }
            }
        }
        Err(e) => {
            let status = error_status(&e, observed_members);
            patch_status(&ctx.client, &namespace, &name, &status).await?;
            if e.is_pending() {
                warn!(error = %e, "Remote system has not converged yet");
                return Ok(Action::requeue(Duration::from_secs(REQUEUE_PENDING_SECS)));
            }
            if let Error::Validation { .. } = e {
                // only a spec change can fix this; no point requeueing
                warn!(error = %e, "Deployment spec is invalid");
                return Ok(Action::await_change());
            }
            Err(e)
        }
    }
}

/// Requeue policy when [`reconcile`] returns an error
pub fn error_policy(mdb: Arc<MongoDbDeployment>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        resource = %mdb.name_any(),
        error = %error,
        "Reconciliation failed"
    );
    Action::requeue(Duration::from_secs(REQUEUE_FAILURE_SECS))
}
