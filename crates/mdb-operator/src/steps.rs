//! Production implementations of the reconciler step traits
//!
//! [`crate::reconciler::run_pass`] sequences two mutations it only knows as
//! trait methods; the implementations here carry them out against the real
//! cluster and the real Automation Controller.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

use mdb_common::crd::MongoDbDeployment;
use mdb_common::Result;
use mdb_om::{read_update_deployment, OmConnection};

use crate::reconciler::{DeploymentSteps, PassPlan};

/// [`DeploymentSteps`] backed by the Kubernetes API and an Automation
/// Controller connection
pub struct KubeDeploymentSteps {
    client: Client,
    conn: Arc<dyn OmConnection>,
}

impl KubeDeploymentSteps {
    /// Create the production steps from the given client and connection
    pub fn new(client: Client, conn: Arc<dyn OmConnection>) -> Self {
        KubeDeploymentSteps { client, conn }
    }
}

#[async_trait]
impl DeploymentSteps for KubeDeploymentSteps {
    /// Push the member-count change to the deployment config.
    ///
    /// Only shrink takes effect here; the replica set never lists more
    /// members than have running pods, so growth is reflected after the new
    /// pods register.
    async fn publish_automation_config(&self, mdb: &MongoDbDeployment, plan: &PassPlan) -> Result<()> {
        let name = mdb.name_any();
        let total = plan.total_members;
        read_update_deployment(self.conn.as_ref(), |deployment| {
            deployment.truncate_replica_set(&name, total as usize);
            Ok(())
        })
        .await?;
        info!(resource = %name, members = total, "Published deployment config");
        Ok(())
    }

    /// Patch each backing StatefulSet to its planned replica count.
    ///
    /// A StatefulSet that does not exist yet is skipped; descriptor assembly
    /// happens elsewhere and a later pass will find it.
    async fn apply_workload(&self, mdb: &MongoDbDeployment, plan: &PassPlan) -> Result<()> {
        let namespace = mdb.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace);

        for (sts_name, replicas) in &plan.replicas_by_statefulset {
            let patch = serde_json::json!({ "spec": { "replicas": replicas } });
            match api.patch(sts_name, &PatchParams::default(), &Patch::Merge(&patch)).await {
                Ok(_) => {
                    debug!(statefulset = %sts_name, replicas, "Applied workload replica count");
                }
                Err(kube::Error::Api(response)) if response.code == 404 => {
                    debug!(statefulset = %sts_name, "StatefulSet not created yet; skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
