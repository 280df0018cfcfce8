//! MongoDbDeployment operator entrypoint

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mdb_common::crd::MongoDbDeployment;
use mdb_om::client::OmClient;
use mdb_om::OmConnection;
use mdb_operator::controller::{error_policy, reconcile, Context};
use mdb_operator::failover::HttpClusterHealthCheck;
use mdb_operator::reconciler::ReconcileOpts;
use mdb_operator::state::KubeStateWriter;
use mdb_operator::steps::KubeDeploymentSteps;

/// Operator for MongoDbDeployment resources
#[derive(Parser, Debug)]
#[command(name = "mdb-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Base URL of the Ops Manager / Automation Controller API
    #[arg(long, env = "OM_BASE_URL", default_value = "http://ops-manager:8080")]
    om_base_url: String,

    /// Project (group) id the managed deployments belong to
    #[arg(long, env = "OM_GROUP_ID")]
    om_group_id: Option<String>,

    /// Project-scoped API key
    #[arg(long, env = "OM_API_KEY", hide_env_values = true)]
    om_api_key: Option<String>,

    /// Member cluster health endpoint as name=url; repeatable. Clusters
    /// without an endpoint are never failed over.
    #[arg(long = "member-cluster-endpoint", value_name = "NAME=URL")]
    member_cluster_endpoints: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&MongoDbDeployment::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run_controller(cli).await
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("MongoDbDeployment controller starting...");

    let group_id = cli
        .om_group_id
        .ok_or_else(|| anyhow::anyhow!("--om-group-id (or OM_GROUP_ID) is required"))?;
    let api_key = cli
        .om_api_key
        .ok_or_else(|| anyhow::anyhow!("--om-api-key (or OM_API_KEY) is required"))?;

    let mut health_endpoints = BTreeMap::new();
    for entry in &cli.member_cluster_endpoints {
        let (cluster, url) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--member-cluster-endpoint expects NAME=URL, got {entry}"))?;
        health_endpoints.insert(cluster.to_string(), url.to_string());
    }

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let conn: Arc<dyn OmConnection> = Arc::new(OmClient::new(cli.om_base_url, group_id, api_key));
    let ctx = Arc::new(Context {
        client: client.clone(),
        conn: conn.clone(),
        steps: Arc::new(KubeDeploymentSteps::new(client.clone(), conn)),
        writer: Arc::new(KubeStateWriter::new(client.clone())),
        health: Arc::new(HttpClusterHealthCheck::new(health_endpoints)),
        opts: ReconcileOpts::default(),
    });

    let deployments: Api<MongoDbDeployment> = Api::all(client);
    Controller::new(deployments, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Controller stopped");
    Ok(())
}
