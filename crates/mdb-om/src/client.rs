//! HTTP client for the Automation Controller API
//!
//! Thin JSON-over-HTTP implementation of [`OmConnection`]. Authentication
//! uses a project-scoped API key header; endpoints are rooted at
//! `/api/v1/groups/{group}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use mdb_common::{Error, Result};

use crate::api::OmConnection;
use crate::backup::{BackupConfig, BackupStatus, HostCluster};
use crate::deployment::{AutomationStatus, Deployment};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Wrapper for list endpoints that paginate results
#[derive(serde::Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

/// HTTP implementation of [`OmConnection`] for one project
#[derive(Clone)]
pub struct OmClient {
    base_url: String,
    group_id: String,
    api_key: String,
    http: reqwest::Client,
}

impl OmClient {
    /// Create a client targeting the given base URL and project (group)
    #[must_use]
    pub fn new(base_url: impl Into<String>, group_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        OmClient {
            base_url: base_url.into(),
            group_id: group_id.into(),
            api_key: api_key.into(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/groups/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.group_id,
            path.trim_start_matches('/')
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::ops_manager(path.to_string(), e.to_string()))?;
        Self::decode(path, response).await
    }

    async fn put_json<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .http
            .put(self.url(path))
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::ops_manager(path.to_string(), e.to_string()))?;
        Self::decode(path, response).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status == StatusCode::CONFLICT {
            // illegal state transitions surface as 409; the state machine is
            // supposed to prevent ever issuing one
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::ops_manager(path.to_string(), format!("conflict: {}", detail)));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::ops_manager(
                path.to_string(),
                format!("unexpected status {}: {}", status, detail),
            ));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::ops_manager(path.to_string(), e.to_string()))
    }
}

#[async_trait]
impl OmConnection for OmClient {
    async fn read_deployment(&self) -> Result<Deployment> {
        self.get_json("automationConfig").await
    }

    async fn update_deployment(&self, deployment: Deployment) -> Result<()> {
        let _: serde_json::Value = self.put_json("automationConfig", &deployment).await?;
        Ok(())
    }

    async fn read_automation_status(&self) -> Result<AutomationStatus> {
        self.get_json("automationStatus").await
    }

    async fn read_backup_configs(&self) -> Result<Vec<BackupConfig>> {
        let page: Page<BackupConfig> = self.get_json("backupConfigs").await?;
        Ok(page.results)
    }

    async fn read_backup_config(&self, cluster_id: &str) -> Result<BackupConfig> {
        self.get_json(&format!("backupConfigs/{}", cluster_id)).await
    }

    async fn update_backup_status(&self, cluster_id: &str, status: BackupStatus) -> Result<BackupConfig> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct StatusUpdate {
            status: BackupStatus,
        }
        self.put_json(&format!("backupConfigs/{}", cluster_id), &StatusUpdate { status })
            .await
    }

    async fn read_host_cluster(&self, cluster_id: &str) -> Result<HostCluster> {
        self.get_json(&format!("clusters/{}", cluster_id)).await
    }
}
