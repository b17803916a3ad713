//! Default reqwest-based implementation of [`DevopsBackend`].
//!
//! Talks to one org with a bearer token:
//! - SOQL queries through `/services/data/v{api}/query`
//! - the promotion POST to whatever URL the workflow builds
//! - change events through the Bayeux streaming endpoint
//!
//! # Quick Start
//!
//! ```ignore
//! use devops_promote::{Config, DevopsClient};
//!
//! let config = Config::load()?;
//! config.validate()?;
//! let client = DevopsClient::from_config(&config.org)?;
//! ```

pub mod soql;
pub mod streaming;

pub use streaming::StreamingClient;

use crate::backend::DevopsBackend;
use crate::config::OrgConfig;
use crate::error::PromoteError;
use crate::events::EventSubscription;
use crate::types::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Remote error entry as returned by the REST API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for one org.
pub struct DevopsClient {
    http: reqwest::Client,
    instance_url: String,
    access_token: String,
    api_version: String,
    streaming: StreamingClient,
}

impl DevopsClient {
    pub fn new(
        instance_url: impl Into<String>,
        access_token: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Result<Self, PromoteError> {
        let instance_url = instance_url.into().trim_end_matches('/').to_string();
        let access_token = access_token.into();
        let api_version = api_version.into();

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| PromoteError::Config(format!("failed to build HTTP client: {}", e)))?;

        let streaming =
            StreamingClient::new(http.clone(), &instance_url, &api_version, access_token.clone());

        Ok(Self {
            http,
            instance_url,
            access_token,
            api_version,
            streaming,
        })
    }

    pub fn from_config(org: &OrgConfig) -> Result<Self, PromoteError> {
        Self::new(&org.instance_url, &org.access_token, &org.api_version)
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    fn query_url(&self) -> String {
        format!("{}/services/data/v{}/query", self.instance_url, self.api_version)
    }

    /// Run a SOQL query and return every row of the first page.
    async fn query<T: DeserializeOwned>(&self, soql: &str) -> Result<Vec<T>, PromoteError> {
        debug!(soql, "running query");
        let response = self
            .http
            .get(self.query_url())
            .bearer_auth(&self.access_token)
            .query(&[("q", soql)])
            .send()
            .await
            .map_err(|e| PromoteError::Query(format!("failed to send query: {}", e)))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let body: soql::QueryResponse<T> = response
            .json()
            .await
            .map_err(|e| PromoteError::Query(format!("failed to parse query response: {}", e)))?;
        if !body.done {
            debug!(total = body.total_size, "query returned more than one page");
        }
        Ok(body.records)
    }

    /// Run a query that must return a row.
    async fn query_one<T: DeserializeOwned>(
        &self,
        soql: &str,
        entity: &'static str,
        key: &str,
    ) -> Result<T, PromoteError> {
        self.query(soql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PromoteError::NotFound {
                entity,
                key: key.to_string(),
            })
    }
}

/// Turn a non-success response into [`PromoteError::Api`]. The code is
/// derived from the HTTP status; the remote error code, when present,
/// goes into the message.
async fn api_error(response: reqwest::Response) -> PromoteError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read response".to_string());
    PromoteError::Api {
        status,
        code: format!("ERROR_HTTP_{}", status),
        message: remote_message(&body),
    }
}

fn remote_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Vec<RemoteError>>(body)
        .ok()
        .and_then(|errors| errors.into_iter().next())
        .or_else(|| serde_json::from_str::<RemoteError>(body).ok());

    match parsed {
        Some(RemoteError {
            error_code: Some(code),
            message: Some(message),
        }) => format!("{}: {}", code, message),
        Some(RemoteError {
            message: Some(message),
            ..
        }) => message,
        _ => body.to_string(),
    }
}

impl DevopsBackend for DevopsClient {
    async fn fetch_pipeline_stage(
        &self,
        project_name: &str,
        branch_name: &str,
    ) -> Result<PipelineStage, PromoteError> {
        let row: soql::PipelineStageRow = self
            .query_one(
                &soql::pipeline_stage(project_name, branch_name),
                "pipeline stage",
                &format!("{}/{}", project_name, branch_name),
            )
            .await?;
        Ok(row.into())
    }

    async fn fetch_async_operation(
        &self,
        job_id: &str,
    ) -> Result<AsyncOperationRecord, PromoteError> {
        let row: soql::AsyncOperationRow = self
            .query_one(&soql::async_operation(job_id), "async operation", job_id)
            .await?;
        Ok(row.into())
    }

    async fn fetch_deployment_result(&self, job_id: &str) -> Result<DeploymentResult, PromoteError> {
        let row: soql::DeploymentResultRow = self
            .query_one(&soql::deployment_result(job_id), "deployment result", job_id)
            .await?;
        Ok(row.into())
    }

    async fn fetch_named_credential_endpoint(
        &self,
        developer_name: &str,
    ) -> Result<String, PromoteError> {
        let row: soql::NamedCredentialRow = self
            .query_one(
                &soql::named_credential(developer_name),
                "named credential",
                developer_name,
            )
            .await?;
        Ok(row.endpoint)
    }

    async fn fetch_work_items(
        &self,
        change_bundle_ids: &[String],
    ) -> Result<Vec<WorkItem>, PromoteError> {
        if change_bundle_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<soql::WorkItemRow> =
            self.query(&soql::work_items(change_bundle_ids)).await?;
        Ok(rows.into_iter().map(WorkItem::from).collect())
    }

    async fn send_promotion(
        &self,
        url: &str,
        body: &PromotionRequestBody,
    ) -> Result<PromotionResponse, PromoteError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| PromoteError::Query(format!("failed to send promotion request: {}", e)))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        response.json().await.map_err(|e| {
            PromoteError::Query(format!("failed to parse promotion response: {}", e))
        })
    }

    async fn subscribe(&self, channel: &str) -> Result<EventSubscription, PromoteError> {
        self.streaming.subscribe(channel).await
    }
}
