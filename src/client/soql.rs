//! Fixed-projection SOQL queries and the rows they return.
//!
//! Every query selects exactly the fields the workflow needs. Values are
//! interpolated as string literals, escaped with [`quote`].

use crate::types::{AsyncOperationRecord, DeploymentResult, PipelineStage, WorkItem};
use crate::status::AsyncOperationStatus;
use serde::Deserialize;

/// Escape a value and wrap it in single quotes.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

pub fn pipeline_stage(project_name: &str, branch_name: &str) -> String {
    format!(
        "SELECT Id, sf_devops__Branch__r.sf_devops__Name__c, \
         sf_devops__Pipeline__r.sf_devops__Project__c, \
         (SELECT Id FROM sf_devops__Pipeline_Stages__r) \
         FROM sf_devops__Pipeline_Stage__c \
         WHERE sf_devops__Pipeline__r.sf_devops__Project__r.Name = {} \
         AND sf_devops__Branch__r.sf_devops__Name__c = {}",
        quote(project_name),
        quote(branch_name)
    )
}

pub fn async_operation(job_id: &str) -> String {
    format!(
        "SELECT Id, sf_devops__Status__c, sf_devops__Message__c, sf_devops__Error_Details__c \
         FROM sf_devops__Async_Operation_Result__c WHERE Id = {}",
        quote(job_id)
    )
}

pub fn deployment_result(job_id: &str) -> String {
    format!(
        "SELECT Id, sf_devops__Deployment_Id__c, sf_devops__Check_Deploy__c, \
         (SELECT sf_devops__Change_Bundle__c FROM sf_devops__Change_Bundle_Installs__r) \
         FROM sf_devops__Deployment_Result__c \
         WHERE sf_devops__Async_Operation_Result__c = {}",
        quote(job_id)
    )
}

pub fn named_credential(developer_name: &str) -> String {
    format!(
        "SELECT Endpoint FROM NamedCredential WHERE DeveloperName = {}",
        quote(developer_name)
    )
}

pub fn work_items(change_bundle_ids: &[String]) -> String {
    let ids = change_bundle_ids
        .iter()
        .map(|id| quote(id))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT Id, Name, sf_devops__Subject__c, sf_devops__Change_Bundle__c \
         FROM sf_devops__Work_Item__c WHERE sf_devops__Change_Bundle__c IN ({}) \
         ORDER BY Name",
        ids
    )
}

// ═══════════════════════════════════════════════════════════════
// ROWS
// ═══════════════════════════════════════════════════════════════

/// Envelope of a query response. Also the shape of a nested subquery.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse<T> {
    #[serde(default)]
    pub total_size: u64,
    #[serde(default = "default_done")]
    pub done: bool,
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
}

fn default_done() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct IdRow {
    #[serde(rename = "Id")]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "sf_devops__Name__c")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PipelineRef {
    #[serde(rename = "sf_devops__Project__c")]
    pub project_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PipelineStageRow {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "sf_devops__Branch__r")]
    pub branch: BranchRef,
    #[serde(rename = "sf_devops__Pipeline__r")]
    pub pipeline: PipelineRef,
    /// Stages pointing at this one as their next stage.
    #[serde(rename = "sf_devops__Pipeline_Stages__r")]
    pub previous: Option<QueryResponse<IdRow>>,
}

impl From<PipelineStageRow> for PipelineStage {
    fn from(row: PipelineStageRow) -> Self {
        Self {
            id: row.id,
            branch_name: row.branch.name,
            project_id: row.pipeline.project_id,
            previous_stage_ids: row
                .previous
                .map(|p| p.records.into_iter().map(|r| r.id).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AsyncOperationRow {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "sf_devops__Status__c")]
    pub status: Option<String>,
    #[serde(rename = "sf_devops__Message__c")]
    pub message: Option<String>,
    #[serde(rename = "sf_devops__Error_Details__c")]
    pub error_details: Option<String>,
}

impl From<AsyncOperationRow> for AsyncOperationRecord {
    fn from(row: AsyncOperationRow) -> Self {
        Self {
            id: row.id,
            status: row
                .status
                .as_deref()
                .map(|s| AsyncOperationStatus::from_remote(Some(s))),
            message: row.message,
            error_details: row.error_details,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeBundleInstallRow {
    #[serde(rename = "sf_devops__Change_Bundle__c")]
    pub change_bundle_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeploymentResultRow {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "sf_devops__Deployment_Id__c")]
    pub deployment_id: Option<String>,
    #[serde(rename = "sf_devops__Check_Deploy__c", default)]
    pub check_deploy: Option<bool>,
    #[serde(rename = "sf_devops__Change_Bundle_Installs__r")]
    pub installs: Option<QueryResponse<ChangeBundleInstallRow>>,
}

impl From<DeploymentResultRow> for DeploymentResult {
    fn from(row: DeploymentResultRow) -> Self {
        Self {
            id: row.id,
            deployment_id: row.deployment_id,
            check_deploy: row.check_deploy.unwrap_or(false),
            change_bundle_ids: row
                .installs
                .map(|i| {
                    i.records
                        .into_iter()
                        .filter_map(|r| r.change_bundle_id)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NamedCredentialRow {
    #[serde(rename = "Endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkItemRow {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "sf_devops__Subject__c")]
    pub subject: Option<String>,
    #[serde(rename = "sf_devops__Change_Bundle__c")]
    pub change_bundle_id: String,
}

impl From<WorkItemRow> for WorkItem {
    fn from(row: WorkItemRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            subject: row.subject,
            change_bundle_id: row.change_bundle_id,
        }
    }
}
