//! Minimal domain types for the promotion workflow.
//!
//! These are the records the workflow reads from the remote system and the
//! wire shapes it sends. Nothing more.

use crate::status::AsyncOperationStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a canonical (case-safe) job id.
pub const LONG_ID_LEN: usize = 18;
/// Length of a short (case-sensitive) job id.
pub const SHORT_ID_LEN: usize = 15;

/// Source stage id used when the target stage is the first in the pipeline.
pub const APPROVED_STAGE: &str = "Approved";

/// Async operation record tracking a promotion job server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncOperationRecord {
    pub id: String,
    pub status: Option<AsyncOperationStatus>,
    pub message: Option<String>,
    pub error_details: Option<String>,
}

/// One stage of a DevOps Center pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStage {
    pub id: String,
    pub branch_name: String,
    pub project_id: String,
    /// Stages whose next stage is this one. Pipelines are linear, so at
    /// most one entry is expected.
    #[serde(default)]
    pub previous_stage_ids: Vec<String>,
}

impl PipelineStage {
    /// The stage promoted from when promoting into this one, if any.
    pub fn previous_stage_id(&self) -> Option<&str> {
        self.previous_stage_ids.first().map(String::as_str)
    }

    /// Is this the first stage of the pipeline?
    pub fn is_first(&self) -> bool {
        self.previous_stage_ids.is_empty()
    }
}

/// Result of the metadata deployment a promotion job ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    pub id: String,
    /// Id of the metadata deployment on the target org. A validated
    /// (check-deploy) run can later be quick-deployed with it.
    pub deployment_id: Option<String>,
    pub check_deploy: bool,
    #[serde(default)]
    pub change_bundle_ids: Vec<String>,
}

/// A work item promoted as part of a change bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub name: String,
    pub subject: Option<String>,
    pub change_bundle_id: String,
}

/// Apex test level for the deployment a promotion runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestLevel {
    NoTestRun,
    RunSpecifiedTests,
    RunLocalTests,
    RunAllTestsInOrg,
}

impl TestLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestLevel::NoTestRun => "NoTestRun",
            TestLevel::RunSpecifiedTests => "RunSpecifiedTests",
            TestLevel::RunLocalTests => "RunLocalTests",
            TestLevel::RunAllTestsInOrg => "RunAllTestsInOrg",
        }
    }
}

impl fmt::Display for TestLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NoTestRun" => Ok(TestLevel::NoTestRun),
            "RunSpecifiedTests" => Ok(TestLevel::RunSpecifiedTests),
            "RunLocalTests" => Ok(TestLevel::RunLocalTests),
            "RunAllTestsInOrg" => Ok(TestLevel::RunAllTestsInOrg),
            other => Err(format!("unknown test level: {}", other)),
        }
    }
}

/// Fields every promotion command accepts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseOptions {
    pub full_deploy: bool,
    pub test_level: Option<TestLevel>,
    pub run_tests: Vec<String>,
    pub change_bundle_name: Option<String>,
}

/// Fields specific to the kind of promotion being requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionTypeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undeployed_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_deploy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
}

/// `promoteOptions` object of the promotion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_deploy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_level: Option<TestLevel>,
    /// Comma-joined test class names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_tests: Option<String>,
    #[serde(flatten)]
    pub type_options: PromotionTypeOptions,
}

/// Body of the promotion POST.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRequestBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_bundle_name: Option<String>,
    pub promote_options: PromoteOptions,
}

impl PromotionRequestBody {
    /// Merge the command-specific options into the base fields. Unset
    /// optional fields are left out of the serialized body.
    pub fn build(base: &BaseOptions, type_options: PromotionTypeOptions) -> Self {
        let run_tests = if base.run_tests.is_empty() {
            None
        } else {
            Some(base.run_tests.join(","))
        };

        Self {
            change_bundle_name: base.change_bundle_name.clone(),
            promote_options: PromoteOptions {
                full_deploy: base.full_deploy.then_some(true),
                test_level: base.test_level,
                run_tests,
                type_options,
            },
        }
    }
}

/// Response of the promotion POST.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionResponse {
    pub job_id: String,
}

/// What a command reports back, both as text and as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionResult {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AsyncOperationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
}

impl PromotionResult {
    /// Result of an async-mode start: only the job id is known.
    pub fn started(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Default::default()
        }
    }

    pub fn from_record(record: AsyncOperationRecord) -> Self {
        Self {
            job_id: record.id,
            status: record.status,
            message: record.message,
            error_details: record.error_details,
            deployment_id: None,
        }
    }

    /// Did the remote job end in failure?
    pub fn is_failure(&self) -> bool {
        self.status == Some(AsyncOperationStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_stage() {
        let first = PipelineStage {
            id: "stage-1".to_string(),
            branch_name: "integration".to_string(),
            project_id: "proj".to_string(),
            previous_stage_ids: vec![],
        };
        assert!(first.is_first());
        assert_eq!(first.previous_stage_id(), None);

        let second = PipelineStage {
            previous_stage_ids: vec!["stage-1".to_string()],
            ..first
        };
        assert!(!second.is_first());
        assert_eq!(second.previous_stage_id(), Some("stage-1"));
    }

    #[test]
    fn test_request_body_golden() {
        let base = BaseOptions {
            full_deploy: true,
            test_level: Some(TestLevel::RunSpecifiedTests),
            run_tests: vec!["AccountTest".to_string(), "ContactTest".to_string()],
            change_bundle_name: Some("release-1".to_string()),
        };
        let body = PromotionRequestBody::build(
            &base,
            PromotionTypeOptions {
                undeployed_only: Some(true),
                ..Default::default()
            },
        );

        let json = serde_json::to_string(&body).unwrap();
        let expected = r#"{"changeBundleName":"release-1","promoteOptions":{"fullDeploy":true,"testLevel":"RunSpecifiedTests","runTests":"AccountTest,ContactTest","undeployedOnly":true}}"#;
        assert_eq!(json, expected, "request wire format changed");
    }

    #[test]
    fn test_request_body_omits_unset_fields() {
        let body = PromotionRequestBody::build(
            &BaseOptions::default(),
            PromotionTypeOptions {
                deployment_id: Some("0Af000000000001".to_string()),
                ..Default::default()
            },
        );

        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(
            json,
            r#"{"promoteOptions":{"deploymentId":"0Af000000000001"}}"#
        );
    }

    #[test]
    fn test_result_serialization_skips_unknowns() {
        let started = PromotionResult::started("0Af000000000001AAA");
        assert_eq!(
            serde_json::to_string(&started).unwrap(),
            r#"{"jobId":"0Af000000000001AAA"}"#
        );
        assert!(!started.is_failure());

        let failed = PromotionResult::from_record(AsyncOperationRecord {
            id: "0Af000000000001AAA".to_string(),
            status: Some(AsyncOperationStatus::Error),
            message: Some("deploy failed".to_string()),
            error_details: None,
        });
        assert!(failed.is_failure());
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains(r#""status":"Error""#));
        assert!(!json.contains("errorDetails"));
    }

    #[test]
    fn test_test_level_parse() {
        assert_eq!("RunLocalTests".parse::<TestLevel>(), Ok(TestLevel::RunLocalTests));
        assert!("RunSomeTests".parse::<TestLevel>().is_err());
    }
}
