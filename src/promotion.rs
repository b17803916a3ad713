//! Promotion request protocol.
//!
//! Builds the promotion request, sends it, and retries while the remote
//! reports that source-control events are still being synchronized.

use crate::backend::DevopsBackend;
use crate::error::PromoteError;
use crate::output::Reporter;
use crate::types::*;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Path appended to the named credential endpoint to reach the promotion API.
pub const PROMOTION_API_PATH: &str = "/services/apexrest/sf_devops/v1/pipeline";

/// Bounded fixed-backoff retry for synchronization conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Sleep between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 50,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Picks the stage a promotion moves changes out of.
pub type SourceStageResolver = fn(&PipelineStage) -> Result<String, PromoteError>;

/// Sequential promotion: from the previous stage, or from the approved
/// work items when promoting into the first stage.
pub fn sequential_source_stage(target: &PipelineStage) -> Result<String, PromoteError> {
    Ok(target
        .previous_stage_id()
        .unwrap_or(APPROVED_STAGE)
        .to_string())
}

/// Quick promotion: always from the previous stage. The first stage has
/// nothing to quick-deploy from.
pub fn quick_source_stage(target: &PipelineStage) -> Result<String, PromoteError> {
    target
        .previous_stage_id()
        .map(str::to_string)
        .ok_or_else(|| {
            PromoteError::InvalidState(format!(
                "quick promotion into stage {} requires a previous stage",
                target.id
            ))
        })
}

/// What differs between the promotion commands.
#[derive(Debug, Clone)]
pub struct PromotionVariant {
    pub name: &'static str,
    pub source_stage: SourceStageResolver,
    pub type_options: PromotionTypeOptions,
}

impl PromotionVariant {
    /// Regular promotion of the changes waiting in the previous stage.
    pub fn start(undeployed_only: bool) -> Self {
        Self {
            name: "start",
            source_stage: sequential_source_stage,
            type_options: PromotionTypeOptions {
                undeployed_only: Some(undeployed_only),
                ..Default::default()
            },
        }
    }

    /// Check-only promotion: deployment is validated, nothing is committed.
    pub fn validate(undeployed_only: bool) -> Self {
        Self {
            name: "validate",
            source_stage: sequential_source_stage,
            type_options: PromotionTypeOptions {
                undeployed_only: Some(undeployed_only),
                check_deploy: Some(true),
                ..Default::default()
            },
        }
    }

    /// Quick deploy of a previously validated deployment.
    pub fn quick(deployment_id: impl Into<String>) -> Self {
        Self {
            name: "quick",
            source_stage: quick_source_stage,
            type_options: PromotionTypeOptions {
                deployment_id: Some(deployment_id.into()),
                ..Default::default()
            },
        }
    }

    pub fn is_check_deploy(&self) -> bool {
        self.type_options.check_deploy == Some(true)
    }
}

/// `{base_url}/{project_id}/pipelineName/{source_stage_id}`
pub fn promotion_url(base_url: &str, project_id: &str, source_stage_id: &str) -> String {
    format!(
        "{}/{}/pipelineName/{}",
        base_url.trim_end_matches('/'),
        project_id,
        source_stage_id
    )
}

/// Sends promotion requests through a backend.
pub struct PromotionProtocol<'a, B: DevopsBackend, R: Reporter> {
    backend: &'a B,
    reporter: &'a R,
    policy: RetryPolicy,
}

impl<'a, B: DevopsBackend, R: Reporter> PromotionProtocol<'a, B, R> {
    pub fn new(backend: &'a B, reporter: &'a R, policy: RetryPolicy) -> Self {
        Self {
            backend,
            reporter,
            policy,
        }
    }

    /// Request a promotion into `target` and return the remote job id.
    pub async fn request_promotion_flow(
        &self,
        base_url: &str,
        target: &PipelineStage,
        base: &BaseOptions,
        variant: &PromotionVariant,
    ) -> Result<String, PromoteError> {
        let source_stage_id = (variant.source_stage)(target)?;
        let url = promotion_url(base_url, &target.project_id, &source_stage_id);
        let body = PromotionRequestBody::build(base, variant.type_options.clone());

        info!(
            variant = variant.name,
            target_stage = %target.id,
            source_stage = %source_stage_id,
            "requesting promotion"
        );

        self.send_with_retry(&url, &body).await
    }

    /// Send `body` to `url`, retrying conflicts per the policy.
    pub async fn send_with_retry(
        &self,
        url: &str,
        body: &PromotionRequestBody,
    ) -> Result<String, PromoteError> {
        let mut retries_left = self.policy.max_retries;
        let mut attempt: u32 = 0;
        let mut syncing = false;

        loop {
            attempt += 1;
            match self.backend.send_promotion(url, body).await {
                Ok(response) => {
                    if syncing {
                        self.reporter.sync_finished(true);
                    }
                    debug!(attempt, job_id = %response.job_id, "promotion accepted");
                    return Ok(response.job_id);
                }
                Err(e) if e.is_conflict() && retries_left > 0 => {
                    if !syncing {
                        self.reporter.sync_started();
                        syncing = true;
                    }
                    retries_left -= 1;
                    debug!(attempt, retries_left, "synchronization in progress, retrying");
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => {
                    if syncing {
                        self.reporter.sync_finished(false);
                    }
                    warn!(attempt, code = e.code(), "promotion request failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(previous: Option<&str>) -> PipelineStage {
        PipelineStage {
            id: "stage-uat".to_string(),
            branch_name: "uat".to_string(),
            project_id: "proj-1".to_string(),
            previous_stage_ids: previous.map(|p| vec![p.to_string()]).unwrap_or_default(),
        }
    }

    #[test]
    fn test_sequential_source_stage() {
        assert_eq!(sequential_source_stage(&stage(None)).unwrap(), "Approved");
        assert_eq!(
            sequential_source_stage(&stage(Some("stage-int"))).unwrap(),
            "stage-int"
        );
    }

    #[test]
    fn test_quick_source_stage_requires_previous() {
        assert_eq!(
            quick_source_stage(&stage(Some("stage-int"))).unwrap(),
            "stage-int"
        );
        assert!(matches!(
            quick_source_stage(&stage(None)),
            Err(PromoteError::InvalidState(_))
        ));
    }

    #[test]
    fn test_promotion_url() {
        assert_eq!(
            promotion_url("https://x.example.com/api/", "proj-1", "Approved"),
            "https://x.example.com/api/proj-1/pipelineName/Approved"
        );
    }

    #[test]
    fn test_variants() {
        let start = PromotionVariant::start(true);
        assert_eq!(start.type_options.undeployed_only, Some(true));
        assert!(!start.is_check_deploy());

        let validate = PromotionVariant::validate(false);
        assert!(validate.is_check_deploy());

        let quick = PromotionVariant::quick("0Af000000000DEP");
        assert_eq!(
            quick.type_options.deployment_id.as_deref(),
            Some("0Af000000000DEP")
        );
        assert_eq!(quick.type_options.undeployed_only, None);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 50);
        assert_eq!(policy.backoff, Duration::from_secs(2));
    }
}
