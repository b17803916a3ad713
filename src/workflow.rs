//! Job Lifecycle Orchestrator
//!
//! Sequences stage lookup, the promotion request, the cache write, the
//! watch and the final re-fetch into the command shapes the CLI exposes:
//! start (sync or async), resume, report, and quick-deploy id lookup.
//! No transport, no file I/O of its own. Just ordering.

use crate::backend::DevopsBackend;
use crate::cache::{CachePayload, CacheStore, JobCache};
use crate::error::PromoteError;
use crate::monitor::{JobWatch, MonitorOutcome};
use crate::output::Reporter;
use crate::promotion::{PromotionProtocol, PromotionVariant, RetryPolicy, PROMOTION_API_PATH};
use crate::status::{is_not_resumable, AsyncOperationStatus};
use crate::types::*;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest wait a synchronous command accepts.
pub const MIN_WAIT: Duration = Duration::from_secs(3 * 60);
/// Wait used when the caller gives none.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(33 * 60);

/// Workflow configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Conflict retry policy for the promotion request.
    pub retry: RetryPolicy,
    /// Developer name of the named credential fronting the promotion API.
    pub named_credential: String,
    /// Lower bound for caller-supplied waits.
    pub min_wait: Duration,
    /// Wait applied when the caller gives none.
    pub default_wait: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            named_credential: "sf_devops_NamedCredential".to_string(),
            min_wait: MIN_WAIT,
            default_wait: DEFAULT_WAIT,
        }
    }
}

/// Input of a promotion command.
#[derive(Debug, Clone, Default)]
pub struct PromoteArgs {
    pub project_name: String,
    pub branch_name: String,
    pub base: BaseOptions,
    /// How long to watch. `None` means the configured default.
    pub wait: Option<Duration>,
    /// Return right after the job is created.
    pub is_async: bool,
}

impl PromoteArgs {
    /// Reject bad flag combinations before anything touches the network.
    pub fn validate(&self, min_wait: Duration) -> Result<(), PromoteError> {
        if self.project_name.trim().is_empty() {
            return Err(PromoteError::Validation("a project name is required".into()));
        }
        if self.branch_name.trim().is_empty() {
            return Err(PromoteError::Validation("a branch name is required".into()));
        }
        if self.is_async && self.wait.is_some() {
            return Err(PromoteError::Validation(
                "--wait and --async cannot be used together".into(),
            ));
        }
        validate_wait(self.wait, min_wait)?;

        let specified = self.base.test_level == Some(TestLevel::RunSpecifiedTests);
        match (specified, self.base.run_tests.is_empty()) {
            (true, true) => Err(PromoteError::Validation(
                "RunSpecifiedTests requires at least one test".into(),
            )),
            (false, false) => Err(PromoteError::Validation(
                "tests can only be given with the RunSpecifiedTests test level".into(),
            )),
            _ => Ok(()),
        }
    }
}

fn validate_wait(wait: Option<Duration>, min_wait: Duration) -> Result<(), PromoteError> {
    match wait {
        Some(w) if w < min_wait => Err(PromoteError::Validation(format!(
            "wait must be at least {} minutes",
            min_wait.as_secs() / 60
        ))),
        _ => Ok(()),
    }
}

/// Which existing job a resume/report/quick command targets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSelector {
    pub use_most_recent: bool,
    pub job_id: Option<String>,
}

impl JobSelector {
    pub fn by_id(job_id: impl Into<String>) -> Self {
        Self {
            use_most_recent: false,
            job_id: Some(job_id.into()),
        }
    }

    pub fn most_recent() -> Self {
        Self {
            use_most_recent: true,
            job_id: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.use_most_recent && self.job_id.is_none()
    }

    /// Exactly one of job id and most-recent must be set.
    pub fn validate(&self) -> Result<(), PromoteError> {
        match (self.use_most_recent, self.job_id.is_some()) {
            (true, true) => Err(PromoteError::Validation(
                "--job-id and --use-most-recent cannot be used together".into(),
            )),
            (false, false) => Err(PromoteError::Validation(
                "either --job-id or --use-most-recent is required".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Point-in-time view of a job for the report command.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub result: PromotionResult,
    pub deployment: Option<DeploymentResult>,
    pub work_items: Vec<WorkItem>,
}

/// The orchestrator.
///
/// Parameterized by the backend, the cache store and the reporter. Built
/// once per command invocation.
pub struct PromotionWorkflow<'a, B: DevopsBackend, S: CacheStore, R: Reporter> {
    backend: &'a B,
    cache: &'a JobCache<S>,
    reporter: &'a R,
    config: WorkflowConfig,
    cancel: CancellationToken,
}

impl<'a, B: DevopsBackend, S: CacheStore, R: Reporter> PromotionWorkflow<'a, B, S, R> {
    pub fn new(
        backend: &'a B,
        cache: &'a JobCache<S>,
        reporter: &'a R,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            reporter,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that ends any watch this workflow runs. The remote job is not
    /// affected.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════
    // COMMANDS
    // ═══════════════════════════════════════════════════════════════

    /// Request a promotion and, unless async, watch it to the end.
    ///
    /// Async mode returns a result carrying only the job id.
    pub async fn start(
        &self,
        variant: &PromotionVariant,
        args: &PromoteArgs,
    ) -> Result<PromotionResult, PromoteError> {
        args.validate(self.config.min_wait)?;

        let target = self
            .backend
            .fetch_pipeline_stage(&args.project_name, &args.branch_name)
            .await?;
        let source_stage_id = (variant.source_stage)(&target)?;

        let endpoint = self
            .backend
            .fetch_named_credential_endpoint(&self.config.named_credential)
            .await?;
        let base_url = format!("{}{}", endpoint.trim_end_matches('/'), PROMOTION_API_PATH);

        let protocol = PromotionProtocol::new(self.backend, self.reporter, self.config.retry);
        let job_id = protocol
            .request_promotion_flow(&base_url, &target, &args.base, variant)
            .await?;

        self.reporter.job_started(&job_id);
        self.cache
            .set(&job_id, job_payload(variant, &target, &source_stage_id))
            .await
            .map_err(|e| match e {
                PromoteError::Storage(msg) => PromoteError::Storage(format!(
                    "job {} started but could not be cached: {}",
                    job_id, msg
                )),
                other => other,
            })?;

        if args.is_async {
            info!(job_id = %job_id, "promotion started asynchronously");
            return Ok(PromotionResult::started(job_id));
        }

        let wait = args.wait.unwrap_or(self.config.default_wait);
        self.watch_to_end(&job_id, wait, variant.is_check_deploy())
            .await
    }

    /// Keep watching a job started earlier.
    pub async fn resume(
        &self,
        selector: &JobSelector,
        wait: Option<Duration>,
    ) -> Result<PromotionResult, PromoteError> {
        selector.validate()?;
        validate_wait(wait, self.config.min_wait)?;

        let job_id = self.resolve_job_id(selector).await?;
        let record = self.fetch_record(&job_id).await?;
        if is_not_resumable(record.status) {
            let status = record.status.unwrap_or_default();
            return Err(PromoteError::JobNotResumable {
                job_id,
                status: status.to_string(),
            });
        }

        let check_deploy = self.cached_check_deploy(&job_id).await;
        let wait = wait.unwrap_or(self.config.default_wait);
        info!(job_id = %job_id, "resuming watch");
        self.watch_to_end(&job_id, wait, check_deploy).await
    }

    /// Single fetch of a job's current state. With `details`, also the
    /// deployment result and the promoted work items.
    pub async fn report(
        &self,
        selector: &JobSelector,
        details: bool,
    ) -> Result<JobReport, PromoteError> {
        selector.validate()?;

        let job_id = self.resolve_job_id(selector).await?;
        let record = self.fetch_record(&job_id).await?;
        let mut result = PromotionResult::from_record(record);

        if !details || !result.status.is_some_and(|s| s.is_terminal()) {
            return Ok(JobReport {
                result,
                deployment: None,
                work_items: Vec::new(),
            });
        }

        let deployment = match self.backend.fetch_deployment_result(&job_id).await {
            Ok(d) => Some(d),
            Err(PromoteError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };

        let work_items = match &deployment {
            Some(d) if !d.change_bundle_ids.is_empty() => {
                self.backend.fetch_work_items(&d.change_bundle_ids).await?
            }
            _ => Vec::new(),
        };

        if let Some(d) = &deployment {
            if d.check_deploy && result.status == Some(AsyncOperationStatus::Completed) {
                result.deployment_id = d.deployment_id.clone();
            }
        }

        Ok(JobReport {
            result,
            deployment,
            work_items,
        })
    }

    /// Deployment id for a quick promotion: given directly, or taken from
    /// the validated deployment of an earlier job.
    pub async fn quick_deployment_id(
        &self,
        deployment_id: Option<&str>,
        selector: &JobSelector,
    ) -> Result<String, PromoteError> {
        match deployment_id {
            Some(_) if !selector.is_empty() => {
                return Err(PromoteError::Validation(
                    "--deployment-id cannot be combined with --job-id or --use-most-recent".into(),
                ));
            }
            Some(id) if !id.is_empty() => return Ok(id.to_string()),
            Some(_) => return Err(PromoteError::Validation("empty deployment id".into())),
            None => selector.validate()?,
        }

        let job_id = self.resolve_job_id(selector).await?;
        let deployment = match self.backend.fetch_deployment_result(&job_id).await {
            Err(PromoteError::NotFound { .. }) => return Err(PromoteError::InvalidJobId(job_id)),
            other => other?,
        };
        if !deployment.check_deploy {
            return Err(PromoteError::Validation(format!(
                "job {} was not a validation; only validated deployments can be quick-deployed",
                job_id
            )));
        }
        deployment.deployment_id.ok_or_else(|| {
            PromoteError::InvalidState(format!("job {} has no deployment id yet", job_id))
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════

    async fn resolve_job_id(&self, selector: &JobSelector) -> Result<String, PromoteError> {
        self.cache
            .resolve_latest(selector.use_most_recent, selector.job_id.as_deref())
            .await
    }

    /// Fetch the async operation record, reporting an unknown id as an
    /// invalid job id.
    async fn fetch_record(&self, job_id: &str) -> Result<AsyncOperationRecord, PromoteError> {
        match self.backend.fetch_async_operation(job_id).await {
            Err(PromoteError::NotFound { .. }) => Err(PromoteError::InvalidJobId(job_id.to_string())),
            other => other,
        }
    }

    async fn cached_check_deploy(&self, job_id: &str) -> bool {
        match self.cache.get(job_id).await {
            Ok(Some(entry)) => entry
                .payload
                .get("checkDeploy")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                warn!(job_id, error = %e, "could not read job cache");
                false
            }
        }
    }

    /// Watch until the job finishes, the wait expires or the caller
    /// cancels, then re-fetch the record for the final result.
    async fn watch_to_end(
        &self,
        job_id: &str,
        wait: Duration,
        check_deploy: bool,
    ) -> Result<PromotionResult, PromoteError> {
        let watch = JobWatch::start(self.backend, job_id, wait, self.cancel.child_token()).await?;

        let timed_out = match watch.wait_for_completion(self.reporter).await {
            Ok(MonitorOutcome::Finished(snapshot)) => {
                debug!(job_id, status = %snapshot.status, "watch finished");
                false
            }
            Ok(MonitorOutcome::Cancelled) => {
                info!(job_id, "watch cancelled, fetching current state");
                false
            }
            Err(PromoteError::ClientTimeout { .. }) => true,
            Err(e) => return Err(e),
        };

        let record = self.fetch_record(job_id).await?;
        let status = record.status.unwrap_or_default();
        if timed_out && !status.is_terminal() {
            warn!(job_id, "wait expired while job still running");
            return Err(PromoteError::WatchTimedOut {
                job_id: job_id.to_string(),
            });
        }

        let mut result = PromotionResult::from_record(record);
        if check_deploy && status == AsyncOperationStatus::Completed {
            match self.backend.fetch_deployment_result(job_id).await {
                Ok(deployment) => result.deployment_id = deployment.deployment_id,
                Err(PromoteError::NotFound { .. }) => {
                    debug!(job_id, "no deployment result for validated job");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }
}

/// What the cache remembers about a started job.
fn job_payload(
    variant: &PromotionVariant,
    target: &PipelineStage,
    source_stage_id: &str,
) -> CachePayload {
    let mut payload = CachePayload::new();
    payload.insert("variant".into(), Value::from(variant.name));
    payload.insert("projectId".into(), Value::from(target.project_id.as_str()));
    payload.insert("targetStage".into(), Value::from(target.id.as_str()));
    payload.insert("sourceStage".into(), Value::from(source_stage_id));
    payload.insert("checkDeploy".into(), Value::from(variant.is_check_deploy()));
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> PromoteArgs {
        PromoteArgs {
            project_name: "Release".to_string(),
            branch_name: "uat".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.retry.max_retries, 50);
        assert_eq!(config.min_wait, Duration::from_secs(180));
        assert_eq!(config.default_wait, Duration::from_secs(33 * 60));
    }

    #[test]
    fn test_wait_bounds() {
        let mut a = args();
        assert!(a.validate(MIN_WAIT).is_ok());

        a.wait = Some(Duration::from_secs(179));
        assert!(matches!(a.validate(MIN_WAIT), Err(PromoteError::Validation(_))));

        a.wait = Some(MIN_WAIT);
        assert!(a.validate(MIN_WAIT).is_ok());
    }

    #[test]
    fn test_wait_and_async_exclusive() {
        let mut a = args();
        a.is_async = true;
        assert!(a.validate(MIN_WAIT).is_ok());

        a.wait = Some(Duration::from_secs(600));
        assert!(matches!(a.validate(MIN_WAIT), Err(PromoteError::Validation(_))));
    }

    #[test]
    fn test_specified_tests_pairing() {
        let mut a = args();
        a.base.test_level = Some(TestLevel::RunSpecifiedTests);
        assert!(a.validate(MIN_WAIT).is_err());

        a.base.run_tests = vec!["AccountTest".to_string()];
        assert!(a.validate(MIN_WAIT).is_ok());

        a.base.test_level = Some(TestLevel::RunLocalTests);
        assert!(a.validate(MIN_WAIT).is_err());
    }

    #[test]
    fn test_missing_project_or_branch() {
        let mut a = args();
        a.project_name = " ".to_string();
        assert!(a.validate(MIN_WAIT).is_err());

        let mut b = args();
        b.branch_name.clear();
        assert!(b.validate(MIN_WAIT).is_err());
    }

    #[test]
    fn test_selector_validation() {
        assert!(JobSelector::most_recent().validate().is_ok());
        assert!(JobSelector::by_id("0Af000000000001AAA").validate().is_ok());
        assert!(JobSelector::default().validate().is_err());

        let both = JobSelector {
            use_most_recent: true,
            job_id: Some("0Af000000000001AAA".to_string()),
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_job_payload() {
        let target = PipelineStage {
            id: "stage-uat".to_string(),
            branch_name: "uat".to_string(),
            project_id: "proj-1".to_string(),
            previous_stage_ids: vec![],
        };
        let payload = job_payload(&PromotionVariant::validate(false), &target, "Approved");
        assert_eq!(payload["variant"], "validate");
        assert_eq!(payload["sourceStage"], "Approved");
        assert_eq!(payload["checkDeploy"], true);
    }
}
