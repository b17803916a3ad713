//! The One Trait: DevopsBackend
//!
//! This is the single abstraction point for everything remote. The
//! promotion protocol, the monitor and the orchestrator are pure logic;
//! they don't know about REST, SOQL or the streaming transport. That's
//! the implementor's problem.

use crate::error::PromoteError;
use crate::events::EventSubscription;
use crate::types::*;
use std::future::Future;

/// Remote collaborator used by the promotion workflow.
///
/// Abstracts:
/// - Narrow fixed-projection queries (stages, async operations, deployment
///   results, named credentials, work items)
/// - The promotion POST
/// - The change-event subscription
///
/// Queries that expect exactly one row return [`PromoteError::NotFound`]
/// when the remote returns none.
pub trait DevopsBackend: Send + Sync {
    // ═══════════════════════════════════════════════════════════════
    // QUERIES (read-only)
    // ═══════════════════════════════════════════════════════════════

    /// Pipeline stage of `project_name` whose branch is `branch_name`.
    fn fetch_pipeline_stage(
        &self,
        project_name: &str,
        branch_name: &str,
    ) -> impl Future<Output = Result<PipelineStage, PromoteError>> + Send;

    /// Async operation record by id.
    fn fetch_async_operation(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<AsyncOperationRecord, PromoteError>> + Send;

    /// Deployment result produced by the given async job.
    fn fetch_deployment_result(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<DeploymentResult, PromoteError>> + Send;

    /// Endpoint URL of a named credential.
    fn fetch_named_credential_endpoint(
        &self,
        developer_name: &str,
    ) -> impl Future<Output = Result<String, PromoteError>> + Send;

    /// Work items belonging to any of the given change bundles.
    fn fetch_work_items(
        &self,
        change_bundle_ids: &[String],
    ) -> impl Future<Output = Result<Vec<WorkItem>, PromoteError>> + Send;

    // ═══════════════════════════════════════════════════════════════
    // REQUESTS
    // ═══════════════════════════════════════════════════════════════

    /// POST a promotion request. Remote failures come back as
    /// [`PromoteError::Api`] carrying the remote error code.
    fn send_promotion(
        &self,
        url: &str,
        body: &PromotionRequestBody,
    ) -> impl Future<Output = Result<PromotionResponse, PromoteError>> + Send;

    // ═══════════════════════════════════════════════════════════════
    // STREAMING
    // ═══════════════════════════════════════════════════════════════

    /// Subscribe to a change-event channel. Delivery starts once this
    /// resolves and stops when the returned handle is dropped.
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<EventSubscription, PromoteError>> + Send;
}
