//! Async job monitor.
//!
//! Watches the change-event channel for one async operation record and
//! yields a snapshot for every event that concerns it. The caller decides
//! whether to keep waiting; [`JobWatch::wait_for_completion`] is the common
//! "block until the job is done" loop.
//!
//! A watch ends in one of four ways:
//! - a `Completed` or `Error` event for the watched record,
//! - the wait duration elapsing ([`PromoteError::ClientTimeout`]),
//! - the cancellation token firing,
//! - the event stream failing or closing.
//!
//! Only the watch ends. The remote job keeps running either way.

use crate::backend::DevopsBackend;
use crate::error::PromoteError;
use crate::events::{ChangeEvent, EventSubscription, ASYNC_OPERATION_CHANNEL};
use crate::output::Reporter;
use crate::status::AsyncOperationStatus;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Deadline used when `now + wait` does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// State of the watched job as carried by one event.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: AsyncOperationStatus,
    pub message: Option<String>,
    pub error_details: Option<String>,
}

impl JobSnapshot {
    fn from_event(job_id: &str, event: ChangeEvent) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: event.status,
            message: event.message,
            error_details: event.error_details,
        }
    }
}

/// How a completed wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// The job reached a status that ends the watch.
    Finished(JobSnapshot),
    /// The caller cancelled before the job finished.
    Cancelled,
}

fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

enum Wake {
    Cancelled,
    Deadline,
    Item(Option<Result<ChangeEvent, PromoteError>>),
}

/// An open watch on one job.
pub struct JobWatch {
    job_id: String,
    subscription: EventSubscription,
    deadline: Instant,
    cancel: CancellationToken,
}

impl JobWatch {
    /// Subscribe to async operation changes and watch `job_id` for at most
    /// `wait`.
    pub async fn start<B: DevopsBackend>(
        backend: &B,
        job_id: &str,
        wait: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, PromoteError> {
        let subscription = backend.subscribe(ASYNC_OPERATION_CHANNEL).await?;
        info!(job_id, wait_secs = wait.as_secs(), "watching job");
        Ok(Self::from_subscription(job_id, subscription, wait, cancel))
    }

    /// Watch over an already-open subscription.
    pub fn from_subscription(
        job_id: impl Into<String>,
        subscription: EventSubscription,
        wait: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            subscription,
            deadline: deadline_after(wait),
            cancel,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the next event about the watched job.
    ///
    /// Returns `Ok(None)` when cancelled. Events for other records or other
    /// channels are skipped without affecting the watch.
    pub async fn next_snapshot(&mut self) -> Result<Option<JobSnapshot>, PromoteError> {
        loop {
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                _ = tokio::time::sleep_until(self.deadline) => Wake::Deadline,
                item = self.subscription.recv() => Wake::Item(item),
            };

            match wake {
                Wake::Cancelled => {
                    debug!(job_id = %self.job_id, "watch cancelled");
                    self.subscription.unsubscribe();
                    return Ok(None);
                }
                Wake::Deadline => {
                    self.subscription.unsubscribe();
                    return Err(PromoteError::ClientTimeout {
                        job_id: self.job_id.clone(),
                    });
                }
                Wake::Item(None) => {
                    return Err(PromoteError::Stream(format!(
                        "event stream closed before job {} finished",
                        self.job_id
                    )));
                }
                Wake::Item(Some(Err(e))) => {
                    self.subscription.unsubscribe();
                    return Err(e);
                }
                Wake::Item(Some(Ok(event))) => {
                    if event.channel != self.subscription.channel_name()
                        || !event.affects(&self.job_id)
                    {
                        trace!(job_id = %self.job_id, records = ?event.record_ids, "ignoring event");
                        continue;
                    }
                    return Ok(Some(JobSnapshot::from_event(&self.job_id, event)));
                }
            }
        }
    }

    /// Block until the job finishes, the wait expires, or the caller cancels.
    ///
    /// Error details are passed to the reporter as soon as any event carries
    /// them, not only on the final event.
    pub async fn wait_for_completion<R: Reporter>(
        mut self,
        reporter: &R,
    ) -> Result<MonitorOutcome, PromoteError> {
        while let Some(snapshot) = self.next_snapshot().await? {
            if let Some(details) = &snapshot.error_details {
                reporter.error_details(&self.job_id, details);
            }

            if snapshot.status.ends_watch() {
                info!(job_id = %self.job_id, status = %snapshot.status, "job finished");
                self.subscription.unsubscribe();
                return Ok(MonitorOutcome::Finished(snapshot));
            }

            debug!(job_id = %self.job_id, status = %snapshot.status, "job still running");
            reporter.progress(&snapshot);
        }
        Ok(MonitorOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSender;
    use crate::output::NullReporter;

    const JOB: &str = "0Af000000000001AAA";

    fn event(channel: &str, record_id: &str, status: AsyncOperationStatus) -> ChangeEvent {
        ChangeEvent {
            channel: channel.to_string(),
            record_ids: vec![record_id.to_string()],
            change_type: Some("UPDATE".to_string()),
            status,
            message: None,
            error_details: None,
            replay_id: None,
        }
    }

    fn watch(wait: Duration) -> (EventSender, JobWatch, CancellationToken) {
        let (sender, sub) = EventSubscription::channel(ASYNC_OPERATION_CHANNEL, 16);
        let cancel = CancellationToken::new();
        let watch = JobWatch::from_subscription(JOB, sub, wait, cancel.clone());
        (sender, watch, cancel)
    }

    #[tokio::test]
    async fn test_unrelated_events_do_not_complete() {
        let (sender, watch, _) = watch(Duration::from_secs(5));

        sender
            .send(Ok(event(
                ASYNC_OPERATION_CHANNEL,
                "0Af000000000002AAA",
                AsyncOperationStatus::InProgress,
            )))
            .await;
        sender
            .send(Ok(event(
                "/data/SomethingElse__ChangeEvent",
                JOB,
                AsyncOperationStatus::Completed,
            )))
            .await;
        sender
            .send(Ok(event(ASYNC_OPERATION_CHANNEL, JOB, AsyncOperationStatus::Completed)))
            .await;

        let outcome = watch.wait_for_completion(&NullReporter).await.unwrap();
        match outcome {
            MonitorOutcome::Finished(snapshot) => {
                assert_eq!(snapshot.job_id, JOB);
                assert_eq!(snapshot.status, AsyncOperationStatus::Completed);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn test_ignored_keeps_listening_error_finishes() {
        let (sender, watch, _) = watch(Duration::from_secs(5));

        sender
            .send(Ok(event(ASYNC_OPERATION_CHANNEL, JOB, AsyncOperationStatus::Ignored)))
            .await;
        let mut failed = event(ASYNC_OPERATION_CHANNEL, JOB, AsyncOperationStatus::Error);
        failed.error_details = Some("component failure".to_string());
        sender.send(Ok(failed)).await;

        match watch.wait_for_completion(&NullReporter).await.unwrap() {
            MonitorOutcome::Finished(snapshot) => {
                assert_eq!(snapshot.status, AsyncOperationStatus::Error);
                assert_eq!(snapshot.error_details.as_deref(), Some("component failure"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_next_snapshot_yields_in_progress() {
        let (sender, mut watch, _) = watch(Duration::from_secs(5));
        sender
            .send(Ok(event(ASYNC_OPERATION_CHANNEL, JOB, AsyncOperationStatus::InProgress)))
            .await;

        let snapshot = watch.next_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.status, AsyncOperationStatus::InProgress);
    }

    #[tokio::test]
    async fn test_timeout_is_client_timeout() {
        let (sender, watch, _) = watch(Duration::from_millis(50));

        let err = watch.wait_for_completion(&NullReporter).await.unwrap_err();
        assert!(matches!(err, PromoteError::ClientTimeout { ref job_id } if job_id == JOB));
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_ends_watch() {
        let (sender, watch, cancel) = watch(Duration::from_secs(60));
        cancel.cancel();

        let outcome = watch.wait_for_completion(&NullReporter).await.unwrap();
        assert_eq!(outcome, MonitorOutcome::Cancelled);
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn test_unbounded_wait_still_watches() {
        let (sender, watch, _) = watch(Duration::MAX);
        sender
            .send(Ok(event(ASYNC_OPERATION_CHANNEL, JOB, AsyncOperationStatus::Completed)))
            .await;

        let outcome = watch.wait_for_completion(&NullReporter).await.unwrap();
        assert!(matches!(outcome, MonitorOutcome::Finished(_)));
    }

    #[test]
    fn test_deadline_after_never_overflows() {
        let now = Instant::now();
        assert!(deadline_after(Duration::MAX) > now);
        assert!(deadline_after(Duration::from_secs(2e17 as u64 * 60)) > now);
        assert!(deadline_after(Duration::from_secs(60)) <= Instant::now() + Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        let (sender, watch, _) = watch(Duration::from_secs(5));
        sender
            .send(Err(PromoteError::Stream("handshake rejected".into())))
            .await;

        let err = watch.wait_for_completion(&NullReporter).await.unwrap_err();
        assert!(matches!(err, PromoteError::Stream(msg) if msg == "handshake rejected"));
    }

    #[tokio::test]
    async fn test_closed_stream_is_error() {
        let (sender, watch, _) = watch(Duration::from_secs(5));
        drop(sender);

        let err = watch.wait_for_completion(&NullReporter).await.unwrap_err();
        assert!(matches!(err, PromoteError::Stream(_)));
    }
}
