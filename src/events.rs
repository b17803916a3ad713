//! Change events and the subscription handle that carries them.
//!
//! A subscription is a bounded channel fed by a producer task (the
//! streaming client in production, the test itself in tests). The consumer
//! pulls events with [`EventSubscription::recv`] and ends the subscription by
//! calling [`EventSubscription::unsubscribe`] or simply dropping it; both
//! cancel the token the producer watches.

use crate::error::PromoteError;
use crate::status::AsyncOperationStatus;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Change-event channel for async operation records.
pub const ASYNC_OPERATION_CHANNEL: &str = "/data/sf_devops__Async_Operation_Result__ChangeEvent";

/// A change to one or more async operation records.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub channel: String,
    pub record_ids: Vec<String>,
    pub change_type: Option<String>,
    pub status: AsyncOperationStatus,
    pub message: Option<String>,
    pub error_details: Option<String>,
    pub replay_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    payload: RawPayload,
    #[serde(default)]
    event: Option<RawEventMeta>,
}

#[derive(Debug, Deserialize)]
struct RawEventMeta {
    #[serde(rename = "replayId")]
    replay_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(rename = "ChangeEventHeader")]
    header: RawHeader,
    #[serde(rename = "sf_devops__Status__c")]
    status: Option<String>,
    #[serde(rename = "sf_devops__Message__c")]
    message: Option<String>,
    #[serde(rename = "sf_devops__Error_Details__c")]
    error_details: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(rename = "recordIds", default)]
    record_ids: Vec<String>,
    #[serde(rename = "changeType")]
    change_type: Option<String>,
}

impl ChangeEvent {
    /// Parse the `data` member of a delivered streaming message.
    pub fn from_data(channel: &str, data: serde_json::Value) -> Result<Self, PromoteError> {
        let raw: RawEventData = serde_json::from_value(data)
            .map_err(|e| PromoteError::Stream(format!("malformed change event: {}", e)))?;

        Ok(Self {
            channel: channel.to_string(),
            record_ids: raw.payload.header.record_ids,
            change_type: raw.payload.header.change_type,
            status: AsyncOperationStatus::from_remote(raw.payload.status.as_deref()),
            message: raw.payload.message,
            error_details: raw.payload.error_details,
            replay_id: raw.event.and_then(|e| e.replay_id),
        })
    }

    /// Does this event touch the given record?
    pub fn affects(&self, record_id: &str) -> bool {
        self.record_ids.iter().any(|id| id == record_id)
    }
}

/// Producer half of a subscription.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Result<ChangeEvent, PromoteError>>,
    cancel: CancellationToken,
}

impl EventSender {
    /// Deliver an event. Returns false once the consumer is gone.
    pub async fn send(&self, event: Result<ChangeEvent, PromoteError>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(event).await.is_ok()
    }

    /// Token cancelled when the consumer unsubscribes.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Consumer half of a subscription.
#[derive(Debug)]
pub struct EventSubscription {
    channel: String,
    rx: mpsc::Receiver<Result<ChangeEvent, PromoteError>>,
    cancel: CancellationToken,
}

impl EventSubscription {
    /// Create a connected sender/subscription pair for `channel`.
    pub fn channel(channel: impl Into<String>, capacity: usize) -> (EventSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        (
            EventSender {
                tx,
                cancel: cancel.clone(),
            },
            Self {
                channel: channel.into(),
                rx,
                cancel,
            },
        )
    }

    pub fn channel_name(&self) -> &str {
        &self.channel
    }

    /// Next delivered item, or `None` when the producer has stopped.
    pub async fn recv(&mut self) -> Option<Result<ChangeEvent, PromoteError>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop the producer. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
