//! Bayeux (CometD) long-polling client for change-event channels.
//!
//! One subscription per handshake. After subscribing, a background task
//! runs the `/meta/connect` loop and forwards every message delivered on
//! the subscribed channel into the [`EventSubscription`]. The task stops
//! when the subscription is cancelled or dropped, or when the server
//! refuses to continue, and then sends a best-effort `/meta/disconnect`.

use crate::error::PromoteError;
use crate::events::{ChangeEvent, EventSender, EventSubscription};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Events buffered between the connect loop and the consumer.
const CHANNEL_CAPACITY: usize = 64;

const HANDSHAKE: &str = "/meta/handshake";
const SUBSCRIBE: &str = "/meta/subscribe";
const CONNECT: &str = "/meta/connect";
const DISCONNECT: &str = "/meta/disconnect";

/// Replay option asking for new events only.
const REPLAY_NEW_EVENTS: i64 = -1;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BayeuxMessage {
    channel: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    successful: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    advice: Option<Advice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Advice {
    #[serde(default)]
    reconnect: Option<String>,
}

impl BayeuxMessage {
    fn failed(&self) -> bool {
        self.successful == Some(false)
    }

    fn error_text(&self) -> String {
        self.error.clone().unwrap_or_else(|| "unknown error".into())
    }

    /// The server asks the client to stop or to start over with a new
    /// handshake. Neither is recoverable within one subscription.
    fn ends_session(&self) -> bool {
        matches!(
            self.advice.as_ref().and_then(|a| a.reconnect.as_deref()),
            Some("none") | Some("handshake")
        )
    }
}

/// Streaming API client bound to one org.
#[derive(Clone)]
pub struct StreamingClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl StreamingClient {
    /// `http` must keep cookies; the server pins the session with one.
    pub fn new(
        http: reqwest::Client,
        instance_url: &str,
        api_version: &str,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: format!("{}/cometd/{}", instance_url.trim_end_matches('/'), api_version),
            access_token: access_token.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Handshake, subscribe to `channel`, and start delivering events.
    pub async fn subscribe(&self, channel: &str) -> Result<EventSubscription, PromoteError> {
        let client_id = self.handshake().await?;
        self.subscribe_channel(&client_id, channel).await?;
        info!(channel, "subscribed to event channel");

        let (sender, subscription) = EventSubscription::channel(channel, CHANNEL_CAPACITY);
        let session = self.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            session.connect_loop(&client_id, &channel, &sender).await;
            session.disconnect(&client_id).await;
        });
        Ok(subscription)
    }

    async fn handshake(&self) -> Result<String, PromoteError> {
        let replies = self
            .exchange(json!([{
                "channel": HANDSHAKE,
                "version": "1.0",
                "minimumVersion": "1.0",
                "supportedConnectionTypes": ["long-polling"],
            }]))
            .await?;

        let reply = find_reply(&replies, HANDSHAKE)?;
        if reply.failed() {
            return Err(PromoteError::Stream(format!(
                "handshake rejected: {}",
                reply.error_text()
            )));
        }
        reply
            .client_id
            .clone()
            .ok_or_else(|| PromoteError::Stream("handshake reply carried no client id".into()))
    }

    async fn subscribe_channel(&self, client_id: &str, channel: &str) -> Result<(), PromoteError> {
        let replies = self
            .exchange(json!([{
                "channel": SUBSCRIBE,
                "clientId": client_id,
                "subscription": channel,
                "ext": { "replay": { channel: REPLAY_NEW_EVENTS } },
            }]))
            .await?;

        let reply = find_reply(&replies, SUBSCRIBE)?;
        if reply.failed() {
            return Err(PromoteError::Stream(format!(
                "subscription to {} rejected: {}",
                channel,
                reply.error_text()
            )));
        }
        Ok(())
    }

    async fn connect_loop(&self, client_id: &str, channel: &str, sender: &EventSender) {
        let cancel = sender.cancellation().clone();
        loop {
            let replies = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(channel, "subscription cancelled, leaving connect loop");
                    return;
                }
                replies = self.connect(client_id) => replies,
            };

            let replies = match replies {
                Ok(r) => r,
                Err(e) => {
                    warn!(channel, error = %e, "connect failed");
                    sender.send(Err(e)).await;
                    return;
                }
            };

            for message in replies {
                if message.channel == CONNECT {
                    if message.failed() || message.ends_session() {
                        let err = PromoteError::Stream(format!(
                            "server ended the session: {}",
                            message.error_text()
                        ));
                        sender.send(Err(err)).await;
                        return;
                    }
                    continue;
                }

                if message.channel != channel {
                    continue;
                }
                let Some(data) = message.data else {
                    continue;
                };
                if !sender.send(ChangeEvent::from_data(channel, data)).await {
                    return;
                }
            }
        }
    }

    async fn connect(&self, client_id: &str) -> Result<Vec<BayeuxMessage>, PromoteError> {
        self.exchange(json!([{
            "channel": CONNECT,
            "clientId": client_id,
            "connectionType": "long-polling",
        }]))
        .await
    }

    async fn disconnect(&self, client_id: &str) {
        let result = self
            .exchange(json!([{ "channel": DISCONNECT, "clientId": client_id }]))
            .await;
        if let Err(e) = result {
            debug!(error = %e, "disconnect failed");
        }
    }

    async fn exchange(&self, messages: Value) -> Result<Vec<BayeuxMessage>, PromoteError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&messages)
            .send()
            .await
            .map_err(|e| PromoteError::Stream(format!("streaming request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response".to_string());
            return Err(PromoteError::Stream(format!(
                "streaming endpoint returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PromoteError::Stream(format!("failed to parse streaming reply: {}", e)))
    }
}

fn find_reply<'a>(
    replies: &'a [BayeuxMessage],
    meta_channel: &str,
) -> Result<&'a BayeuxMessage, PromoteError> {
    replies
        .iter()
        .find(|m| m.channel == meta_channel)
        .ok_or_else(|| PromoteError::Stream(format!("no reply on {}", meta_channel)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let client = StreamingClient::new(
            reqwest::Client::new(),
            "https://acme.my.salesforce.com/",
            "58.0",
            "token",
        );
        assert_eq!(client.endpoint(), "https://acme.my.salesforce.com/cometd/58.0");
    }

    #[test]
    fn test_parse_connect_batch() {
        let raw = json!([
            {"channel": "/meta/connect", "successful": true, "advice": {"reconnect": "retry"}},
            {
                "channel": "/data/sf_devops__Async_Operation_Result__ChangeEvent",
                "data": {"payload": {"ChangeEventHeader": {"recordIds": ["0Af1"]}}}
            }
        ]);
        let replies: Vec<BayeuxMessage> = serde_json::from_value(raw).unwrap();
        assert_eq!(replies.len(), 2);
        assert!(!replies[0].failed());
        assert!(!replies[0].ends_session());
        assert!(replies[1].data.is_some());
        assert!(find_reply(&replies, CONNECT).is_ok());
        assert!(find_reply(&replies, HANDSHAKE).is_err());
    }

    #[test]
    fn test_rehandshake_advice_ends_session() {
        let reply: BayeuxMessage = serde_json::from_value(json!({
            "channel": "/meta/connect",
            "successful": false,
            "error": "403::Unknown client",
            "advice": {"reconnect": "handshake"}
        }))
        .unwrap();
        assert!(reply.failed());
        assert!(reply.ends_session());
        assert_eq!(reply.error_text(), "403::Unknown client");
    }
}
