//! Extension bridge channel
//!
//! Requests are posted to the bridge agent as correlated messages. Each call
//! registers a one-shot completion slot in a pending table keyed by request
//! ID; whichever of "reply arrived" and "timeout elapsed" removes the entry
//! first decides the outcome, and the other path finds nothing to do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use super::{Channel, Exchange, OutboundRequest};
use crate::bridge::{BridgeEnvelope, BridgeLink, BridgeMessage, BridgeReply, BridgeStats};
use crate::error::{PlaygroundError, Result};

type PendingTable = Arc<Mutex<HashMap<String, oneshot::Sender<BridgeReply>>>>;

/// Client side of the bridge protocol
#[derive(Debug, Clone)]
pub struct ExtensionChannel {
    outbound: mpsc::UnboundedSender<BridgeEnvelope>,
    pending: PendingTable,
    ready: watch::Receiver<bool>,
    timeout: Duration,
}

impl ExtensionChannel {
    /// Attach to a bridge and start routing its replies
    ///
    /// Spawns a task that resolves pending calls as replies arrive; replies
    /// whose request ID is no longer pending are dropped.
    pub fn connect(link: BridgeLink, timeout: Duration) -> Self {
        let BridgeLink {
            outbound,
            mut inbound,
            ready,
        } = link;
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

        let table = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(reply) = inbound.recv().await {
                let slot = take_pending(&table, &reply.request_id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => {
                        tracing::debug!(request_id = %reply.request_id, "Dropping uncorrelated bridge reply");
                    }
                }
            }
        });

        Self {
            outbound,
            pending,
            ready,
            timeout,
        }
    }

    /// Whether the bridge has signalled readiness
    pub fn is_available(&self) -> bool {
        *self.ready.borrow()
    }

    /// Subscribe to readiness changes
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }

    /// Number of calls awaiting a reply
    pub fn pending_requests(&self) -> usize {
        lock_table(&self.pending).len()
    }

    /// Fetch the bridge's request counters
    pub async fn stats(&self) -> Result<BridgeStats> {
        let data = self.call(BridgeMessage::GetStats).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Liveness check
    pub async fn ping(&self) -> Result<bool> {
        let data = self.call(BridgeMessage::Ping).await?;
        Ok(data.get("pong").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn call(&self, message: BridgeMessage) -> Result<Value> {
        if !self.is_available() {
            return Err(PlaygroundError::ExtensionUnavailable.into());
        }

        let request_id = format!("req_{}", uuid::Uuid::new_v4().simple());
        let (tx, rx) = oneshot::channel();
        lock_table(&self.pending).insert(request_id.clone(), tx);

        let envelope = BridgeEnvelope {
            request_id: request_id.clone(),
            message,
        };
        if self.outbound.send(envelope).is_err() {
            take_pending(&self.pending, &request_id);
            return Err(PlaygroundError::ExtensionUnavailable.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => match (reply.error, reply.data) {
                (Some(error), _) => Err(PlaygroundError::Bridge(error).into()),
                (None, Some(data)) => Ok(data),
                (None, None) => Err(PlaygroundError::Bridge("empty reply".to_string()).into()),
            },
            Ok(Err(_)) => Err(PlaygroundError::Transport(
                "extension bridge dropped the request".to_string(),
            )
            .into()),
            Err(_) => {
                take_pending(&self.pending, &request_id);
                tracing::warn!(request_id = %request_id, "Extension request timed out");
                Err(PlaygroundError::ExtensionTimeout {
                    seconds: self.timeout.as_secs(),
                }
                .into())
            }
        }
    }
}

#[async_trait]
impl Channel for ExtensionChannel {
    async fn send(&self, request: &OutboundRequest) -> Result<Exchange> {
        let data = self
            .call(BridgeMessage::ProxyRequest {
                req_data: request.clone(),
            })
            .await?;
        Ok(serde_json::from_value(data)?)
    }
}

fn lock_table(
    table: &PendingTable,
) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<BridgeReply>>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take_pending(table: &PendingTable, request_id: &str) -> Option<oneshot::Sender<BridgeReply>> {
    lock_table(table).remove(request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::LocalBridge;

    /// A bridge that is ready but never answers
    fn silent_link() -> (BridgeLink, mpsc::UnboundedReceiver<BridgeEnvelope>, watch::Sender<bool>, mpsc::UnboundedSender<BridgeReply>) {
        let (outbound, requests) = mpsc::unbounded_channel();
        let (replies, inbound) = mpsc::unbounded_channel();
        let (ready_tx, ready) = watch::channel(true);
        (
            BridgeLink {
                outbound,
                inbound,
                ready,
            },
            requests,
            ready_tx,
            replies,
        )
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let (link, _requests, _ready, _replies) = silent_link();
        let channel = ExtensionChannel::connect(link, Duration::from_millis(50));

        let err = channel
            .send(&OutboundRequest::get_json("https://mcp.example.com"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PlaygroundError>(),
            Some(PlaygroundError::ExtensionTimeout { .. })
        ));
        assert_eq!(channel.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_late_reply_after_timeout_is_ignored() {
        let (link, mut requests, _ready, replies) = silent_link();
        let channel = ExtensionChannel::connect(link, Duration::from_millis(20));

        let err = channel.ping().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlaygroundError>(),
            Some(PlaygroundError::ExtensionTimeout { .. })
        ));

        let envelope = requests.recv().await.unwrap();
        replies
            .send(BridgeReply {
                request_id: envelope.request_id,
                data: Some(serde_json::json!({"pong": true})),
                error: None,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(channel.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_unready_bridge_rejects_immediately() {
        let (link, _requests, ready, _replies) = silent_link();
        ready.send(false).unwrap();
        let channel = ExtensionChannel::connect(link, Duration::from_secs(30));

        assert!(!channel.is_available());
        let err = channel.ping().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlaygroundError>(),
            Some(PlaygroundError::ExtensionUnavailable)
        ));
        assert_eq!(channel.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_bridge_error_payload_surfaces() {
        let (link, mut requests, _ready, replies) = silent_link();
        let channel = ExtensionChannel::connect(link, Duration::from_secs(5));

        let responder = tokio::spawn(async move {
            let envelope = requests.recv().await.unwrap();
            replies
                .send(BridgeReply {
                    request_id: envelope.request_id,
                    data: None,
                    error: Some("Fetch failed: refused".to_string()),
                })
                .unwrap();
        });

        let err = channel
            .send(&OutboundRequest::get_json("https://mcp.example.com"))
            .await
            .unwrap_err();
        responder.await.unwrap();
        assert!(err.to_string().contains("Fetch failed: refused"));
    }

    #[tokio::test]
    async fn test_local_bridge_ping_and_stats() {
        let link = LocalBridge::spawn(reqwest::Client::new());
        let channel = ExtensionChannel::connect(link, Duration::from_secs(5));
        let mut ready = channel.readiness();
        ready.wait_for(|ready| *ready).await.unwrap();

        assert!(channel.ping().await.unwrap());
        assert_eq!(channel.stats().await.unwrap(), BridgeStats::default());
    }
}
