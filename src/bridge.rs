//! Extension bridge agent
//!
//! The bridge is a privileged collaborator that performs requests on the
//! flow's behalf. It is reached only through message channels: the flow
//! posts a [`BridgeEnvelope`] and later receives a [`BridgeReply`] carrying
//! the same request ID. [`LocalBridge`] is an in-process implementation of
//! the agent side; the client side lives in
//! [`crate::transport::extension`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use crate::transport::{execute, OutboundRequest};

/// A message addressed to the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessage {
    /// Perform an HTTP request
    ProxyRequest {
        /// Request description
        #[serde(rename = "reqData")]
        req_data: OutboundRequest,
    },
    /// Report request counters
    GetStats,
    /// Liveness check
    Ping,
}

/// A message plus its correlation ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEnvelope {
    /// Correlation ID echoed in the reply
    pub request_id: String,
    /// The message itself
    #[serde(flatten)]
    pub message: BridgeMessage,
}

/// The bridge's answer to one envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeReply {
    /// Correlation ID of the envelope being answered
    pub request_id: String,
    /// Payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeReply {
    fn ok(request_id: String, data: Value) -> Self {
        Self {
            request_id,
            data: Some(data),
            error: None,
        }
    }

    fn failed(request_id: String, error: String) -> Self {
        Self {
            request_id,
            data: None,
            error: Some(error),
        }
    }
}

/// Request counters kept by the bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Proxy requests received
    pub total: u64,
    /// Proxy requests that got a response
    pub success: u64,
    /// Proxy requests that failed before a response
    pub failed: u64,
}

/// The flow's end of the bridge channels
#[derive(Debug)]
pub struct BridgeLink {
    /// Envelopes to the bridge
    pub outbound: mpsc::UnboundedSender<BridgeEnvelope>,
    /// Replies from the bridge
    pub inbound: mpsc::UnboundedReceiver<BridgeReply>,
    /// Readiness marker; `true` once the bridge accepts envelopes
    pub ready: watch::Receiver<bool>,
}

/// In-process bridge agent
#[derive(Debug)]
pub struct LocalBridge {
    http: reqwest::Client,
    stats: BridgeStats,
}

impl LocalBridge {
    /// Spawn the agent on the current Tokio runtime
    ///
    /// Returns the channels the flow uses to talk to it. The agent stops when
    /// the outbound sender is dropped.
    pub fn spawn(http: reqwest::Client) -> BridgeLink {
        let (outbound, requests) = mpsc::unbounded_channel();
        let (replies, inbound) = mpsc::unbounded_channel();
        // Envelopes queue up as soon as the channel exists, so the bridge is
        // ready before its task first runs.
        let (ready_tx, ready) = watch::channel(true);

        let bridge = LocalBridge {
            http,
            stats: BridgeStats::default(),
        };
        tokio::spawn(bridge.run(requests, replies, ready_tx));

        BridgeLink {
            outbound,
            inbound,
            ready,
        }
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<BridgeEnvelope>,
        replies: mpsc::UnboundedSender<BridgeReply>,
        ready: watch::Sender<bool>,
    ) {
        tracing::debug!("Extension bridge ready");

        while let Some(envelope) = requests.recv().await {
            let reply = self.handle(envelope).await;
            if replies.send(reply).is_err() {
                break;
            }
        }

        let _ = ready.send(false);
        tracing::debug!("Extension bridge stopped");
    }

    async fn handle(&mut self, envelope: BridgeEnvelope) -> BridgeReply {
        let request_id = envelope.request_id;
        match envelope.message {
            BridgeMessage::ProxyRequest { req_data } => {
                self.stats.total += 1;
                tracing::debug!(request_id = %request_id, url = %req_data.url, "Bridge performing request");
                match execute(&self.http, &req_data).await {
                    Ok(exchange) => {
                        self.stats.success += 1;
                        match serde_json::to_value(&exchange) {
                            Ok(data) => BridgeReply::ok(request_id, data),
                            Err(e) => BridgeReply::failed(request_id, e.to_string()),
                        }
                    }
                    Err(e) => {
                        self.stats.failed += 1;
                        BridgeReply::failed(request_id, format!("Fetch failed: {}", e))
                    }
                }
            }
            BridgeMessage::GetStats => match serde_json::to_value(self.stats) {
                Ok(data) => BridgeReply::ok(request_id, data),
                Err(e) => BridgeReply::failed(request_id, e.to_string()),
            },
            BridgeMessage::Ping => BridgeReply::ok(request_id, json!({"pong": true})),
        }
    }
}
