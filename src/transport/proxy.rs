//! Proxy relay channel
//!
//! The request description is POSTed to the relay's `/api/proxy` endpoint,
//! which performs it server-side and answers with the normalized exchange.

use std::time::Duration;

use async_trait::async_trait;

use super::{Channel, Exchange, OutboundRequest, RelayReply};
use crate::error::{PlaygroundError, Result};

/// Channel that relays requests through the proxy relay
#[derive(Debug, Clone)]
pub struct ProxyChannel {
    http: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
}

impl ProxyChannel {
    /// Create a proxy channel
    ///
    /// # Arguments
    ///
    /// * `http` - Shared HTTP client
    /// * `base_url` - Relay base URL, e.g. `http://localhost:3001`
    /// * `health_timeout` - Upper bound for a single health check
    pub fn new(http: reqwest::Client, base_url: &str, health_timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            health_timeout,
        }
    }

    /// Relay base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Ask the relay whether it is up
    ///
    /// Any failure, including a timeout, counts as unavailable.
    pub async fn check_health(&self) -> bool {
        let result = self
            .http
            .get(self.endpoint("/api/health"))
            .timeout(self.health_timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Proxy health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Channel for ProxyChannel {
    async fn send(&self, request: &OutboundRequest) -> Result<Exchange> {
        let response = self
            .http
            .post(self.endpoint("/api/proxy"))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                PlaygroundError::Transport(format!(
                    "proxy relay at {} is unreachable: {}",
                    self.base_url, e
                ))
            })?;

        let reply: RelayReply = response.json().await.map_err(|e| {
            PlaygroundError::Transport(format!("proxy relay sent an unreadable reply: {}", e))
        })?;

        match reply {
            RelayReply::Relayed(exchange) => Ok(exchange),
            RelayReply::Failed { error, .. } => Err(PlaygroundError::Transport(format!(
                "proxy relay could not reach {}: {}",
                request.url, error
            ))
            .into()),
        }
    }
}
