//! Direct channel
//!
//! Requests go straight from this process to the target. A request that
//! never gets a response is reported as [`PlaygroundError::CrossOrigin`], the
//! same class of failure a browser reports for a blocked cross-origin call,
//! so the caller can suggest switching to the proxy or extension channel.

use async_trait::async_trait;

use super::{execute, Channel, Exchange, OutboundRequest};
use crate::error::{PlaygroundError, Result};

/// Channel that performs requests itself
#[derive(Debug, Clone)]
pub struct DirectChannel {
    http: reqwest::Client,
}

impl DirectChannel {
    /// Create a direct channel on top of a shared HTTP client
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Channel for DirectChannel {
    async fn send(&self, request: &OutboundRequest) -> Result<Exchange> {
        match execute(&self.http, request).await {
            Ok(exchange) => Ok(exchange),
            Err(err) => {
                let unreachable = matches!(
                    err.downcast_ref::<PlaygroundError>(),
                    Some(PlaygroundError::Http(e)) if e.is_connect() || e.is_timeout() || e.is_request()
                );
                if unreachable {
                    tracing::warn!(url = %request.url, "Direct request failed: {}", err);
                    Err(PlaygroundError::CrossOrigin {
                        origin: request.origin(),
                    }
                    .into())
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel() -> DirectChannel {
        DirectChannel::new(reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_direct_send_decodes_json_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mcp"))
            .and(header("accept", "application/json"))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("WWW-Authenticate", "Bearer realm=\"mcp\"")
                    .set_body_json(json!({"error": "unauthorized"})),
            )
            .mount(&server)
            .await;

        let request = OutboundRequest::get_json(format!("{}/mcp", server.uri()));
        let exchange = channel().send(&request).await.unwrap();

        assert_eq!(exchange.response.status, 401);
        assert_eq!(exchange.response.status_text, "Unauthorized");
        assert_eq!(
            exchange.response.header("www-authenticate"),
            Some("Bearer realm=\"mcp\"")
        );
        assert_eq!(exchange.response.body, json!({"error": "unauthorized"}));
        assert_eq!(exchange.request, request);
    }

    #[tokio::test]
    async fn test_direct_send_keeps_text_bodies_and_sends_raw_strings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain text"))
            .mount(&server)
            .await;

        let request = OutboundRequest::new("POST", format!("{}/token", server.uri()))
            .with_body(json!("grant_type=authorization_code"));
        let exchange = channel().send(&request).await.unwrap();

        assert_eq!(exchange.response.status, 200);
        assert_eq!(exchange.response.body, json!("plain text"));
    }

    #[tokio::test]
    async fn test_unreachable_target_reports_cross_origin() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let request = OutboundRequest::get_json(format!("http://127.0.0.1:{}/mcp", port));
        let err = channel().send(&request).await.unwrap_err();

        match err.downcast_ref::<PlaygroundError>() {
            Some(PlaygroundError::CrossOrigin { origin }) => {
                assert_eq!(origin, &format!("http://127.0.0.1:{}", port));
            }
            other => panic!("expected CrossOrigin, got {:?}", other),
        }
    }
}
