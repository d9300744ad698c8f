//! Proxy relay server
//!
//! Performs requests on behalf of the flow when it runs in proxy mode.
//! `POST /api/proxy` takes an [`OutboundRequest`] and answers with the
//! resulting [`Exchange`](crate::transport::Exchange), or
//! `{error, request}` on failure. Both `/health` and `/api/health` report
//! liveness.

use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing, Json, Router};
use serde_json::{json, Value};

use crate::error::{PlaygroundError, Result};
use crate::transport::{execute, OutboundRequest};

#[derive(Clone)]
struct RelayState {
    http: reqwest::Client,
}

/// Build the relay router
pub fn router(http: reqwest::Client) -> Router {
    Router::new()
        .route("/health", routing::get(health))
        .route("/api/health", routing::get(health))
        .route("/api/proxy", routing::post(relay))
        .with_state(RelayState { http })
}

/// Bind `bind` and serve until the process exits
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(bind: &str, http: reqwest::Client) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| PlaygroundError::Config(format!("invalid bind address '{}': {}", bind, e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        PlaygroundError::Transport(format!("failed to bind proxy relay to {}: {}", addr, e))
    })?;
    let local = listener.local_addr()?;

    tracing::info!("Proxy relay listening on http://{}", local);
    tracing::info!("  Health: http://{}/health", local);
    tracing::info!("  Proxy:  POST http://{}/api/proxy", local);

    axum::serve(listener, router(http))
        .await
        .map_err(|e| PlaygroundError::Transport(format!("proxy relay failed: {}", e)))?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn relay(State(state): State<RelayState>, Json(payload): Json<Value>) -> impl IntoResponse {
    let has_url = payload
        .get("url")
        .and_then(Value::as_str)
        .is_some_and(|url| !url.is_empty());
    if !has_url {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "URL is required"})));
    }

    let request: OutboundRequest = match serde_json::from_value(payload.clone()) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("Malformed request: {}", e), "request": payload})),
            )
        }
    };

    tracing::info!("[PROXY] {} {}", request.method, request.url);
    tracing::debug!(headers = ?request.headers, "[PROXY] Headers");
    if let Some(body) = request.encoded_body() {
        tracing::debug!("[PROXY] Body: {}", body);
    }

    match execute(&state.http, &request).await {
        Ok(exchange) => {
            tracing::info!(
                "[PROXY] Response: {} ({}ms)",
                exchange.response.status,
                exchange.duration
            );
            tracing::debug!(headers = ?exchange.response.headers, "[PROXY] Response headers");
            tracing::debug!("[PROXY] Response body: {}", exchange.response.body);
            match serde_json::to_value(&exchange) {
                Ok(value) => (StatusCode::OK, Json(value)),
                Err(e) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": e.to_string(), "request": payload})),
                ),
            }
        }
        Err(e) => {
            tracing::error!("[PROXY] Error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string(), "request": payload})),
            )
        }
    }
}
