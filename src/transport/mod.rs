//! Request transport for the auth flow
//!
//! Every network interaction the flow performs is described as an
//! [`OutboundRequest`] and comes back as an [`Exchange`], regardless of how
//! it travelled. Three channels exist:
//!
//! - [`direct::DirectChannel`] -- the request goes straight to the target.
//! - [`proxy::ProxyChannel`] -- the request is relayed through the proxy
//!   relay's `/api/proxy` endpoint.
//! - [`extension::ExtensionChannel`] -- the request is handed to the bridge
//!   agent over a message channel and correlated by request ID.
//!
//! [`Transport`] owns one of each and dispatches on [`RequestMode`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::LocalBridge;
use crate::config::Config;
use crate::error::{PlaygroundError, Result};

pub mod direct;
pub mod extension;
pub mod proxy;

pub use direct::DirectChannel;
pub use extension::ExtensionChannel;
pub use proxy::ProxyChannel;

/// How outbound requests reach their target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// Straight to the target
    Direct,
    /// Through the proxy relay
    #[default]
    Proxy,
    /// Through the extension bridge
    Extension,
}

impl RequestMode {
    /// All modes in display order
    pub const ALL: [RequestMode; 3] = [
        RequestMode::Direct,
        RequestMode::Proxy,
        RequestMode::Extension,
    ];

    /// Lowercase name used in config, CLI and persisted state
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMode::Direct => "direct",
            RequestMode::Proxy => "proxy",
            RequestMode::Extension => "extension",
        }
    }

    /// Mode implied by the legacy boolean `useDirectMode` flag
    pub fn from_legacy_flag(use_direct_mode: bool) -> Self {
        if use_direct_mode {
            RequestMode::Direct
        } else {
            RequestMode::Proxy
        }
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(RequestMode::Direct),
            "proxy" => Ok(RequestMode::Proxy),
            "extension" => Ok(RequestMode::Extension),
            other => Err(format!(
                "unknown request mode '{}': expected direct, proxy or extension",
                other
            )),
        }
    }
}

/// A request as the flow describes it, before any channel touches it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// HTTP method, upper case
    #[serde(default = "default_method")]
    pub method: String,
    /// Absolute target URL
    pub url: String,
    /// Request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Body; strings are sent verbatim, anything else as JSON text
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl OutboundRequest {
    /// Create a request with no headers and no body
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// A `GET` that asks for JSON
    pub fn get_json(url: impl Into<String>) -> Self {
        Self::new("GET", url).with_header("Accept", "application/json")
    }

    /// A `POST` with a JSON body
    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self::new("POST", url)
            .with_header("Content-Type", "application/json")
            .with_header("Accept", "application/json")
            .with_body(body)
    }

    /// Add or replace a header
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Body text as it goes on the wire
    ///
    /// `GET` requests never carry a body. String bodies are sent as-is
    /// (form-encoded token requests rely on this); any other value is
    /// serialized as JSON.
    pub fn encoded_body(&self) -> Option<String> {
        if self.method.eq_ignore_ascii_case("GET") {
            return None;
        }
        match &self.body {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// Scheme + host + port of the target, or the raw URL if unparseable
    pub fn origin(&self) -> String {
        url::Url::parse(&self.url)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|_| self.url.clone())
    }
}

/// A normalized response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    /// HTTP status code
    pub status: u16,
    /// Canonical reason phrase
    #[serde(default)]
    pub status_text: String,
    /// Headers with lowercase names
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON body when parseable, otherwise the raw text
    #[serde(default)]
    pub body: Value,
}

impl ResponseRecord {
    /// Look up a header case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body as parsed JSON, if it is JSON
    ///
    /// Bodies that arrived as text are parsed once more; a relay may have
    /// forwarded a JSON document as a string.
    pub fn json_body(&self) -> Option<Value> {
        match &self.body {
            Value::Null => None,
            Value::String(text) => serde_json::from_str(text).ok(),
            other => Some(other.clone()),
        }
    }
}

/// One request/response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    /// What was sent
    pub request: OutboundRequest,
    /// What came back
    pub response: ResponseRecord,
    /// Round-trip time in milliseconds
    #[serde(default)]
    pub duration: u64,
}

/// Reply shape of the proxy relay's `/api/proxy` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayReply {
    /// The upstream answered
    Relayed(Exchange),
    /// The relay could not reach the upstream
    Failed {
        /// Failure description
        error: String,
        /// Echo of the request the relay received
        #[serde(default)]
        request: Option<Value>,
    },
}

/// Parse a response body as JSON, falling back to the raw text
pub fn decode_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Collect response headers into a map with lowercase names
///
/// Repeated headers are joined with `", "`.
pub fn collect_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    let mut collected: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        collected
            .entry(name.as_str().to_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    collected
}

/// Perform a request with reqwest and normalize the result
///
/// Shared by the direct channel, the proxy relay and the bridge agent.
///
/// # Errors
///
/// Returns [`PlaygroundError::Http`] when the request cannot be sent or the
/// body cannot be read, and [`PlaygroundError::Transport`] for a method
/// reqwest does not accept.
pub async fn execute(http: &reqwest::Client, request: &OutboundRequest) -> Result<Exchange> {
    let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
        .map_err(|_| {
            PlaygroundError::Transport(format!("unsupported HTTP method: {}", request.method))
        })?;

    let mut builder = http.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.encoded_body() {
        builder = builder.body(body);
    }

    let started = Instant::now();
    let response = builder.send().await.map_err(PlaygroundError::Http)?;
    let status = response.status();
    let headers = collect_headers(response.headers());
    let raw = response.text().await.map_err(PlaygroundError::Http)?;
    let duration = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    Ok(Exchange {
        request: request.clone(),
        response: ResponseRecord {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: decode_body(&raw),
        },
        duration,
    })
}

/// A way of getting an [`OutboundRequest`] to its target
#[async_trait]
pub trait Channel: Send + Sync + fmt::Debug {
    /// Send the request and return the normalized exchange
    async fn send(&self, request: &OutboundRequest) -> Result<Exchange>;
}

/// Dispatches requests to the channel selected by [`RequestMode`]
#[derive(Debug, Clone)]
pub struct Transport {
    direct: DirectChannel,
    proxy: ProxyChannel,
    extension: Option<ExtensionChannel>,
}

impl Transport {
    /// Create a transport without an extension bridge
    pub fn new(direct: DirectChannel, proxy: ProxyChannel) -> Self {
        Self {
            direct,
            proxy,
            extension: None,
        }
    }

    /// Attach an extension channel
    pub fn with_extension(mut self, extension: ExtensionChannel) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Build all three channels from configuration
    ///
    /// When the extension is enabled this spawns the in-process bridge agent,
    /// so it must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http.timeout_seconds))
            .build()
            .map_err(PlaygroundError::Http)?;

        let transport = Self::new(
            DirectChannel::new(http.clone()),
            ProxyChannel::new(
                http.clone(),
                &config.proxy.base_url,
                Duration::from_secs(config.proxy.health_timeout_seconds),
            ),
        );

        if !config.extension.enabled {
            tracing::debug!("Extension bridge disabled by configuration");
            return Ok(transport);
        }

        let link = LocalBridge::spawn(http);
        Ok(transport.with_extension(ExtensionChannel::connect(
            link,
            Duration::from_secs(config.extension.request_timeout_seconds),
        )))
    }

    /// The proxy channel, for health checks
    pub fn proxy(&self) -> &ProxyChannel {
        &self.proxy
    }

    /// The extension channel, if one is attached
    pub fn extension(&self) -> Option<&ExtensionChannel> {
        self.extension.as_ref()
    }

    /// Whether the extension bridge is ready to accept requests
    pub fn extension_available(&self) -> bool {
        self.extension
            .as_ref()
            .map(ExtensionChannel::is_available)
            .unwrap_or(false)
    }

    /// Send a request through the channel for `mode`
    ///
    /// # Errors
    ///
    /// Propagates the channel's error; [`PlaygroundError::ExtensionUnavailable`]
    /// when extension mode is selected without a bridge.
    pub async fn send(&self, request: &OutboundRequest, mode: RequestMode) -> Result<Exchange> {
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            mode = %mode,
            "Sending request"
        );

        let channel: &dyn Channel = match mode {
            RequestMode::Direct => &self.direct,
            RequestMode::Proxy => &self.proxy,
            RequestMode::Extension => match &self.extension {
                Some(extension) => extension,
                None => return Err(PlaygroundError::ExtensionUnavailable.into()),
            },
        };

        let exchange = channel.send(request).await?;
        tracing::debug!(
            status = exchange.response.status,
            duration_ms = exchange.duration,
            "Received response"
        );
        Ok(exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_mode_round_trips_through_str() {
        for mode in RequestMode::ALL {
            assert_eq!(mode.as_str().parse::<RequestMode>().unwrap(), mode);
        }
        assert_eq!(" Proxy ".parse::<RequestMode>().unwrap(), RequestMode::Proxy);
        assert!("carrier-pigeon".parse::<RequestMode>().is_err());
    }

    #[test]
    fn test_request_mode_serializes_lowercase() {
        let value = serde_json::to_value(RequestMode::Extension).unwrap();
        assert_eq!(value, json!("extension"));
    }

    #[test]
    fn test_legacy_flag_mapping() {
        assert_eq!(RequestMode::from_legacy_flag(true), RequestMode::Direct);
        assert_eq!(RequestMode::from_legacy_flag(false), RequestMode::Proxy);
    }

    #[test]
    fn test_encoded_body_rules() {
        let get = OutboundRequest::new("get", "http://x").with_body(json!({"a": 1}));
        assert_eq!(get.method, "GET");
        assert_eq!(get.encoded_body(), None);

        let form = OutboundRequest::new("POST", "http://x").with_body(json!("a=1&b=2"));
        assert_eq!(form.encoded_body().as_deref(), Some("a=1&b=2"));

        let json_body = OutboundRequest::post_json("http://x", json!({"a": 1}));
        assert_eq!(json_body.encoded_body().as_deref(), Some(r#"{"a":1}"#));

        let empty = OutboundRequest::new("POST", "http://x");
        assert_eq!(empty.encoded_body(), None);
    }

    #[test]
    fn test_decode_body_falls_back_to_text() {
        assert_eq!(decode_body(r#"{"ok":true}"#), json!({"ok": true}));
        assert_eq!(decode_body("not json"), json!("not json"));
        assert_eq!(decode_body(""), json!(""));
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert("mcp-session-id".to_string(), "abc".to_string());
        let response = ResponseRecord {
            status: 200,
            status_text: "OK".to_string(),
            headers,
            body: Value::Null,
        };
        assert_eq!(response.header("Mcp-Session-Id"), Some("abc"));
        assert_eq!(response.header("MCP-SESSION-ID"), Some("abc"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn test_json_body_reparses_text() {
        let mut response = ResponseRecord {
            status: 200,
            status_text: String::new(),
            headers: BTreeMap::new(),
            body: json!(r#"{"issuer":"https://as"}"#),
        };
        assert_eq!(response.json_body(), Some(json!({"issuer": "https://as"})));

        response.body = json!("<html>");
        assert_eq!(response.json_body(), None);

        response.body = Value::Null;
        assert_eq!(response.json_body(), None);
    }

    #[test]
    fn test_relay_reply_distinguishes_failure() {
        let failure: RelayReply =
            serde_json::from_value(json!({"error": "boom", "request": {"url": "http://x"}}))
                .unwrap();
        assert!(matches!(failure, RelayReply::Failed { ref error, .. } if error == "boom"));

        let relayed: RelayReply = serde_json::from_value(json!({
            "request": {"method": "GET", "url": "http://x", "headers": {}, "body": null},
            "response": {"status": 204, "statusText": "No Content", "headers": {}, "body": ""},
            "duration": 5
        }))
        .unwrap();
        match relayed {
            RelayReply::Relayed(exchange) => {
                assert_eq!(exchange.response.status, 204);
                assert_eq!(exchange.duration, 5);
            }
            other => panic!("expected relayed exchange, got {:?}", other),
        }
    }

    #[test]
    fn test_origin_of_request() {
        let request = OutboundRequest::get_json("https://mcp.example.com:8443/a/b?c=d");
        assert_eq!(request.origin(), "https://mcp.example.com:8443");
        assert_eq!(OutboundRequest::get_json("nope").origin(), "nope");
    }
}
