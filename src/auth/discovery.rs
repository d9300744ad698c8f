//! OAuth discovery for MCP servers
//!
//! Covers the three ways the flow learns where to authorize:
//!
//! 1. The `resource_metadata` parameter of a `401` `WWW-Authenticate`
//!    challenge (RFC 9728 section 5.1).
//! 2. Fallback probing of well-known URIs on the server's origin and full
//!    path, when no challenge hint is available.
//! 3. RFC 8414 authorization server metadata, with the OIDC discovery
//!    location as a legacy fallback.
//!
//! Functions here are pure; the network calls are made by
//! [`crate::flow::Playground`], which feeds responses back through these
//! helpers.
//!
//! # References
//!
//! - RFC 9728 <https://www.rfc-editor.org/rfc/rfc9728>
//! - RFC 8414 <https://www.rfc-editor.org/rfc/rfc8414>

use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use url::Url;

use crate::error::{PlaygroundError, Result};
use crate::transport::{Exchange, ResponseRecord};

/// Well-known suffixes probed during fallback discovery, in order
pub const WELL_KNOWN_SUFFIXES: [&str; 3] = [
    "/.well-known/oauth-protected-resource",
    "/.well-known/oauth-authorization-server",
    "/.well-known/openid-configuration",
];

// ---------------------------------------------------------------------------
// Authorization Server Metadata
// ---------------------------------------------------------------------------

/// Authorization server metadata (RFC 8414 / OIDC discovery)
///
/// Every field is optional; servers in the wild omit many of them and the
/// flow only needs the endpoints for the step being run. The raw JSON is
/// kept in state, and this type is parsed from it on demand.
///
/// # Examples
///
/// ```
/// use mcp_auth_playground::auth::discovery::AuthorizationServerMetadata;
///
/// let meta = AuthorizationServerMetadata::from_value(&serde_json::json!({
///     "issuer": "https://auth.example.com",
///     "authorization_endpoint": "https://auth.example.com/authorize",
///     "token_endpoint": "https://auth.example.com/token"
/// }))
/// .unwrap();
/// assert_eq!(meta.require_token_endpoint().unwrap(), "https://auth.example.com/token");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Issuer identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Authorization endpoint (RFC 6749 section 3.1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint (RFC 6749 section 3.2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Dynamic Client Registration endpoint (RFC 7591)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// Supported scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Supported `response_type` values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_types_supported: Option<Vec<String>>,

    /// Supported `grant_type` values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// Supported PKCE methods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Everything else
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl AuthorizationServerMetadata {
    /// Parse from the JSON kept in flow state
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::Protocol`] if the value is not an object of
    /// the expected shape.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| {
            PlaygroundError::Protocol(format!("malformed authorization server metadata: {}", e))
                .into()
        })
    }

    /// The authorization endpoint, or a protocol error naming it
    pub fn require_authorization_endpoint(&self) -> Result<&str> {
        require(&self.authorization_endpoint, "authorization_endpoint")
    }

    /// The token endpoint, or a protocol error naming it
    pub fn require_token_endpoint(&self) -> Result<&str> {
        require(&self.token_endpoint, "token_endpoint")
    }
}

fn require<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
    field.as_deref().filter(|v| !v.is_empty()).ok_or_else(|| {
        PlaygroundError::Protocol(format!("authorization server metadata has no {}", name)).into()
    })
}

// ---------------------------------------------------------------------------
// Initial connection
// ---------------------------------------------------------------------------

/// Why fallback discovery is needed after the initial probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// `401` without a `WWW-Authenticate` header
    MissingChallenge,
    /// A challenge was present but carried no `resource_metadata`
    ChallengeWithoutMetadata,
    /// Some other `4xx`
    ClientError(u16),
}

/// What the initial unauthenticated probe revealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// The challenge points at protected resource metadata
    ResourceMetadataAdvertised {
        /// Raw `WWW-Authenticate` value
        www_authenticate: String,
        /// Extracted metadata URL
        url: String,
    },
    /// The user should run fallback discovery
    FallbackRequired {
        /// Why
        reason: FallbackReason,
        /// Raw `WWW-Authenticate` value, if any
        www_authenticate: Option<String>,
    },
    /// The server answered without asking for authorization
    NotProtected {
        /// Status returned
        status: u16,
    },
    /// Neither success nor a client error
    UnexpectedStatus {
        /// Status returned
        status: u16,
    },
}

/// Extract the `resource_metadata` URL from a `WWW-Authenticate` value
///
/// The quoted form `resource_metadata="..."` is tried first, then the
/// unquoted form, which ends at whitespace or a comma.
///
/// # Examples
///
/// ```
/// use mcp_auth_playground::auth::discovery::parse_resource_metadata_url;
///
/// let header = r#"Bearer realm="mcp", resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource""#;
/// assert_eq!(
///     parse_resource_metadata_url(header).as_deref(),
///     Some("https://mcp.example.com/.well-known/oauth-protected-resource")
/// );
/// assert_eq!(parse_resource_metadata_url("Bearer realm=\"mcp\""), None);
/// ```
pub fn parse_resource_metadata_url(header: &str) -> Option<String> {
    let quoted = Regex::new(r#"resource_metadata="([^"]+)""#).ok()?;
    if let Some(captures) = quoted.captures(header) {
        return captures.get(1).map(|m| m.as_str().to_string());
    }

    let unquoted = Regex::new(r#"resource_metadata=([^\s,"]+)"#).ok()?;
    unquoted
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Classify the response to the initial unauthenticated probe
///
/// Any `4xx` is inspected for a challenge; a hint in the challenge wins,
/// otherwise fallback discovery is required.
pub fn classify_probe_response(response: &ResponseRecord) -> ProbeVerdict {
    let status = response.status;

    if (400..500).contains(&status) {
        let www_authenticate = response.header("www-authenticate").map(str::to_string);
        if let Some(header) = &www_authenticate {
            if let Some(url) = parse_resource_metadata_url(header) {
                return ProbeVerdict::ResourceMetadataAdvertised {
                    www_authenticate: header.clone(),
                    url,
                };
            }
        }

        let reason = match (status, &www_authenticate) {
            (_, Some(_)) => FallbackReason::ChallengeWithoutMetadata,
            (401, None) => FallbackReason::MissingChallenge,
            (other, None) => FallbackReason::ClientError(other),
        };
        return ProbeVerdict::FallbackRequired {
            reason,
            www_authenticate,
        };
    }

    if response.is_success() {
        ProbeVerdict::NotProtected { status }
    } else {
        ProbeVerdict::UnexpectedStatus { status }
    }
}

// ---------------------------------------------------------------------------
// Fallback discovery
// ---------------------------------------------------------------------------

/// What a probed document appears to be, judged by its URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataType {
    /// Protected resource metadata
    #[serde(rename = "resource")]
    Resource,
    /// RFC 8414 authorization server metadata
    #[serde(rename = "oauth-as")]
    OauthAs,
    /// OIDC discovery document
    #[serde(rename = "oidc")]
    Oidc,
}

impl MetadataType {
    /// Short label used in listings
    pub fn label(&self) -> &'static str {
        match self {
            MetadataType::Resource => "resource",
            MetadataType::OauthAs => "oauth-as",
            MetadataType::Oidc => "oidc",
        }
    }

    /// Whether a document of this type is authorization server metadata
    pub fn is_authorization_server(&self) -> bool {
        !matches!(self, MetadataType::Resource)
    }
}

/// Classify a probe URL by its well-known suffix
pub fn classify_probe_url(url: &str) -> Option<MetadataType> {
    if url.contains("oauth-protected-resource") {
        Some(MetadataType::Resource)
    } else if url.contains("oauth-authorization-server") {
        Some(MetadataType::OauthAs)
    } else if url.contains("openid-configuration") {
        Some(MetadataType::Oidc)
    } else {
        None
    }
}

/// One URL to probe during fallback discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// URL to fetch
    pub url: String,
    /// The base the suffix was appended to
    pub base: String,
}

/// Build the ordered fallback probe list for `server_url`
///
/// Trailing slashes are stripped from the server URL. When the origin
/// differs from the normalized URL, the origin's three well-known URIs come
/// first, followed by the three under the full URL.
pub fn fallback_probe_targets(server_url: &str) -> Vec<ProbeTarget> {
    let normalized = server_url.trim_end_matches('/').to_string();
    let origin = Url::parse(server_url)
        .ok()
        .map(|u| u.origin().ascii_serialization())
        .filter(|origin| origin != "null");

    let mut bases = Vec::with_capacity(2);
    if let Some(origin) = origin {
        if origin != normalized {
            bases.push(origin);
        }
    }
    bases.push(normalized);

    bases
        .into_iter()
        .flat_map(|base| {
            WELL_KNOWN_SUFFIXES.iter().map(move |suffix| ProbeTarget {
                url: format!("{}{}", base, suffix),
                base: base.clone(),
            })
        })
        .collect()
}

/// Status of a probe: an HTTP status, or `"error"` when no response arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The server answered
    Http(u16),
    /// No response
    Error,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Http(status) => write!(f, "{}", status),
            ProbeStatus::Error => f.write_str("error"),
        }
    }
}

impl Serialize for ProbeStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ProbeStatus::Http(status) => serializer.serialize_u16(*status),
            ProbeStatus::Error => serializer.serialize_str("error"),
        }
    }
}

impl<'de> Deserialize<'de> for ProbeStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .map(ProbeStatus::Http)
                .ok_or_else(|| serde::de::Error::custom("status out of range")),
            Value::String(s) if s == "error" => Ok(ProbeStatus::Error),
            other => Err(serde::de::Error::custom(format!(
                "expected a status code or \"error\", got {}",
                other
            ))),
        }
    }
}

/// The outcome of one fallback probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    /// URL probed
    pub url: String,
    /// Base the suffix was appended to
    pub base: String,
    /// HTTP status or `"error"`
    pub status: ProbeStatus,
    /// `200` with a JSON body
    pub success: bool,
    /// Parsed JSON body on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Classification from the URL, set only on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_type: Option<MetadataType>,
    /// Failure description when no response arrived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiscoveryResult {
    /// Build the result for `target` from the probe outcome
    ///
    /// A probe succeeds only on `200` with a JSON-parseable body.
    pub fn from_outcome(target: &ProbeTarget, outcome: &Result<Exchange>) -> Self {
        match outcome {
            Ok(exchange) => {
                let response = &exchange.response;
                let body = if response.status == 200 {
                    response.json_body()
                } else {
                    None
                };
                Self {
                    url: target.url.clone(),
                    base: target.base.clone(),
                    status: ProbeStatus::Http(response.status),
                    success: body.is_some(),
                    metadata_type: body.as_ref().and_then(|_| classify_probe_url(&target.url)),
                    body,
                    error: None,
                }
            }
            Err(e) => Self {
                url: target.url.clone(),
                base: target.base.clone(),
                status: ProbeStatus::Error,
                success: false,
                body: None,
                metadata_type: None,
                error: Some(e.to_string()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Resource and authorization server metadata
// ---------------------------------------------------------------------------

/// Pick the authorization server from protected resource metadata
///
/// Accepts, in order: the first element of a non-empty
/// `authorization_servers` array, a string `authorization_servers`, then the
/// same two forms under the singular `authorization_server` key.
///
/// # Examples
///
/// ```
/// use mcp_auth_playground::auth::discovery::extract_authorization_server;
/// use serde_json::json;
///
/// let meta = json!({"authorization_servers": ["https://as.example.com"]});
/// assert_eq!(extract_authorization_server(&meta).as_deref(), Some("https://as.example.com"));
/// ```
pub fn extract_authorization_server(metadata: &Value) -> Option<String> {
    fn pick(value: Option<&Value>) -> Option<String> {
        match value? {
            Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    pick(metadata.get("authorization_servers"))
        .or_else(|| pick(metadata.get("authorization_server")))
}

/// Candidate metadata URLs for an authorization server, in order
///
/// 1. RFC 8414 path insertion:
///    `{origin}/.well-known/oauth-authorization-server{path}`
///    (no path component when the issuer is at the root).
/// 2. OIDC legacy path appending: `{origin}{path}/.well-known/openid-configuration`.
///
/// # Errors
///
/// Returns [`PlaygroundError::Url`] if `authorization_server_url` is not a URL.
pub fn oauth_metadata_candidates(authorization_server_url: &str) -> Result<Vec<String>> {
    let issuer = Url::parse(authorization_server_url).map_err(PlaygroundError::Url)?;
    let origin = issuer.origin().ascii_serialization();
    let path = issuer.path().trim_end_matches('/');

    Ok(vec![
        format!("{}/.well-known/oauth-authorization-server{}", origin, path),
        format!("{}{}/.well-known/openid-configuration", origin, path),
    ])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
