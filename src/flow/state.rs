//! Flow state, history and the reducer that evolves them
//!
//! [`FlowState`] is the single aggregate the whole flow reads and writes.
//! It is never patched in place: every change is a [`FlowEvent`] applied by
//! [`reduce`], which consumes the previous state and returns the next one.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::auth::pkce::PkcePair;
use crate::mcp::ToolDescriptor;
use crate::transport::{Exchange, OutboundRequest, RequestMode, ResponseRecord};

/// Version written into persisted state
pub const STATE_VERSION: u32 = 1;

/// Everything the flow knows
///
/// Serialized with camelCase keys; missing keys take their default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowState {
    /// Layout version of the persisted blob
    pub version: u32,
    /// Step currently shown, 0 through 8
    pub current_step: u8,
    /// MCP server under test
    pub mcp_server_url: String,
    /// Channel used for outbound requests
    pub request_mode: RequestMode,

    /// Raw challenge from the initial probe
    pub www_authenticate: Option<String>,
    /// Protected resource metadata location
    pub resource_metadata_url: Option<String>,
    /// Protected resource metadata document
    pub resource_metadata: Option<Value>,
    /// Authorization server, taken from the resource metadata
    pub authorization_server_url: Option<String>,
    /// Authorization server metadata document
    pub oauth_metadata: Option<Value>,
    /// Discovery went through fallback probing
    pub manual_discovery: bool,
    /// OAuth metadata came straight from a fallback probe
    pub oauth_metadata_from_fallback: bool,

    /// Registered or manually entered client ID
    pub client_id: Option<String>,
    /// Client secret, if the client is confidential
    pub client_secret: Option<String>,

    /// PKCE verifier
    pub code_verifier: Option<String>,
    /// PKCE challenge derived from the verifier
    pub code_challenge: Option<String>,
    /// CSRF state sent with the authorization request
    #[serde(rename = "state")]
    pub csrf_state: Option<String>,
    /// Prepared authorization URL
    pub authorization_url: Option<String>,
    /// Code returned by the authorization server
    pub authorization_code: Option<String>,

    /// Bearer token
    pub access_token: Option<String>,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// Token type, usually `Bearer`
    pub token_type: Option<String>,
    /// Lifetime in seconds
    pub expires_in: Option<u64>,

    /// Session ID from `initialize`
    pub mcp_session_id: Option<String>,
    /// `result` of `initialize`
    pub mcp_server_info: Option<Value>,
    /// Tools from `tools/list`
    pub tools: Vec<ToolDescriptor>,
    /// Tool chosen for `tools/call`
    pub selected_tool: Option<ToolDescriptor>,
    /// Last `tools/call` result
    pub tool_result: Option<Value>,

    /// Request/response pairs per step, append-only
    pub history: BTreeMap<u8, Vec<HistoryEntry>>,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            current_step: 0,
            mcp_server_url: String::new(),
            request_mode: RequestMode::default(),
            www_authenticate: None,
            resource_metadata_url: None,
            resource_metadata: None,
            authorization_server_url: None,
            oauth_metadata: None,
            manual_discovery: false,
            oauth_metadata_from_fallback: false,
            client_id: None,
            client_secret: None,
            code_verifier: None,
            code_challenge: None,
            csrf_state: None,
            authorization_url: None,
            authorization_code: None,
            access_token: None,
            refresh_token: None,
            token_type: None,
            expires_in: None,
            mcp_session_id: None,
            mcp_server_info: None,
            tools: Vec::new(),
            selected_tool: None,
            tool_result: None,
            history: BTreeMap::new(),
        }
    }
}

impl FlowState {
    /// A fresh state for `server_url` using `mode`
    pub fn fresh(server_url: &str, mode: RequestMode) -> Self {
        Self {
            mcp_server_url: server_url.to_string(),
            request_mode: mode,
            ..Self::default()
        }
    }

    /// History entries recorded for `step`
    pub fn history_for(&self, step: u8) -> &[HistoryEntry] {
        self.history.get(&step).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of recorded entries across all steps
    pub fn history_len(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }
}

/// What a history entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    /// Initial unauthenticated probe
    #[serde(rename = "probe")]
    Probe,
    /// One fallback discovery probe
    #[serde(rename = "fallback-discovery")]
    FallbackDiscovery,
    /// Protected resource metadata fetch
    #[serde(rename = "resource_metadata")]
    ResourceMetadata,
    /// Authorization server metadata fetch
    #[serde(rename = "oauth_metadata")]
    OAuthMetadata,
    /// Dynamic client registration
    #[serde(rename = "registration")]
    Registration,
    /// Token exchange
    #[serde(rename = "token")]
    Token,
    /// MCP `initialize`
    #[serde(rename = "initialize")]
    Initialize,
    /// MCP `tools/list`
    #[serde(rename = "list-tools")]
    ListTools,
    /// MCP `tools/call`
    #[serde(rename = "call-tool")]
    CallTool,
}

impl HistoryKind {
    /// Wire name as stored in the `type` field
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Probe => "probe",
            HistoryKind::FallbackDiscovery => "fallback-discovery",
            HistoryKind::ResourceMetadata => "resource_metadata",
            HistoryKind::OAuthMetadata => "oauth_metadata",
            HistoryKind::Registration => "registration",
            HistoryKind::Token => "token",
            HistoryKind::Initialize => "initialize",
            HistoryKind::ListTools => "list-tools",
            HistoryKind::CallTool => "call-tool",
        }
    }
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown history kind: {}", s))
    }
}

/// One recorded request/response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// What was sent
    pub request: OutboundRequest,
    /// What came back
    pub response: ResponseRecord,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Entry tag; absent in entries written by older versions
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_kind"
    )]
    pub kind: Option<HistoryKind>,
    /// Tool name for `tools/call` entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl HistoryEntry {
    /// Record `exchange` now, tagged with `kind`
    pub fn new(kind: HistoryKind, exchange: Exchange) -> Self {
        Self {
            request: exchange.request,
            response: exchange.response,
            timestamp: chrono::Utc::now().timestamp_millis(),
            kind: Some(kind),
            tool: None,
        }
    }

    /// Attach the tool name
    pub fn with_tool(mut self, tool: &str) -> Self {
        self.tool = Some(tool.to_string());
        self
    }
}

/// Unknown tags from older or newer versions read as untagged
fn lenient_kind<'de, D>(deserializer: D) -> std::result::Result<Option<HistoryKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

/// Something that happened to the flow
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// Navigation to a step
    StepSelected(u8),
    /// The target server changed
    ServerUrlChanged(String),
    /// The request channel changed
    RequestModeChanged(RequestMode),
    /// The initial probe finished
    Probed {
        /// Challenge header, if any
        www_authenticate: Option<String>,
        /// Metadata URL from the challenge, if any
        resource_metadata_url: Option<String>,
    },
    /// A fallback probe of protected resource metadata was chosen
    FallbackResourceSelected {
        /// Probe URL
        url: String,
        /// Document
        metadata: Value,
        /// Authorization server named by the document
        authorization_server_url: Option<String>,
    },
    /// A fallback probe of authorization server metadata was chosen
    FallbackAuthorizationServerSelected {
        /// Probe URL
        url: String,
        /// Document
        metadata: Value,
    },
    /// Protected resource metadata was fetched
    ResourceMetadataLoaded {
        /// Document
        metadata: Value,
        /// Authorization server named by the document
        authorization_server_url: Option<String>,
    },
    /// Authorization server metadata was fetched
    OAuthMetadataLoaded(Value),
    /// Client credentials were registered or entered
    ClientCredentialsSet {
        /// Client ID
        client_id: String,
        /// Client secret
        client_secret: Option<String>,
    },
    /// PKCE pair, CSRF state and authorization URL were generated
    AuthorizationPrepared {
        /// Verifier and challenge
        pkce: PkcePair,
        /// CSRF state
        csrf_state: String,
        /// Authorization URL
        authorization_url: String,
    },
    /// An authorization code passed validation
    AuthorizationCodeAccepted(String),
    /// The token endpoint issued tokens
    TokensIssued {
        /// Access token
        access_token: String,
        /// Refresh token
        refresh_token: Option<String>,
        /// Token type
        token_type: Option<String>,
        /// Lifetime in seconds
        expires_in: Option<u64>,
    },
    /// `initialize` answered
    McpSessionStarted {
        /// Session ID, if the server issued one
        session_id: Option<String>,
        /// `result` of `initialize`
        server_info: Option<Value>,
    },
    /// `tools/list` answered
    ToolsListed(Vec<ToolDescriptor>),
    /// A tool was chosen
    ToolSelected(ToolDescriptor),
    /// `tools/call` answered
    ToolResultReceived(Value),
    /// A request/response pair was recorded for a step
    Recorded {
        /// Step the entry belongs to
        step: u8,
        /// The entry
        entry: HistoryEntry,
    },
}

/// Apply `event` to `state`, producing the next state
pub fn reduce(state: FlowState, event: FlowEvent) -> FlowState {
    match event {
        FlowEvent::StepSelected(step) => FlowState {
            current_step: step,
            ..state
        },
        FlowEvent::ServerUrlChanged(url) => FlowState {
            mcp_server_url: url,
            ..state
        },
        FlowEvent::RequestModeChanged(mode) => FlowState {
            request_mode: mode,
            ..state
        },
        FlowEvent::Probed {
            www_authenticate,
            resource_metadata_url,
        } => FlowState {
            www_authenticate: www_authenticate.or(state.www_authenticate.clone()),
            resource_metadata_url: resource_metadata_url.or(state.resource_metadata_url.clone()),
            ..state
        },
        FlowEvent::FallbackResourceSelected {
            url,
            metadata,
            authorization_server_url,
        } => FlowState {
            resource_metadata_url: Some(url),
            resource_metadata: Some(metadata),
            authorization_server_url,
            oauth_metadata: None,
            manual_discovery: true,
            oauth_metadata_from_fallback: false,
            ..state
        },
        FlowEvent::FallbackAuthorizationServerSelected { url, metadata } => FlowState {
            resource_metadata_url: Some(url),
            oauth_metadata: Some(metadata),
            manual_discovery: true,
            oauth_metadata_from_fallback: true,
            ..state
        },
        FlowEvent::ResourceMetadataLoaded {
            metadata,
            authorization_server_url,
        } => FlowState {
            resource_metadata: Some(metadata),
            authorization_server_url,
            ..state
        },
        FlowEvent::OAuthMetadataLoaded(metadata) => FlowState {
            oauth_metadata: Some(metadata),
            oauth_metadata_from_fallback: false,
            ..state
        },
        FlowEvent::ClientCredentialsSet {
            client_id,
            client_secret,
        } => FlowState {
            client_id: Some(client_id),
            client_secret,
            ..state
        },
        FlowEvent::AuthorizationPrepared {
            pkce,
            csrf_state,
            authorization_url,
        } => FlowState {
            code_verifier: Some(pkce.verifier),
            code_challenge: Some(pkce.challenge),
            csrf_state: Some(csrf_state),
            authorization_url: Some(authorization_url),
            // A code issued against the previous challenge can no longer be redeemed.
            authorization_code: None,
            ..state
        },
        FlowEvent::AuthorizationCodeAccepted(code) => FlowState {
            authorization_code: Some(code),
            ..state
        },
        FlowEvent::TokensIssued {
            access_token,
            refresh_token,
            token_type,
            expires_in,
        } => FlowState {
            access_token: Some(access_token),
            refresh_token,
            token_type,
            expires_in,
            ..state
        },
        FlowEvent::McpSessionStarted {
            session_id,
            server_info,
        } => FlowState {
            mcp_session_id: session_id,
            mcp_server_info: server_info,
            ..state
        },
        FlowEvent::ToolsListed(tools) => FlowState { tools, ..state },
        FlowEvent::ToolSelected(tool) => FlowState {
            selected_tool: Some(tool),
            ..state
        },
        FlowEvent::ToolResultReceived(result) => FlowState {
            tool_result: Some(result),
            ..state
        },
        FlowEvent::Recorded { step, entry } => {
            let mut history = state.history;
            history.entry(step).or_default().push(entry);
            FlowState { history, ..state }
        }
    }
}
