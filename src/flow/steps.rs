//! The nine steps of the flow and the rules for moving between them

use std::fmt;

use super::state::FlowState;

/// A step of the flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Step {
    /// 0
    Introduction = 0,
    /// 1
    InitialConnection = 1,
    /// 2
    MetadataDiscovery = 2,
    /// 3
    ClientRegistration = 3,
    /// 4
    PrepareAuthorization = 4,
    /// 5
    Authorization = 5,
    /// 6
    TokenRequest = 6,
    /// 7
    AuthComplete = 7,
    /// 8
    McpTools = 8,
}

impl Step {
    /// All steps in order
    pub const ALL: [Step; 9] = [
        Step::Introduction,
        Step::InitialConnection,
        Step::MetadataDiscovery,
        Step::ClientRegistration,
        Step::PrepareAuthorization,
        Step::Authorization,
        Step::TokenRequest,
        Step::AuthComplete,
        Step::McpTools,
    ];

    /// The last step
    pub const LAST: Step = Step::McpTools;

    /// Numeric index
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Step for an index, if in range
    pub fn from_index(index: u8) -> Option<Step> {
        Step::ALL.get(usize::from(index)).copied()
    }

    /// Display title
    pub fn title(self) -> &'static str {
        match self {
            Step::Introduction => "Introduction",
            Step::InitialConnection => "Initial Connection",
            Step::MetadataDiscovery => "Metadata Discovery",
            Step::ClientRegistration => "Client Registration",
            Step::PrepareAuthorization => "Prepare Authorization",
            Step::Authorization => "Authorization",
            Step::TokenRequest => "Token Request",
            Step::AuthComplete => "Authentication Complete",
            Step::McpTools => "MCP Tools",
        }
    }

    /// The following step
    pub fn next(self) -> Option<Step> {
        Step::from_index(self.index() + 1)
    }

    /// What must hold before leaving this step
    pub fn exit_requirement(self) -> &'static str {
        match self {
            Step::Introduction => "nothing",
            Step::InitialConnection => "a resource metadata URL or OAuth metadata",
            Step::MetadataDiscovery => "OAuth metadata",
            Step::ClientRegistration => "a client ID",
            Step::PrepareAuthorization => "a PKCE verifier, challenge and authorization URL",
            Step::Authorization => "an authorization code",
            Step::TokenRequest => "an access token",
            Step::AuthComplete => "nothing",
            Step::McpTools => "a following step",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.index(), self.title())
    }
}

/// Whether the gate for leaving `step` is satisfied
pub fn can_leave(state: &FlowState, step: Step) -> bool {
    match step {
        Step::Introduction | Step::AuthComplete => true,
        Step::InitialConnection => {
            state.resource_metadata_url.is_some() || state.oauth_metadata.is_some()
        }
        Step::MetadataDiscovery => state.oauth_metadata.is_some(),
        Step::ClientRegistration => state.client_id.is_some(),
        Step::PrepareAuthorization => {
            state.code_verifier.is_some()
                && state.code_challenge.is_some()
                && state.authorization_url.is_some()
        }
        Step::Authorization => state.authorization_code.is_some(),
        Step::TokenRequest => state.access_token.is_some(),
        Step::McpTools => false,
    }
}

/// The furthest step the data supports
///
/// Computed from what is present in `state`, so a reloaded flow resumes
/// where its data allows. Never below the current step.
pub fn furthest_reachable(state: &FlowState) -> u8 {
    let mut furthest = 0;
    if state.current_step > 0 {
        furthest = 1;
    }
    if state.resource_metadata_url.is_some() || state.oauth_metadata.is_some() {
        furthest = furthest.max(Step::MetadataDiscovery.index());
    }
    if state.oauth_metadata.is_some() {
        furthest = furthest.max(Step::ClientRegistration.index());
    }
    if state.client_id.is_some() {
        furthest = furthest.max(Step::PrepareAuthorization.index());
    }
    if can_leave(state, Step::PrepareAuthorization) {
        furthest = furthest.max(Step::Authorization.index());
    }
    if state.authorization_code.is_some() {
        furthest = furthest.max(Step::TokenRequest.index());
    }
    if state.access_token.is_some() {
        furthest = furthest.max(Step::McpTools.index());
    }
    furthest.max(state.current_step)
}
