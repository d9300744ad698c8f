//! The flow controller
//!
//! [`Playground`] owns the [`FlowState`], the [`Transport`] and the
//! [`StateStore`]. Every step operation builds an [`OutboundRequest`], sends
//! it through the selected channel, records the exchange in history and
//! folds the outcome into state through [`reduce`]. State is persisted after
//! every transition.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;

use super::state::{reduce, FlowEvent, FlowState, HistoryEntry, HistoryKind};
use super::steps::{can_leave, furthest_reachable, Step};
use super::store::{self, StateStore};
use crate::auth::callback::CallbackParams;
use crate::auth::discovery::{
    classify_probe_response, extract_authorization_server, fallback_probe_targets,
    oauth_metadata_candidates, AuthorizationServerMetadata, DiscoveryResult, MetadataType,
    ProbeVerdict,
};
use crate::auth::pkce::{self, PkcePair};
use crate::config::Config;
use crate::error::{PlaygroundError, Result};
use crate::mcp::session::{self, ToolDescriptor};
use crate::transport::{Exchange, OutboundRequest, RequestMode, Transport};

/// Settings the controller needs from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSettings {
    /// Server URL for a fresh flow
    pub default_server_url: String,
    /// Request mode for a fresh flow
    pub default_request_mode: RequestMode,
    /// Redirect URI sent in registration, authorization and token requests
    pub redirect_uri: String,
    /// Client name sent in registration
    pub client_name: String,
}

impl From<&Config> for FlowSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_server_url: config.flow.default_server_url.clone(),
            default_request_mode: config.flow.default_request_mode,
            redirect_uri: config.flow.redirect_uri.clone(),
            client_name: config.flow.client_name.clone(),
        }
    }
}

/// Result of a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The authorization server issued credentials
    Registered {
        /// Issued client ID
        client_id: String,
        /// Issued secret, absent for public clients
        client_secret: Option<String>,
    },
    /// Credentials already existed; nothing was sent
    AlreadyRegistered {
        /// Existing client ID
        client_id: String,
    },
}

/// Drives one OAuth + MCP flow
#[derive(Debug)]
pub struct Playground {
    settings: FlowSettings,
    transport: Transport,
    store: Box<dyn StateStore>,
    state: FlowState,
    persistence_degraded: bool,
    proxy_health: Option<watch::Receiver<Option<bool>>>,
}

impl Playground {
    /// Load saved state (or defaults) and build the controller
    ///
    /// An unreadable or corrupt saved state is logged and replaced by
    /// defaults; it never prevents the flow from starting.
    pub fn restore(settings: FlowSettings, transport: Transport, store: Box<dyn StateStore>) -> Self {
        let defaults = FlowState::fresh(&settings.default_server_url, settings.default_request_mode);

        let state = match store.load() {
            Ok(Some(blob)) => match store::restore(&blob, &defaults) {
                Ok(state) => {
                    tracing::debug!(step = state.current_step, "Restored saved flow state");
                    state
                }
                Err(e) => {
                    tracing::warn!("Ignoring saved flow state: {}", e);
                    defaults
                }
            },
            Ok(None) => defaults,
            Err(e) => {
                tracing::warn!("Could not read saved flow state: {}", e);
                defaults
            }
        };

        Self {
            settings,
            transport,
            store,
            state,
            persistence_degraded: false,
            proxy_health: None,
        }
    }

    /// Current state
    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// Settings in use
    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// The transport, for health checks and bridge stats
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Current step
    pub fn current_step(&self) -> Step {
        Step::from_index(self.state.current_step).unwrap_or(Step::LAST)
    }

    /// Furthest step the data supports
    pub fn furthest_step(&self) -> u8 {
        furthest_reachable(&self.state)
    }

    /// Whether a state write has failed and the flow is memory-only
    pub fn persistence_degraded(&self) -> bool {
        self.persistence_degraded
    }

    fn dispatch(&mut self, event: FlowEvent) {
        let previous = std::mem::take(&mut self.state);
        self.state = reduce(previous, event);
        self.persist();
    }

    fn persist(&mut self) {
        let result = store::encode(&self.state).and_then(|blob| self.store.save(&blob));
        if let Err(e) = result {
            if !self.persistence_degraded {
                tracing::warn!("Saving flow state failed, continuing in memory only: {}", e);
            }
            self.persistence_degraded = true;
        }
    }

    // -----------------------------------------------------------------------
    // Request modes
    // -----------------------------------------------------------------------

    /// Follow a running proxy health monitor
    pub fn attach_proxy_monitor(&mut self, health: watch::Receiver<Option<bool>>) {
        self.proxy_health = Some(health);
    }

    fn monitored_proxy_health(&self) -> Option<bool> {
        self.proxy_health.as_ref().and_then(|rx| *rx.borrow())
    }

    async fn proxy_healthy(&self) -> bool {
        match self.monitored_proxy_health() {
            Some(healthy) => healthy,
            None => self.transport.proxy().check_health().await,
        }
    }

    /// Fall back to direct mode if proxy is selected but the monitor says
    /// the relay is down
    ///
    /// Returns the new mode when a switch happened.
    pub fn refresh_availability(&mut self) -> Option<RequestMode> {
        if self.state.request_mode == RequestMode::Proxy && self.monitored_proxy_health() == Some(false)
        {
            self.fall_back_to_direct();
            return Some(RequestMode::Direct);
        }
        None
    }

    /// One-shot health check with the same fallback as the monitor
    ///
    /// Returns whether the relay answered.
    pub async fn probe_proxy_health(&mut self) -> bool {
        let healthy = self.transport.proxy().check_health().await;
        if !healthy && self.state.request_mode == RequestMode::Proxy {
            self.fall_back_to_direct();
        }
        healthy
    }

    fn fall_back_to_direct(&mut self) {
        tracing::warn!(
            proxy = self.transport.proxy().base_url(),
            "Proxy relay unavailable, switching to direct mode"
        );
        self.dispatch(FlowEvent::RequestModeChanged(RequestMode::Direct));
    }

    /// Select the request channel
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::ExtensionUnavailable`] when the bridge is not
    /// ready, or [`PlaygroundError::Transport`] when the relay does not answer
    /// its health check.
    pub async fn set_request_mode(&mut self, mode: RequestMode) -> Result<()> {
        let available = match mode {
            RequestMode::Direct => true,
            RequestMode::Proxy => self.proxy_healthy().await,
            RequestMode::Extension => self.transport.extension_available(),
        };
        if !available {
            return Err(match mode {
                RequestMode::Extension => PlaygroundError::ExtensionUnavailable,
                _ => PlaygroundError::Transport(format!(
                    "proxy relay at {} is not reachable",
                    self.transport.proxy().base_url()
                )),
            }
            .into());
        }

        tracing::info!(mode = %mode, "Request mode selected");
        self.dispatch(FlowEvent::RequestModeChanged(mode));
        Ok(())
    }

    /// Change the MCP server under test
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::InvalidInput`] unless `url` is an absolute
    /// http(s) URL.
    pub fn set_server_url(&mut self, url: &str) -> Result<()> {
        let url = url.trim();
        let parsed = url::Url::parse(url)
            .map_err(|e| PlaygroundError::InvalidInput(format!("'{}' is not a URL: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PlaygroundError::InvalidInput(format!(
                "server URL must use http or https, got '{}'",
                parsed.scheme()
            ))
            .into());
        }
        self.dispatch(FlowEvent::ServerUrlChanged(url.to_string()));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// Leave the introduction
    pub fn start(&mut self) -> Step {
        if self.state.current_step == Step::Introduction.index() {
            self.dispatch(FlowEvent::StepSelected(Step::InitialConnection.index()));
        }
        self.current_step()
    }

    /// Move to the next step if the current step's gate is satisfied
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::GateNotSatisfied`] naming what is missing.
    pub fn advance(&mut self) -> Result<Step> {
        let current = self.current_step();
        let next = match current.next() {
            Some(next) if can_leave(&self.state, current) => next,
            _ => {
                return Err(PlaygroundError::GateNotSatisfied {
                    step: current.index(),
                    requirement: current.exit_requirement(),
                }
                .into())
            }
        };
        self.dispatch(FlowEvent::StepSelected(next.index()));
        Ok(next)
    }

    /// Jump to any step up to the furthest reachable one
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::StepLocked`] past the furthest reachable
    /// step, [`PlaygroundError::InvalidInput`] past the last step.
    pub fn goto(&mut self, step: u8) -> Result<Step> {
        let target = Step::from_index(step).ok_or_else(|| {
            PlaygroundError::InvalidInput(format!("step must be 0-{}, got {}", Step::LAST.index(), step))
        })?;
        let furthest = self.furthest_step();
        if step > furthest {
            return Err(PlaygroundError::StepLocked {
                requested: step,
                furthest,
            }
            .into());
        }
        self.dispatch(FlowEvent::StepSelected(step));
        Ok(target)
    }

    /// Wipe saved state and start over
    ///
    /// The new request mode is proxy if the relay is healthy, otherwise
    /// extension if the bridge is ready, otherwise direct.
    pub async fn reset(&mut self) -> RequestMode {
        if let Err(e) = self.store.clear() {
            tracing::warn!("Could not remove saved flow state: {}", e);
        }

        let mode = if self.proxy_healthy().await {
            RequestMode::Proxy
        } else if self.transport.extension_available() {
            RequestMode::Extension
        } else {
            RequestMode::Direct
        };

        tracing::info!(mode = %mode, "Flow reset");
        self.state = FlowState::fresh(&self.settings.default_server_url, mode);
        self.persistence_degraded = false;
        self.persist();
        mode
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    async fn send_recorded(
        &mut self,
        step: Step,
        kind: HistoryKind,
        request: OutboundRequest,
        tool: Option<&str>,
    ) -> Result<Exchange> {
        self.refresh_availability();
        let exchange = self.transport.send(&request, self.state.request_mode).await?;

        tracing::debug!(
            kind = %kind,
            status = exchange.response.status,
            duration_ms = exchange.duration,
            "Recorded exchange"
        );

        let mut entry = HistoryEntry::new(kind, exchange.clone());
        if let Some(tool) = tool {
            entry = entry.with_tool(tool);
        }
        self.dispatch(FlowEvent::Recorded {
            step: step.index(),
            entry,
        });
        Ok(exchange)
    }

    fn require_server_url(&self) -> Result<String> {
        let url = self.state.mcp_server_url.trim();
        if url.is_empty() {
            return Err(PlaygroundError::InvalidInput(
                "no MCP server URL set; use `server <URL>` first".to_string(),
            )
            .into());
        }
        Ok(url.to_string())
    }

    fn gate_error(step: Step) -> anyhow::Error {
        PlaygroundError::GateNotSatisfied {
            step: step.index(),
            requirement: step.exit_requirement(),
        }
        .into()
    }

    fn oauth_metadata(&self) -> Result<AuthorizationServerMetadata> {
        let value = self
            .state
            .oauth_metadata
            .as_ref()
            .ok_or_else(|| Self::gate_error(Step::MetadataDiscovery))?;
        AuthorizationServerMetadata::from_value(value)
    }

    // -----------------------------------------------------------------------
    // Step 1: initial connection
    // -----------------------------------------------------------------------

    /// Probe the MCP server without credentials
    ///
    /// # Errors
    ///
    /// Returns an error if no server URL is set or the request fails.
    pub async fn connect(&mut self) -> Result<ProbeVerdict> {
        let url = self.require_server_url()?;
        tracing::info!(url = %url, "Probing MCP server");

        let response = self
            .send_recorded(
                Step::InitialConnection,
                HistoryKind::Probe,
                OutboundRequest::get_json(url),
                None,
            )
            .await?
            .response;

        let verdict = classify_probe_response(&response);
        let (www_authenticate, resource_metadata_url) = match &verdict {
            ProbeVerdict::ResourceMetadataAdvertised {
                www_authenticate,
                url,
            } => (Some(www_authenticate.clone()), Some(url.clone())),
            ProbeVerdict::FallbackRequired {
                www_authenticate, ..
            } => (www_authenticate.clone(), None),
            ProbeVerdict::NotProtected { .. } | ProbeVerdict::UnexpectedStatus { .. } => (None, None),
        };
        self.dispatch(FlowEvent::Probed {
            www_authenticate,
            resource_metadata_url,
        });
        Ok(verdict)
    }

    /// Probe the well-known metadata locations one after another
    ///
    /// Every probe that produced a response is recorded in history; probes
    /// that failed in transit show up only in the returned results.
    pub async fn run_fallback_discovery(&mut self) -> Result<Vec<DiscoveryResult>> {
        let url = self.require_server_url()?;
        let targets = fallback_probe_targets(&url);
        tracing::info!(probes = targets.len(), "Running fallback discovery");

        let mut results = Vec::with_capacity(targets.len());
        for target in &targets {
            let outcome = self
                .send_recorded(
                    Step::InitialConnection,
                    HistoryKind::FallbackDiscovery,
                    OutboundRequest::get_json(target.url.clone()),
                    None,
                )
                .await;
            if let Err(e) = &outcome {
                tracing::debug!(url = %target.url, "Probe failed: {}", e);
            }
            results.push(DiscoveryResult::from_outcome(target, &outcome));
        }
        Ok(results)
    }

    /// Adopt a successful fallback probe
    ///
    /// Protected resource metadata continues the normal flow; authorization
    /// server metadata is stored directly and satisfies step 2.
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::Protocol`] for an unsuccessful or
    /// unclassifiable result.
    pub fn select_discovery_result(&mut self, result: &DiscoveryResult) -> Result<MetadataType> {
        let body = match (&result.body, result.success) {
            (Some(body), true) => body.clone(),
            _ => {
                return Err(PlaygroundError::Protocol(format!(
                    "{} did not return usable metadata",
                    result.url
                ))
                .into())
            }
        };
        let metadata_type = result.metadata_type.ok_or_else(|| {
            PlaygroundError::Protocol(format!("cannot tell what kind of document {} is", result.url))
        })?;

        tracing::info!(url = %result.url, kind = metadata_type.label(), "Selected discovery result");
        let event = if metadata_type.is_authorization_server() {
            FlowEvent::FallbackAuthorizationServerSelected {
                url: result.url.clone(),
                metadata: body,
            }
        } else {
            let authorization_server_url = extract_authorization_server(&body);
            if authorization_server_url.is_none() {
                tracing::warn!("Resource metadata names no authorization server");
            }
            FlowEvent::FallbackResourceSelected {
                url: result.url.clone(),
                metadata: body,
                authorization_server_url,
            }
        };
        self.dispatch(event);
        Ok(metadata_type)
    }

    // -----------------------------------------------------------------------
    // Step 2: metadata discovery
    // -----------------------------------------------------------------------

    /// Fetch the protected resource metadata
    ///
    /// Returns `None` without a request when OAuth metadata already came from
    /// fallback discovery, and the adopted document when a fallback resource
    /// result was selected.
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::Protocol`] unless the document arrives as
    /// `200` JSON; the exchange is recorded either way.
    pub async fn fetch_resource_metadata(&mut self) -> Result<Option<Value>> {
        if self.state.oauth_metadata_from_fallback {
            tracing::info!("OAuth metadata came from fallback discovery; skipping resource metadata");
            return Ok(None);
        }
        if self.state.manual_discovery {
            if let Some(metadata) = &self.state.resource_metadata {
                tracing::info!("Using resource metadata adopted from fallback discovery");
                return Ok(Some(metadata.clone()));
            }
        }
        let url = self
            .state
            .resource_metadata_url
            .clone()
            .ok_or_else(|| Self::gate_error(Step::InitialConnection))?;
        tracing::info!(url = %url, "Fetching protected resource metadata");

        let response = self
            .send_recorded(
                Step::MetadataDiscovery,
                HistoryKind::ResourceMetadata,
                OutboundRequest::get_json(url.clone()),
                None,
            )
            .await?
            .response;

        let metadata = match (response.status, response.json_body()) {
            (200, Some(metadata @ Value::Object(_))) => metadata,
            (status, _) => {
                return Err(PlaygroundError::Protocol(format!(
                    "resource metadata at {} answered HTTP {} without a JSON document",
                    url, status
                ))
                .into())
            }
        };

        let authorization_server_url = extract_authorization_server(&metadata);
        match &authorization_server_url {
            Some(as_url) => tracing::info!(authorization_server = %as_url, "Found authorization server"),
            None => tracing::warn!("Resource metadata names no authorization server"),
        }
        self.dispatch(FlowEvent::ResourceMetadataLoaded {
            metadata: metadata.clone(),
            authorization_server_url,
        });
        Ok(Some(metadata))
    }

    /// Fetch the authorization server metadata
    ///
    /// Candidates are tried in order and the first `200` JSON answer wins.
    /// When the metadata already came from fallback discovery it is
    /// returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::Protocol`] when no authorization server is
    /// known or no candidate answers; if no candidate produced any response
    /// the last transport error is returned instead.
    pub async fn fetch_oauth_metadata(&mut self) -> Result<Value> {
        if self.state.oauth_metadata_from_fallback {
            if let Some(metadata) = &self.state.oauth_metadata {
                tracing::info!("OAuth metadata already loaded from fallback discovery");
                return Ok(metadata.clone());
            }
        }

        let as_url = self.state.authorization_server_url.clone().ok_or_else(|| {
            PlaygroundError::Protocol(
                "no authorization server known; fetch resource metadata first".to_string(),
            )
        })?;
        let candidates = oauth_metadata_candidates(&as_url)?;

        let mut answered = false;
        let mut last_error = None;
        for candidate in &candidates {
            tracing::info!(url = %candidate, "Fetching authorization server metadata");
            let exchange = match self
                .send_recorded(
                    Step::MetadataDiscovery,
                    HistoryKind::OAuthMetadata,
                    OutboundRequest::get_json(candidate.clone()),
                    None,
                )
                .await
            {
                Ok(exchange) => exchange,
                Err(e) => {
                    tracing::debug!(url = %candidate, "Candidate failed: {}", e);
                    last_error = Some(e);
                    continue;
                }
            };
            answered = true;

            let response = exchange.response;
            if let (200, Some(metadata @ Value::Object(_))) = (response.status, response.json_body()) {
                self.dispatch(FlowEvent::OAuthMetadataLoaded(metadata.clone()));
                return Ok(metadata);
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Err(PlaygroundError::Protocol(format!(
                "no authorization server metadata found at {}",
                candidates.join(" or ")
            ))
            .into()),
        }
    }

    // -----------------------------------------------------------------------
    // Step 3: client registration
    // -----------------------------------------------------------------------

    /// Register a client dynamically
    ///
    /// Does nothing when a client ID already exists.
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::RegistrationUnsupported`] without a
    /// registration endpoint and [`PlaygroundError::RegistrationFailed`] on
    /// any status other than `200`/`201`. Manual credentials remain
    /// available after either.
    pub async fn register_client(&mut self, client_name: Option<&str>) -> Result<RegistrationOutcome> {
        if let Some(client_id) = &self.state.client_id {
            return Ok(RegistrationOutcome::AlreadyRegistered {
                client_id: client_id.clone(),
            });
        }

        let metadata = self.oauth_metadata()?;
        let endpoint = metadata
            .registration_endpoint
            .filter(|e| !e.is_empty())
            .ok_or(PlaygroundError::RegistrationUnsupported)?;

        let body = json!({
            "client_name": client_name.unwrap_or(&self.settings.client_name),
            "redirect_uris": [self.settings.redirect_uri],
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "client_secret_basic",
        });
        tracing::info!(endpoint = %endpoint, "Registering client");

        let response = self
            .send_recorded(
                Step::ClientRegistration,
                HistoryKind::Registration,
                OutboundRequest::post_json(endpoint, body),
                None,
            )
            .await?
            .response;

        if !matches!(response.status, 200 | 201) {
            return Err(PlaygroundError::RegistrationFailed {
                status: response.status,
            }
            .into());
        }

        let client = response.json_body().unwrap_or(Value::Null);
        let client_id = client
            .get("client_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                PlaygroundError::Protocol("registration response has no client_id".to_string())
            })?
            .to_string();
        let client_secret = client
            .get("client_secret")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        tracing::info!(client_id = %client_id, confidential = client_secret.is_some(), "Client registered");
        self.dispatch(FlowEvent::ClientCredentialsSet {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
        });
        Ok(RegistrationOutcome::Registered {
            client_id,
            client_secret,
        })
    }

    /// Enter client credentials by hand
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::ClientAlreadyRegistered`] if a client ID is
    /// already set, [`PlaygroundError::InvalidInput`] for an empty ID.
    pub fn set_client_credentials(&mut self, client_id: &str, client_secret: Option<&str>) -> Result<()> {
        if let Some(existing) = &self.state.client_id {
            return Err(PlaygroundError::ClientAlreadyRegistered {
                client_id: existing.clone(),
            }
            .into());
        }
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(PlaygroundError::InvalidInput("client ID must not be empty".to_string()).into());
        }
        let client_secret = client_secret
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        self.dispatch(FlowEvent::ClientCredentialsSet {
            client_id: client_id.to_string(),
            client_secret,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Steps 4-5: authorization
    // -----------------------------------------------------------------------

    /// Generate PKCE values and CSRF state, and build the authorization URL
    ///
    /// Preparing again replaces all three and clears any authorization code.
    ///
    /// # Errors
    ///
    /// Returns an error without OAuth metadata, a client ID or a parseable
    /// authorization endpoint.
    pub fn prepare_authorization(&mut self) -> Result<String> {
        let metadata = self.oauth_metadata()?;
        let client_id = self
            .state
            .client_id
            .clone()
            .ok_or_else(|| Self::gate_error(Step::ClientRegistration))?;
        let endpoint = metadata.require_authorization_endpoint()?;

        if pkce::s256_advertised(&metadata) == Some(false) {
            tracing::warn!(
                "Authorization server does not advertise S256 in code_challenge_methods_supported"
            );
        }

        let pair = PkcePair::generate();
        let csrf_state = pkce::generate_state(pkce::STATE_LENGTH);

        let mut url = url::Url::parse(endpoint)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("state", &csrf_state)
            .append_pair("code_challenge", &pair.challenge)
            .append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);
        let authorization_url = url.to_string();

        tracing::info!("Authorization URL prepared");
        self.dispatch(FlowEvent::AuthorizationPrepared {
            pkce: pair,
            csrf_state,
            authorization_url: authorization_url.clone(),
        });
        Ok(authorization_url)
    }

    /// The prepared URL as opened in a browser, forcing a fresh login
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::GateNotSatisfied`] before preparation.
    pub fn browser_authorization_url(&self) -> Result<String> {
        let prepared = self
            .state
            .authorization_url
            .as_deref()
            .ok_or_else(|| Self::gate_error(Step::PrepareAuthorization))?;
        let mut url = url::Url::parse(prepared)?;
        url.query_pairs_mut().append_pair("prompt", "login");
        Ok(url.to_string())
    }

    /// Validate redirect parameters and store the authorization code
    ///
    /// # Errors
    ///
    /// - [`PlaygroundError::AuthorizationDenied`] when the redirect carries
    ///   `error`; the code slot is left untouched.
    /// - [`PlaygroundError::StateMismatch`] when `state` is missing or differs
    ///   from the prepared value.
    /// - [`PlaygroundError::Protocol`] when no code is present.
    pub fn accept_callback(&mut self, params: CallbackParams) -> Result<String> {
        if let Some(error) = params.error {
            return Err(PlaygroundError::AuthorizationDenied {
                error,
                description: params.error_description,
            }
            .into());
        }

        let expected = self
            .state
            .csrf_state
            .clone()
            .ok_or_else(|| Self::gate_error(Step::PrepareAuthorization))?;
        if params.state.as_deref() != Some(expected.as_str()) {
            tracing::warn!("Callback state does not match the prepared state");
            return Err(PlaygroundError::StateMismatch {
                expected,
                received: params.state,
            }
            .into());
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PlaygroundError::Protocol("callback carries no code".to_string()))?;

        tracing::info!("Authorization code accepted");
        self.dispatch(FlowEvent::AuthorizationCodeAccepted(code.clone()));
        Ok(code)
    }

    /// [`accept_callback`](Self::accept_callback) for a pasted callback URL
    pub fn handle_callback_url(&mut self, url: &str) -> Result<String> {
        self.accept_callback(CallbackParams::from_url(url)?)
    }

    /// Store a code pasted by hand
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::InvalidInput`] for an empty code.
    pub fn set_manual_code(&mut self, code: &str) -> Result<()> {
        let code = code.trim();
        if code.is_empty() {
            return Err(PlaygroundError::InvalidInput("authorization code must not be empty".to_string()).into());
        }
        self.dispatch(FlowEvent::AuthorizationCodeAccepted(code.to_string()));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Step 6: token request
    // -----------------------------------------------------------------------

    /// Redeem the authorization code
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::TokenEndpoint`] for an OAuth error body and
    /// [`PlaygroundError::Protocol`] for any other non-token answer.
    pub async fn exchange_token(&mut self) -> Result<String> {
        let metadata = self.oauth_metadata()?;
        let token_endpoint = metadata.require_token_endpoint()?.to_string();
        let client_id = self
            .state
            .client_id
            .clone()
            .ok_or_else(|| Self::gate_error(Step::ClientRegistration))?;
        let code = self
            .state
            .authorization_code
            .clone()
            .ok_or_else(|| Self::gate_error(Step::Authorization))?;
        let verifier = self
            .state
            .code_verifier
            .clone()
            .ok_or_else(|| Self::gate_error(Step::PrepareAuthorization))?;

        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", &code)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("client_id", &client_id)
            .append_pair("code_verifier", &verifier)
            .finish();

        let mut request = OutboundRequest::new("POST", token_endpoint)
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_header("Accept", "application/json")
            .with_body(Value::String(form));
        if let Some(secret) = &self.state.client_secret {
            request = request.with_header("Authorization", basic_auth(&client_id, secret));
        }

        tracing::info!("Exchanging authorization code");
        let response = self
            .send_recorded(Step::TokenRequest, HistoryKind::Token, request, None)
            .await?
            .response;
        let body = response.json_body().unwrap_or(Value::Null);

        if response.status == 200 {
            if let Some(access_token) = body.get("access_token").and_then(Value::as_str) {
                let access_token = access_token.to_string();
                self.dispatch(FlowEvent::TokensIssued {
                    access_token: access_token.clone(),
                    refresh_token: body
                        .get("refresh_token")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    token_type: body.get("token_type").and_then(Value::as_str).map(str::to_string),
                    expires_in: body.get("expires_in").and_then(Value::as_u64),
                });
                tracing::info!("Access token issued");
                return Ok(access_token);
            }
        }

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(PlaygroundError::TokenEndpoint {
                error: error.to_string(),
                description: body
                    .get("error_description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }
            .into());
        }

        Err(PlaygroundError::Protocol(format!(
            "token endpoint answered HTTP {} without an access token",
            response.status
        ))
        .into())
    }

    // -----------------------------------------------------------------------
    // Step 8: MCP session
    // -----------------------------------------------------------------------

    fn mcp_request(&self, body: Value) -> Result<OutboundRequest> {
        let token = self
            .state
            .access_token
            .as_deref()
            .ok_or_else(|| Self::gate_error(Step::TokenRequest))?;
        Ok(OutboundRequest::post_json(self.require_server_url()?, body)
            .with_header("Accept", session::MCP_ACCEPT)
            .with_header("Authorization", format!("Bearer {}", token)))
    }

    fn mcp_session_request(&self, body: Value) -> Result<OutboundRequest> {
        let request = self.mcp_request(body)?;
        Ok(match &self.state.mcp_session_id {
            Some(session_id) => request.with_header(session::SESSION_HEADER, session_id.clone()),
            None => request,
        })
    }

    /// Send `initialize` and capture the session ID
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::Protocol`] for a non-2xx answer. A session
    /// ID in the headers is kept even then.
    ///
    /// `initialize` never carries the stored session ID; whatever this
    /// answer returns replaces it.
    pub async fn initialize_session(&mut self) -> Result<Option<String>> {
        let request = self.mcp_request(session::initialize_request())?;
        tracing::info!("Initializing MCP session");
        let response = self
            .send_recorded(Step::McpTools, HistoryKind::Initialize, request, None)
            .await?
            .response;

        let session_id = session::session_id(&response);
        let server_info = if response.is_success() {
            session::decode_rpc_body(&response.body)
                .as_ref()
                .and_then(session::rpc_result)
                .cloned()
        } else {
            None
        };
        self.dispatch(FlowEvent::McpSessionStarted {
            session_id: session_id.clone(),
            server_info,
        });

        if !response.is_success() {
            return Err(PlaygroundError::Protocol(format!(
                "initialize answered HTTP {}",
                response.status
            ))
            .into());
        }
        Ok(session_id)
    }

    /// Send `tools/list`
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::Protocol`] when the answer holds no tool
    /// list.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        let request = self.mcp_session_request(session::list_tools_request())?;
        tracing::info!("Listing MCP tools");
        let response = self
            .send_recorded(Step::McpTools, HistoryKind::ListTools, request, None)
            .await?
            .response;

        let decoded = session::decode_rpc_body(&response.body);
        if let Some(error) = decoded.as_ref().and_then(session::rpc_error) {
            return Err(PlaygroundError::Protocol(format!("tools/list failed: {}", error)).into());
        }
        let tools = match decoded.as_ref().and_then(session::extract_tools) {
            Some(tools) if response.status == 200 => tools,
            _ => {
                return Err(PlaygroundError::Protocol(format!(
                    "tools/list answered HTTP {} without a tool list",
                    response.status
                ))
                .into())
            }
        };

        tracing::info!(count = tools.len(), "Tools listed");
        self.dispatch(FlowEvent::ToolsListed(tools.clone()));
        Ok(tools)
    }

    /// Choose a tool from the last `tools/list`
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::UnknownTool`] if no tool has that name.
    pub fn select_tool(&mut self, name: &str) -> Result<ToolDescriptor> {
        let tool = self
            .state
            .tools
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| PlaygroundError::UnknownTool(name.to_string()))?;
        self.dispatch(FlowEvent::ToolSelected(tool.clone()));
        Ok(tool)
    }

    /// Call a tool with JSON arguments
    ///
    /// `name` defaults to the selected tool. Arguments are validated before
    /// anything is sent.
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::InvalidToolArguments`] for arguments that
    /// are not a JSON object, [`PlaygroundError::UnknownTool`] when no tool
    /// is named or selected, and [`PlaygroundError::Protocol`] for a
    /// JSON-RPC error or an answer without `result`.
    pub async fn call_tool(&mut self, name: Option<&str>, arguments: &str) -> Result<Value> {
        let arguments = session::parse_tool_arguments(arguments)?;
        let name = match name {
            Some(name) => name.to_string(),
            None => self
                .state
                .selected_tool
                .as_ref()
                .map(|t| t.name.clone())
                .ok_or_else(|| PlaygroundError::UnknownTool("no tool selected".to_string()))?,
        };

        let request = self.mcp_session_request(session::call_tool_request(&name, arguments))?;
        tracing::info!(tool = %name, "Calling MCP tool");
        let response = self
            .send_recorded(Step::McpTools, HistoryKind::CallTool, request, Some(&name))
            .await?
            .response;

        let decoded = session::decode_rpc_body(&response.body);
        if let Some(error) = decoded.as_ref().and_then(session::rpc_error) {
            return Err(PlaygroundError::Protocol(format!("tools/call failed: {}", error)).into());
        }
        let result = decoded
            .as_ref()
            .and_then(session::rpc_result)
            .cloned()
            .ok_or_else(|| {
                PlaygroundError::Protocol(format!(
                    "tools/call answered HTTP {} without a result",
                    response.status
                ))
            })?;

        self.dispatch(FlowEvent::ToolResultReceived(result.clone()));
        Ok(result)
    }
}

fn basic_auth(client_id: &str, client_secret: &str) -> String {
    use base64::Engine;
    let credentials = format!("{}:{}", client_id, client_secret);
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes())
    )
}

/// Default proxy monitor interval from configuration
pub fn health_interval(config: &Config) -> Duration {
    Duration::from_secs(config.proxy.health_interval_seconds.max(1))
}
