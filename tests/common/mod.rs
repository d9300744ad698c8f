use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcp_auth_playground::flow::{FlowSettings, MemoryStateStore, Playground, StateStore};
use mcp_auth_playground::transport::{DirectChannel, ProxyChannel, RequestMode, Transport};

pub const REDIRECT_URI: &str = "http://localhost:3000/callback";

#[allow(dead_code)]
pub fn settings(server_url: &str) -> FlowSettings {
    FlowSettings {
        default_server_url: server_url.to_string(),
        default_request_mode: RequestMode::Direct,
        redirect_uri: REDIRECT_URI.to_string(),
        client_name: "Integration Test Client".to_string(),
    }
}

/// Direct channel plus a proxy channel pointing at `proxy_url`
#[allow(dead_code)]
pub fn transport_with_proxy(proxy_url: &str) -> Transport {
    let http = reqwest::Client::new();
    Transport::new(
        DirectChannel::new(http.clone()),
        ProxyChannel::new(http, proxy_url, Duration::from_secs(1)),
    )
}

/// Direct channel with an unreachable proxy
#[allow(dead_code)]
pub fn transport() -> Transport {
    transport_with_proxy("http://127.0.0.1:9")
}

#[allow(dead_code)]
pub fn playground(server_url: &str) -> Playground {
    playground_with_store(server_url, Box::new(MemoryStateStore::new()))
}

#[allow(dead_code)]
pub fn playground_with_store(server_url: &str, store: Box<dyn StateStore>) -> Playground {
    Playground::restore(settings(server_url), transport(), store)
}

/// Authorization server metadata served by `base`
#[allow(dead_code)]
pub fn as_metadata(base: &str, with_registration: bool) -> Value {
    let mut metadata = json!({
        "issuer": base,
        "authorization_endpoint": format!("{}/authorize", base),
        "token_endpoint": format!("{}/token", base),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
    });
    if with_registration {
        metadata["registration_endpoint"] = json!(format!("{}/register", base));
    }
    metadata
}

/// Mount the probe challenge, resource metadata and authorization server
/// metadata for an MCP server at `{mock}/mcp`
#[allow(dead_code)]
pub async fn mount_discovery(server: &MockServer, with_registration: bool) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            format!(
                "Bearer realm=\"mcp\", resource_metadata=\"{}/.well-known/oauth-protected-resource/mcp\"",
                base
            )
            .as_str(),
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resource": format!("{}/mcp", base),
            "authorization_servers": [base],
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(as_metadata(&base, with_registration)))
        .mount(server)
        .await;
}

/// Saved-state blob for a flow that already holds an access token
#[allow(dead_code)]
pub fn authenticated_blob(server_url: &str) -> String {
    json!({
        "version": 1,
        "currentStep": 7,
        "mcpServerUrl": server_url,
        "requestMode": "direct",
        "clientId": "client-123",
        "accessToken": "access-abc",
        "tokenType": "Bearer",
    })
    .to_string()
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
