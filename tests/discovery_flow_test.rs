//! Discovery integration tests using wiremock
//!
//! Covers steps 1 and 2 of the flow against a mock MCP server:
//!
//! - A `401` carrying `resource_metadata` in `WWW-Authenticate` yields the
//!   resource metadata URL without any fallback probing.
//! - Resource metadata leads to the authorization server metadata.
//! - Path-bearing issuers fall back to the OIDC legacy location.
//! - Fallback discovery probes the well-known URIs and lets the user adopt
//!   one result.

mod common;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcp_auth_playground::auth::discovery::{FallbackReason, MetadataType, ProbeStatus};
use mcp_auth_playground::auth::ProbeVerdict;
use mcp_auth_playground::flow::HistoryKind;
use mcp_auth_playground::PlaygroundError;

#[tokio::test]
async fn test_challenge_header_yields_resource_metadata_url() {
    let server = MockServer::start().await;
    common::mount_discovery(&server, true).await;
    let server_url = format!("{}/mcp", server.uri());

    let mut pg = common::playground(&server_url);
    pg.start();
    let verdict = pg.connect().await.expect("probe should complete");

    let expected = format!("{}/.well-known/oauth-protected-resource/mcp", server.uri());
    match verdict {
        ProbeVerdict::ResourceMetadataAdvertised { url, .. } => assert_eq!(url, expected),
        other => panic!("unexpected verdict: {:?}", other),
    }
    assert_eq!(pg.state().resource_metadata_url.as_deref(), Some(expected.as_str()));
    assert!(pg
        .state()
        .www_authenticate
        .as_deref()
        .is_some_and(|h| h.starts_with("Bearer")));

    let history = pg.state().history_for(1);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, Some(HistoryKind::Probe));
    assert_eq!(history[0].response.status, 401);
    assert_eq!(pg.furthest_step(), 2);

    // The probe alone never touches fallback locations.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_resource_metadata_leads_to_oauth_metadata() {
    let server = MockServer::start().await;
    common::mount_discovery(&server, true).await;
    let mut pg = common::playground(&format!("{}/mcp", server.uri()));
    pg.start();
    pg.connect().await.unwrap();

    let resource = pg.fetch_resource_metadata().await.unwrap().unwrap();
    assert_eq!(resource["authorization_servers"][0], server.uri());
    assert_eq!(
        pg.state().authorization_server_url.as_deref(),
        Some(server.uri().as_str())
    );

    let metadata = pg.fetch_oauth_metadata().await.unwrap();
    assert_eq!(metadata["token_endpoint"], format!("{}/token", server.uri()));
    assert!(pg.state().oauth_metadata.is_some());
    assert!(!pg.state().oauth_metadata_from_fallback);

    let kinds: Vec<_> = pg.state().history_for(2).iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            Some(HistoryKind::ResourceMetadata),
            Some(HistoryKind::OAuthMetadata)
        ]
    );
    assert_eq!(pg.furthest_step(), 3);
    assert_eq!(pg.advance().unwrap().index(), 2);
    assert_eq!(pg.advance().unwrap().index(), 3);
}

#[tokio::test]
async fn test_path_issuer_falls_back_to_openid_configuration() {
    let server = MockServer::start().await;
    let base = server.uri();
    let issuer = format!("{}/tenant", base);

    Mock::given(method("GET"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            format!("Bearer resource_metadata={}/prm", base).as_str(),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resource": format!("{}/mcp", base),
            "authorization_servers": [issuer],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tenant/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::as_metadata(&issuer, false)))
        .expect(1)
        .mount(&server)
        .await;

    let mut pg = common::playground(&format!("{}/mcp", base));
    pg.start();
    pg.connect().await.unwrap();
    pg.fetch_resource_metadata().await.unwrap();
    let metadata = pg.fetch_oauth_metadata().await.unwrap();
    assert_eq!(metadata["issuer"], issuer);

    // RFC 8414 path insertion is tried first and misses.
    let oauth_attempts: Vec<_> = pg
        .state()
        .history_for(2)
        .iter()
        .filter(|e| e.kind == Some(HistoryKind::OAuthMetadata))
        .map(|e| (e.request.url.clone(), e.response.status))
        .collect();
    assert_eq!(
        oauth_attempts,
        vec![
            (
                format!("{}/.well-known/oauth-authorization-server/tenant", base),
                404
            ),
            (format!("{}/tenant/.well-known/openid-configuration", base), 200),
        ]
    );
}

#[tokio::test]
async fn test_missing_metadata_everywhere_is_a_protocol_error() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            format!("Bearer resource_metadata=\"{}/prm\"", base).as_str(),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prm"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"authorization_servers": [base]})),
        )
        .mount(&server)
        .await;

    let mut pg = common::playground(&format!("{}/mcp", base));
    pg.start();
    pg.connect().await.unwrap();
    pg.fetch_resource_metadata().await.unwrap();

    let err = pg.fetch_oauth_metadata().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PlaygroundError>(),
        Some(PlaygroundError::Protocol(_))
    ));
    assert!(pg.state().oauth_metadata.is_none());
    assert_eq!(pg.furthest_step(), 2);
}

#[tokio::test]
async fn test_fallback_discovery_adopts_authorization_server_metadata() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::as_metadata(&base, true)))
        .mount(&server)
        .await;

    let mut pg = common::playground(&format!("{}/mcp", base));
    pg.start();
    let verdict = pg.connect().await.unwrap();
    assert!(matches!(
        verdict,
        ProbeVerdict::FallbackRequired {
            reason: FallbackReason::MissingChallenge,
            ..
        }
    ));

    let results = pg.run_fallback_discovery().await.unwrap();
    assert_eq!(results.len(), 6);
    assert!(results[..3].iter().all(|r| r.base == base));
    assert!(results[3..].iter().all(|r| r.base == format!("{}/mcp", base)));

    let usable: Vec<_> = results.iter().filter(|r| r.success).collect();
    assert_eq!(usable.len(), 1);
    assert_eq!(usable[0].status, ProbeStatus::Http(200));
    assert_eq!(usable[0].metadata_type, Some(MetadataType::OauthAs));
    assert!(results
        .iter()
        .filter(|r| !r.success)
        .all(|r| r.status == ProbeStatus::Http(404)));

    let kind = pg.select_discovery_result(usable[0]).unwrap();
    assert_eq!(kind, MetadataType::OauthAs);
    assert!(pg.state().oauth_metadata_from_fallback);
    assert!(pg.state().manual_discovery);
    assert!(pg.state().authorization_server_url.is_none());
    assert_eq!(pg.furthest_step(), 3);

    // Step 2 is already satisfied; neither fetch goes to the network.
    let before = server.received_requests().await.unwrap().len();
    assert!(pg.fetch_resource_metadata().await.unwrap().is_none());
    let metadata = pg.fetch_oauth_metadata().await.unwrap();
    assert_eq!(metadata["issuer"], base);
    assert_eq!(server.received_requests().await.unwrap().len(), before);
}

#[tokio::test]
async fn test_unsuccessful_discovery_result_cannot_be_adopted() {
    let server = MockServer::start().await;
    let mut pg = common::playground(&format!("{}/mcp", server.uri()));
    pg.start();

    let results = pg.run_fallback_discovery().await.unwrap();
    assert!(results.iter().all(|r| !r.success));

    let err = pg.select_discovery_result(&results[0]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PlaygroundError>(),
        Some(PlaygroundError::Protocol(_))
    ));
    assert!(pg.state().oauth_metadata.is_none());
}

#[tokio::test]
async fn test_adopted_resource_metadata_is_not_fetched_again() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resource": format!("{}/mcp", base),
            "authorization_servers": [base.clone()]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut pg = common::playground(&format!("{}/mcp", base));
    pg.start();
    pg.connect().await.unwrap();

    let results = pg.run_fallback_discovery().await.unwrap();
    let resource = results
        .iter()
        .find(|r| r.success)
        .expect("resource metadata was found");
    assert_eq!(resource.metadata_type, Some(MetadataType::Resource));
    assert!(results
        .iter()
        .filter(|r| !r.success)
        .all(|r| r.metadata_type.is_none()));

    pg.select_discovery_result(resource).unwrap();
    assert_eq!(pg.state().authorization_server_url.as_deref(), Some(base.as_str()));

    let before = server.received_requests().await.unwrap().len();
    let metadata = pg.fetch_resource_metadata().await.unwrap().unwrap();
    assert_eq!(metadata["authorization_servers"][0], base);
    assert_eq!(server.received_requests().await.unwrap().len(), before);
    assert!(pg.state().history_for(2).is_empty());
}
