//! MCP session integration tests using wiremock
//!
//! Starts from a flow that already holds an access token and exercises
//! step 8: `initialize`, `tools/list` and `tools/call` with bearer
//! authentication, session ID replay and event-stream framed responses.

mod common;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcp_auth_playground::flow::{HistoryKind, MemoryStateStore, Playground};
use mcp_auth_playground::PlaygroundError;

fn authenticated(server: &MockServer) -> Playground {
    let server_url = format!("{}/mcp", server.uri());
    common::playground_with_store(
        &server_url,
        Box::new(MemoryStateStore::with_blob(common::authenticated_blob(
            &server_url,
        ))),
    )
}

fn rpc_method(name: &str) -> String {
    format!("\"method\":\"{}\"", name)
}

#[tokio::test]
async fn test_session_id_is_replayed_on_later_requests() {
    let server = MockServer::start().await;

    let init_result = json!({
        "jsonrpc": "2.0",
        "id": 0,
        "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock-mcp", "version": "0.1.0"}
        }
    });
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("authorization", "Bearer access-abc"))
        .and(body_string_contains(rpc_method("initialize").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("mcp-session-id", "sess-42")
                .insert_header("content-type", "text/event-stream")
                .set_body_string(format!("event: message\ndata: {}\n\n", init_result)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("mcp-session-id", "sess-42"))
        .and(header("authorization", "Bearer access-abc"))
        .and(body_string_contains(rpc_method("tools/list").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "tools": [
                    {
                        "name": "echo",
                        "description": "Echo the input",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"text": {"type": "string"}}
                        }
                    },
                    {"name": "time"}
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("mcp-session-id", "sess-42"))
        .and(body_string_contains(rpc_method("tools/call").as_str()))
        .and(body_string_contains("\"arguments\":{\"text\":\"hello\"}"))
        .and(body_string_contains("\"name\":\"echo\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {"content": [{"type": "text", "text": "hello"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut pg = authenticated(&server);
    assert_eq!(pg.furthest_step(), 8);
    pg.goto(8).unwrap();

    let session_id = pg.initialize_session().await.unwrap();
    assert_eq!(session_id.as_deref(), Some("sess-42"));
    assert_eq!(
        pg.state().mcp_server_info.as_ref().unwrap()["serverInfo"]["name"],
        "mock-mcp"
    );

    let tools = pg.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "time"]);
    assert!(tools[0].input_schema.is_some());

    pg.select_tool("echo").unwrap();
    let result = pg.call_tool(None, r#"{"text": "hello"}"#).await.unwrap();
    assert_eq!(result["content"][0]["text"], "hello");
    assert_eq!(pg.state().tool_result.as_ref(), Some(&result));

    let history = pg.state().history_for(8);
    let kinds: Vec<_> = history.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            Some(HistoryKind::Initialize),
            Some(HistoryKind::ListTools),
            Some(HistoryKind::CallTool)
        ]
    );
    assert_eq!(history[2].tool.as_deref(), Some("echo"));
    assert_eq!(history[1].request.body.as_ref().unwrap()["id"], 1);
}

#[tokio::test]
async fn test_rpc_error_from_tool_call_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32602, "message": "Unknown tool: nope"}
        })))
        .mount(&server)
        .await;

    let mut pg = authenticated(&server);
    let err = pg.call_tool(Some("nope"), "{}").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PlaygroundError>(),
        Some(PlaygroundError::Protocol(message)) if message.contains("Unknown tool")
    ));
    assert!(pg.state().tool_result.is_none());

    let history = pg.state().history_for(8);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].tool.as_deref(), Some("nope"));
}

#[tokio::test]
async fn test_rejected_initialize_fails_without_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            "Bearer error=\"invalid_token\"",
        ))
        .mount(&server)
        .await;

    let mut pg = authenticated(&server);
    let err = pg.initialize_session().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PlaygroundError>(),
        Some(PlaygroundError::Protocol(_))
    ));
    assert!(pg.state().mcp_session_id.is_none());
    assert_eq!(pg.state().history_for(8).len(), 1);
}

#[tokio::test]
async fn test_unknown_tool_selection_is_rejected() {
    let server = MockServer::start().await;
    let mut pg = authenticated(&server);
    let err = pg.select_tool("missing").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PlaygroundError>(),
        Some(PlaygroundError::UnknownTool(_))
    ));

    let err = pg.call_tool(None, "{}").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PlaygroundError>(),
        Some(PlaygroundError::UnknownTool(_))
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reinitialize_replaces_saved_session_id() {
    let server = MockServer::start().await;
    let server_url = format!("{}/mcp", server.uri());

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_string_contains(rpc_method("initialize").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("mcp-session-id", "sess-new")
                .set_body_json(json!({"jsonrpc": "2.0", "id": 0, "result": {}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("mcp-session-id", "sess-new"))
        .and(body_string_contains(rpc_method("tools/list").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"tools": []}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut blob: serde_json::Value =
        serde_json::from_str(&common::authenticated_blob(&server_url)).unwrap();
    blob["mcpSessionId"] = json!("stale-from-last-run");
    let mut pg = common::playground_with_store(
        &server_url,
        Box::new(MemoryStateStore::with_blob(blob.to_string())),
    );
    assert_eq!(pg.state().mcp_session_id.as_deref(), Some("stale-from-last-run"));

    let session_id = pg.initialize_session().await.unwrap();
    assert_eq!(session_id.as_deref(), Some("sess-new"));
    assert_eq!(pg.state().mcp_session_id.as_deref(), Some("sess-new"));
    assert!(pg.list_tools().await.unwrap().is_empty());

    let init = &pg.state().history_for(8)[0];
    assert_eq!(init.kind, Some(HistoryKind::Initialize));
    assert!(init
        .request
        .headers
        .keys()
        .all(|name| !name.eq_ignore_ascii_case("mcp-session-id")));
}

#[tokio::test]
async fn test_initialize_without_session_clears_saved_id() {
    let server = MockServer::start().await;
    let server_url = format!("{}/mcp", server.uri());
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 0,
            "result": {"serverInfo": {"name": "stateless"}}
        })))
        .mount(&server)
        .await;

    let mut blob: serde_json::Value =
        serde_json::from_str(&common::authenticated_blob(&server_url)).unwrap();
    blob["mcpSessionId"] = json!("stale-from-last-run");
    let mut pg = common::playground_with_store(
        &server_url,
        Box::new(MemoryStateStore::with_blob(blob.to_string())),
    );

    assert!(pg.initialize_session().await.unwrap().is_none());
    assert!(pg.state().mcp_session_id.is_none());
    assert_eq!(
        pg.state().mcp_server_info.as_ref().unwrap()["serverInfo"]["name"],
        "stateless"
    );
}
