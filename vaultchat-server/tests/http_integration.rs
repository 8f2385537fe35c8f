//! HTTP integration tests for the VaultChat dispatcher
//!
//! The router is driven end-to-end with `oneshot` against an in-memory store;
//! the upstream chat API is a wiremock server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use serde_json::json;
use tower::ServiceExt;
use vaultchat_core::config::{IdentityConfig, UpstreamConfig};
use vaultchat_core::vault::DEFAULT_SESSION_TTL;
use vaultchat_core::{EnvelopeCipher, KvStore, MemoryStore, SessionVault, VaultError};
use vaultchat_server::http::{build_router, HttpState};
use vaultchat_server::upstream::UpstreamClient;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "c6aad780c6dae2674bd5e897e2a82027";
const IDENTITY_HEADER: &str = "CF-Connecting-IP";

fn upstream_reply() -> serde_json::Value {
    json!({
        "id": "chatcmpl-42",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello there!"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 1, "completion_tokens": 3, "total_tokens": 4}
    })
}

fn upstream_config(url: String) -> UpstreamConfig {
    UpstreamConfig {
        url,
        api_key: "test-api-key".to_string(),
        timeout_seconds: 5,
        ..UpstreamConfig::default()
    }
}

fn make_app_with(store: Arc<dyn KvStore>, upstream_url: String) -> Router {
    let vault = SessionVault::new(
        store,
        EnvelopeCipher::derive(SECRET).unwrap(),
        DEFAULT_SESSION_TTL,
    );
    let upstream = UpstreamClient::new(upstream_config(upstream_url)).unwrap();
    build_router(Arc::new(HttpState {
        vault,
        upstream: Arc::new(upstream),
        identity: IdentityConfig::default(),
    }))
}

/// Router backed by a fresh in-memory store and the given mock upstream.
fn make_app(mock_server: &MockServer) -> (Arc<MemoryStore>, Router) {
    let store = Arc::new(MemoryStore::new());
    let app = make_app_with(
        store.clone(),
        format!("{}/v1/chat/completions", mock_server.uri()),
    );
    (store, app)
}

async fn mount_upstream(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-api-key"))
        .and(body_partial_json(json!({"model": "deepseek-chat", "temperature": 0.7})))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_reply()))
        .mount(mock_server)
        .await;
}

fn post_chat(client: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json");
    if let Some(ip) = client {
        builder = builder.header(IDENTITY_HEADER, ip);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_history(client: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri("/history");
    if let Some(ip) = client {
        builder = builder.header(IDENTITY_HEADER, ip);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Bytes {
    axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

fn cors_origin(resp: &axum::response::Response) -> Option<&str> {
    resp.headers()
        .get("access-control-allow-origin")
        .and_then(|v| v.to_str().ok())
}

/// Store that refuses every operation.
struct UnreachableStore;

#[async_trait]
impl KvStore for UnreachableStore {
    async fn put(&self, _: &str, _: Bytes, _: Duration) -> Result<(), VaultError> {
        Err(VaultError::Store("connection refused".to_string()))
    }
    async fn get(&self, _: &str) -> Result<Option<Bytes>, VaultError> {
        Err(VaultError::Store("connection refused".to_string()))
    }
    async fn list(&self, _: &str) -> Result<Vec<String>, VaultError> {
        Err(VaultError::Store("connection refused".to_string()))
    }
    async fn ping(&self) -> Result<String, VaultError> {
        Err(VaultError::Store("connection refused".to_string()))
    }
    fn name(&self) -> &str {
        "unreachable"
    }
}

// ===========================================================================
// TEST 1: OPTIONS is always a preflight, whatever the path
// ===========================================================================
#[tokio::test]
async fn test_preflight_on_any_path() {
    let mock_server = MockServer::start().await;
    let (store, app) = make_app(&mock_server);

    for uri in ["/", "/history", "/some/deep/path"] {
        let req = Request::builder()
            .method("OPTIONS")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::NO_CONTENT, "uri {}", uri);
        assert_eq!(cors_origin(&resp), Some("*"));
        assert_eq!(
            resp.headers()["access-control-allow-methods"],
            "GET, POST, OPTIONS"
        );
        assert_eq!(resp.headers()["access-control-allow-headers"], "Content-Type");
        assert!(body_bytes(resp).await.is_empty());
    }

    assert!(store.is_empty().await, "Preflight must not touch the store");
}

// ===========================================================================
// TEST 2: GET / serves the UI document
// ===========================================================================
#[tokio::test]
async fn test_get_root_serves_ui() {
    let mock_server = MockServer::start().await;
    let (_store, app) = make_app(&mock_server);

    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"), "got {}", content_type);
    let html = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
    assert!(html.starts_with("<!DOCTYPE html>"));
}

// ===========================================================================
// TEST 3: POST stores one session and relays the upstream body verbatim
// ===========================================================================
#[tokio::test]
async fn test_chat_stores_session_and_relays_upstream() {
    let mock_server = MockServer::start().await;
    mount_upstream(&mock_server).await;
    let (store, app) = make_app(&mock_server);

    let resp = app
        .oneshot(post_chat(
            Some("1.2.3.4"),
            r#"{"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(cors_origin(&resp), Some("*"));
    assert_eq!(body_json(resp).await, upstream_reply());

    let keys = store.list("hist_1.2.3.4_").await.unwrap();
    assert_eq!(keys.len(), 1, "Exactly one session should be written");

    let raw = store.get(&keys[0]).await.unwrap().unwrap();
    assert!(
        !String::from_utf8_lossy(&raw).contains("\"hi\""),
        "Stored value must not be plaintext"
    );

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let forwarded: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(
        forwarded,
        json!({
            "model": "deepseek-chat",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.7
        })
    );
}

// ===========================================================================
// TEST 4: history after a chat returns the decrypted transcript
// ===========================================================================
#[tokio::test]
async fn test_history_returns_what_was_posted() {
    let mock_server = MockServer::start().await;
    mount_upstream(&mock_server).await;
    let (_store, app) = make_app(&mock_server);

    let resp = app
        .clone()
        .oneshot(post_chat(
            Some("1.2.3.4"),
            r#"{"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(get_history(Some("1.2.3.4"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(cors_origin(&resp), Some("*"));
    assert_eq!(resp.headers()["content-type"], "application/json");

    let body = body_json(resp).await;
    let entries = body.as_array().expect("history must be an array");
    assert_eq!(entries.len(), 1);
    assert!(entries[0]["id"].as_str().unwrap().starts_with("hist_1.2.3.4_"));
    assert_eq!(entries[0]["data"][0]["content"], "hi");
    assert_eq!(entries[0]["data"][0]["role"], "user");
}

// ===========================================================================
// TEST 5: another client sees none of the first client's sessions
// ===========================================================================
#[tokio::test]
async fn test_history_is_partitioned_by_client() {
    let mock_server = MockServer::start().await;
    mount_upstream(&mock_server).await;
    let (_store, app) = make_app(&mock_server);

    app.clone()
        .oneshot(post_chat(
            Some("1.2.3.4"),
            r#"{"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .await
        .unwrap();

    for other in ["5.6.7.8", "1.2.3.45"] {
        let resp = app.clone().oneshot(get_history(Some(other))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!([]), "client {}", other);
    }

    // No header at all lands in the sentinel partition
    let resp = app.oneshot(get_history(None)).await.unwrap();
    assert_eq!(body_json(resp).await, json!([]));
}

// ===========================================================================
// TEST 6: corrupt entries list as data:null without hiding good ones
// ===========================================================================
#[tokio::test]
async fn test_corrupt_entries_listed_as_null() {
    let mock_server = MockServer::start().await;
    mount_upstream(&mock_server).await;
    let (store, app) = make_app(&mock_server);

    app.clone()
        .oneshot(post_chat(
            Some("1.2.3.4"),
            r#"{"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .await
        .unwrap();

    store
        .put("hist_1.2.3.4_1", Bytes::from_static(b"\xff\x00 not json"), DEFAULT_SESSION_TTL)
        .await
        .unwrap();
    let bogus_envelope = serde_json::to_vec(&json!({"iv": vec![0u8; 12], "data": [1, 2, 3]})).unwrap();
    store
        .put("hist_1.2.3.4_2", Bytes::from(bogus_envelope), DEFAULT_SESSION_TTL)
        .await
        .unwrap();

    let resp = app.oneshot(get_history(Some("1.2.3.4"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 3);

    let nulls: Vec<&str> = entries
        .iter()
        .filter(|e| e["data"].is_null())
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(nulls.len(), 2);
    assert!(nulls.contains(&"hist_1.2.3.4_1"));
    assert!(nulls.contains(&"hist_1.2.3.4_2"));

    let good: Vec<&serde_json::Value> = entries.iter().filter(|e| !e["data"].is_null()).collect();
    assert_eq!(good.len(), 1);
    assert_eq!(good[0]["data"][0]["content"], "hi");
}

// ===========================================================================
// TEST 7: malformed body is a 500 and nothing is stored or forwarded
// ===========================================================================
#[tokio::test]
async fn test_malformed_body_is_500() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_reply()))
        .expect(0)
        .mount(&mock_server)
        .await;
    let (store, app) = make_app(&mock_server);

    for body in ["{not json", r#"{"prompt":"hi"}"#, r#"{"messages":"hi"}"#] {
        let resp = app
            .clone()
            .oneshot(post_chat(Some("1.2.3.4"), body))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR, "body {}", body);
        let json = body_json(resp).await;
        assert!(json["error"].is_string(), "Should have error message");
        assert_eq!(json.as_object().unwrap().len(), 1, "Error shape is {{error}}");
    }

    assert!(store.is_empty().await);
}

// ===========================================================================
// TEST 8: store failure short-circuits before the upstream call
// ===========================================================================
#[tokio::test]
async fn test_store_failure_skips_upstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_reply()))
        .expect(0)
        .mount(&mock_server)
        .await;
    let app = make_app_with(
        Arc::new(UnreachableStore),
        format!("{}/v1/chat/completions", mock_server.uri()),
    );

    let resp = app
        .oneshot(post_chat(
            Some("1.2.3.4"),
            r#"{"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(resp).await;
    assert!(json["error"].as_str().unwrap().contains("connection refused"));
}

// ===========================================================================
// TEST 9: history on an unreachable store is a 500 JSON error
// ===========================================================================
#[tokio::test]
async fn test_history_store_failure_is_500() {
    let mock_server = MockServer::start().await;
    let app = make_app_with(
        Arc::new(UnreachableStore),
        format!("{}/v1/chat/completions", mock_server.uri()),
    );

    let resp = app.oneshot(get_history(Some("1.2.3.4"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers()["content-type"], "application/json");
    let json = body_json(resp).await;
    assert!(json["error"].is_string());
}

// ===========================================================================
// TEST 10: upstream error payloads are relayed with 200
// ===========================================================================
#[tokio::test]
async fn test_upstream_error_payload_relayed() {
    let mock_server = MockServer::start().await;
    let error_body = json!({"error": {"message": "Authentication Fails", "type": "authentication_error"}});
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body.clone()))
        .mount(&mock_server)
        .await;
    let (store, app) = make_app(&mock_server);

    let resp = app
        .oneshot(post_chat(
            Some("1.2.3.4"),
            r#"{"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, error_body);
    assert_eq!(store.len().await, 1);
}

// ===========================================================================
// TEST 11: unreachable upstream is a 500, but the stored session stays
// ===========================================================================
#[tokio::test]
async fn test_upstream_unreachable_keeps_stored_session() {
    let store = Arc::new(MemoryStore::new());
    let app = make_app_with(
        store.clone(),
        "http://127.0.0.1:9/v1/chat/completions".to_string(),
    );

    let resp = app
        .oneshot(post_chat(
            Some("1.2.3.4"),
            r#"{"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(resp).await["error"].is_string());
    assert_eq!(store.list("hist_1.2.3.4_").await.unwrap().len(), 1);
}

// ===========================================================================
// TEST 12: multi-turn transcripts keep order and extra fields
// ===========================================================================
#[tokio::test]
async fn test_multi_turn_transcript_round_trips() {
    let mock_server = MockServer::start().await;
    mount_upstream(&mock_server).await;
    let (_store, app) = make_app(&mock_server);

    let messages = json!([
        {"role": "system", "content": "Be brief."},
        {"role": "user", "content": "first"},
        {"role": "assistant", "content": "second", "name": "bot"},
        {"role": "user", "content": "third"}
    ]);
    let body = json!({ "messages": messages }).to_string();

    app.clone()
        .oneshot(post_chat(Some("9.9.9.9"), &body))
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let forwarded: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(forwarded["messages"], messages);

    let resp = app.oneshot(get_history(Some("9.9.9.9"))).await.unwrap();
    let history = body_json(resp).await;
    assert_eq!(history[0]["data"], messages);
}

// ===========================================================================
// TEST 13: other methods are 404 plain text
// ===========================================================================
#[tokio::test]
async fn test_other_methods_not_found() {
    let mock_server = MockServer::start().await;
    let (store, app) = make_app(&mock_server);

    for m in ["PUT", "DELETE", "PATCH"] {
        let req = Request::builder()
            .method(m)
            .uri("/history")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "method {}", m);
        assert_eq!(&body_bytes(resp).await[..], b"Not Found");
    }

    assert!(store.is_empty().await);
}

// ===========================================================================
// TEST 14: tool-call turns with null content are stored and forwarded as sent
// ===========================================================================
#[tokio::test]
async fn test_null_content_tool_call_turn_round_trips() {
    let mock_server = MockServer::start().await;
    mount_upstream(&mock_server).await;
    let (store, app) = make_app(&mock_server);

    let messages = json!([
        {"role": "user", "content": "weather in Oslo?"},
        {"role": "assistant", "content": null, "tool_calls": [{
            "id": "call_1",
            "type": "function",
            "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}
        }]},
        {"role": "tool", "tool_call_id": "call_1", "content": "4C, rain"}
    ]);
    let body = json!({ "messages": messages }).to_string();

    let resp = app
        .clone()
        .oneshot(post_chat(Some("5.5.5.5"), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, upstream_reply());
    assert_eq!(store.len().await, 1);

    let requests = mock_server.received_requests().await.unwrap();
    let forwarded: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(forwarded["messages"], messages);

    let resp = app.oneshot(get_history(Some("5.5.5.5"))).await.unwrap();
    let history = body_json(resp).await;
    assert_eq!(history[0]["data"], messages);
}

// ===========================================================================
// TEST 15: multi-part (array) content and content-less turns round trip
// ===========================================================================
#[tokio::test]
async fn test_array_content_round_trips() {
    let mock_server = MockServer::start().await;
    mount_upstream(&mock_server).await;
    let (store, app) = make_app(&mock_server);

    let messages = json!([
        {"role": "user", "content": [
            {"type": "text", "text": "what is in this picture?"},
            {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}}
        ]},
        {"role": "assistant"}
    ]);
    let body = json!({ "messages": messages }).to_string();

    let resp = app
        .clone()
        .oneshot(post_chat(Some("6.6.6.6"), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(store.len().await, 1);

    let requests = mock_server.received_requests().await.unwrap();
    let forwarded: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(forwarded["messages"], messages);

    let resp = app.oneshot(get_history(Some("6.6.6.6"))).await.unwrap();
    let history = body_json(resp).await;
    assert_eq!(history[0]["data"], messages);
}

// ===========================================================================
// TEST 16: a body over the size limit gets the JSON error shape, not a 413
// ===========================================================================
#[tokio::test]
async fn test_oversized_body_is_500_json() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_reply()))
        .expect(0)
        .mount(&mock_server)
        .await;
    let (store, app) = make_app(&mock_server);
    let app = app.layer(DefaultBodyLimit::max(64));

    let body = json!({ "messages": [{"role": "user", "content": "x".repeat(500)}] }).to_string();
    let resp = app.oneshot(post_chat(Some("1.2.3.4"), &body)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(cors_origin(&resp), Some("*"));
    let json = body_json(resp).await;
    assert!(json["error"].is_string(), "Should have error message");
    assert_eq!(json.as_object().unwrap().len(), 1, "Error shape is {{error}}");
    assert!(store.is_empty().await);
}
