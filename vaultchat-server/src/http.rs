//! VaultChat HTTP surface
//!
//! Every request lands on a single dispatcher that picks one behaviour by
//! method and path (first match wins):
//!
//! 1. `OPTIONS *`: CORS preflight, no side effects
//! 2. `GET` not mentioning `/history`: the chat UI document
//! 3. `GET` mentioning `/history`: list + decrypt this client's sessions
//! 4. `POST *`: store the transcript, then proxy it upstream
//! 5. anything else: 404
//!
//! The JSON behaviours are thin wrappers over inner functions returning
//! `(StatusCode, Value)`, which are directly testable without axum dispatch.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use vaultchat_core::config::{HttpConfig, IdentityConfig};
use vaultchat_core::{ChatMessage, ClientId, SessionVault};

use crate::ui::INDEX_HTML;
use crate::upstream::ChatCompletion;

/// Substring of the request target that selects the history listing.
pub const HISTORY_MARKER: &str = "/history";

/// Shared state for the dispatcher
#[derive(Clone)]
pub struct HttpState {
    pub vault: SessionVault,
    pub upstream: Arc<dyn ChatCompletion>,
    pub identity: IdentityConfig,
}

/// Build the Axum router. All paths fall through to [`dispatch_handler`].
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new().fallback(dispatch_handler).with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    config: &HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state).layer(DefaultBodyLimit::max(config.max_body_bytes));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("VaultChat listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
        tracing::info!("HTTP server shutting down...");
    })
    .await?;

    Ok(())
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Preflight,
    Ui,
    History,
    Chat,
    NotFound,
}

/// Pick the behaviour for a request. `target` is the path plus query.
pub fn classify(method: &Method, target: &str) -> Route {
    if method == Method::OPTIONS {
        Route::Preflight
    } else if method == Method::GET {
        if target.contains(HISTORY_MARKER) {
            Route::History
        } else {
            Route::Ui
        }
    } else if method == Method::POST {
        Route::Chat
    } else {
        Route::NotFound
    }
}

/// Derive the partition key: configured header, then (optionally) the TCP
/// peer address, then the sentinel. Nothing here is verified.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>, identity: &IdentityConfig) -> ClientId {
    let from_header = headers
        .get(identity.header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ClientId::new);

    from_header
        .or_else(|| {
            peer.filter(|_| identity.fallback_to_peer)
                .map(|addr| ClientId::new(addr.ip().to_string()))
        })
        .unwrap_or_else(|| ClientId::new(identity.sentinel.clone()))
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

fn error_body(msg: impl std::fmt::Display) -> serde_json::Value {
    serde_json::json!({ "error": msg.to_string() })
}

// ============================================================================
// Inner (directly testable) behaviour functions
// ============================================================================

/// Inner history listing: every session for `client`, undecryptable ones as `data: null`.
pub async fn history_inner(vault: &SessionVault, client: &ClientId) -> (StatusCode, serde_json::Value) {
    match vault.list_decrypted(client).await {
        Ok(records) => {
            tracing::debug!(client = %client, count = records.len(), "Listed sessions");
            match serde_json::to_value(records) {
                Ok(body) => (StatusCode::OK, body),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e)),
            }
        }
        Err(e) => {
            tracing::error!(client = %client, error = %e, "History listing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, error_body(e))
        }
    }
}

/// Inner chat proxy: persist first, then forward. A storage failure means
/// the upstream is never called; a successful write is not undone if the
/// upstream call fails.
pub async fn chat_inner(state: &HttpState, client: &ClientId, body: &[u8]) -> (StatusCode, serde_json::Value) {
    match chat_flow(state, client, body).await {
        Ok(reply) => (StatusCode::OK, reply),
        Err(e) => {
            tracing::error!(client = %client, error = %e, "Chat request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, error_body(e))
        }
    }
}

async fn chat_flow(state: &HttpState, client: &ClientId, body: &[u8]) -> Result<serde_json::Value> {
    let request: ChatRequest = serde_json::from_slice(body)?;

    let session_id = state.vault.store(client, &request.messages).await?;
    tracing::info!(
        client = %client,
        session_id = %session_id,
        count = request.messages.len(),
        "Session stored"
    );

    let reply = state.upstream.complete(&request.messages).await?;
    Ok(reply)
}

// ============================================================================
// Responses
// ============================================================================

fn preflight_response() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
    )
        .into_response()
}

fn ui_response() -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/html; charset=utf-8")],
        INDEX_HTML,
    )
        .into_response()
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(ACCESS_CONTROL_ALLOW_ORIGIN, "*")], Json(body)).into_response()
}

fn not_found_response() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

// ============================================================================
// Axum handler (thin, delegates to inner functions)
// ============================================================================

pub async fn dispatch_handler(
    State(state): State<Arc<HttpState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let peer = peer.map(|ConnectInfo(addr)| addr);

    match classify(&method, target) {
        Route::Preflight => preflight_response(),
        Route::Ui => ui_response(),
        Route::History => {
            let client = client_id(&headers, peer, &state.identity);
            let (status, body) = history_inner(&state.vault, &client).await;
            json_response(status, body)
        }
        Route::Chat => {
            let client = client_id(&headers, peer, &state.identity);
            let (status, body) = match body {
                Ok(body) => chat_inner(&state, &client, &body).await,
                // Oversized or unreadable bodies share the chat error shape.
                Err(rejection) => {
                    tracing::error!(client = %client, error = %rejection.body_text(), "Chat body rejected");
                    (StatusCode::INTERNAL_SERVER_ERROR, error_body(rejection.body_text()))
                }
            };
            json_response(status, body)
        }
        Route::NotFound => {
            tracing::debug!(method = %method, target = %target, "No route");
            not_found_response()
        }
    }
}

// ============================================================================
// Unit Tests: pure routing and identity helpers
// ============================================================================
