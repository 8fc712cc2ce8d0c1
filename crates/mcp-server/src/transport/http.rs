//! HTTP/SSE transport for MCP

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::sse::SessionManager;
use crate::error::TransportError;

/// Path clients post messages to, advertised in the `endpoint` event
pub const MESSAGES_PATH: &str = "/messages";

/// Shared state for HTTP handlers
struct AppState {
    sessions: Arc<SessionManager>,
    started: Instant,
}

/// Build the HTTP surface over a session manager
pub fn router(sessions: Arc<SessionManager>) -> Router {
    let state = Arc::new(AppState {
        sessions,
        started: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/sse", get(handle_sse))
        .route(MESSAGES_PATH, post(handle_message))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptimeSeconds": state.started.elapsed().as_secs_f64(),
    }))
}

/// Open a session and stream its responses
async fn handle_sse(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, TransportError> {
    // The token is never logged; the endpoint does not authenticate.
    let has_bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Bearer "));
    if has_bearer {
        info!("[SSE] Bearer token present");
    } else {
        warn!("[SSE] No bearer token");
    }

    let mut session = state.sessions.open_session()?;

    let stream = async_stream::stream! {
        let endpoint = format!("{}?sessionId={}", MESSAGES_PATH, session.session_id());
        yield Ok(Event::default().event("endpoint").data(endpoint));

        while let Some(message) = session.next_message().await {
            match Event::default().event("message").json_data(&message) {
                Ok(event) => yield Ok(event),
                Err(e) => error!("[SSE] Failed to encode message: {}", e),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Accept a JSON-RPC message for a session; the reply goes out on its stream
async fn handle_message(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), TransportError> {
    state
        .sessions
        .route_message(query.session_id.as_deref(), &body)
        .inspect_err(|e| {
            if e.status_code().is_server_error() {
                error!("[SSE] Message processing failed: {}", e);
            }
        })?;

    Ok((StatusCode::ACCEPTED, "Accepted"))
}
