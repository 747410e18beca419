//! Route handlers: `POST /chat` and `GET /health` (spec §6.1).

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ProxyError;
use crate::model::CanonicalRequest;
use crate::orchestrator::{handle_chat, AppState};

/// Build the router. `tower_http::cors::CorsLayer::permissive()` cannot be used here:
/// it refuses to combine a wildcard origin with `allow_credentials(true)` (a
/// `tower-http` validation restriction), while the source proxy's policy is exactly that
/// combination. A predicate-based `AllowOrigin` reproduces the source's wildcard-everything
/// intent without tripping the check.
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|_origin: &HeaderValue, _req| true))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(true)
        .expose_headers(tower_http::cors::Any);

    Router::new()
        .route("/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<CanonicalRequest>,
) -> Response {
    let stream = match handle_chat(state, req).await {
        Ok(stream) => stream,
        Err(err) => return err.into_response(),
    };

    let body = Body::from_stream(stream);
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream; charset=utf-8")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .unwrap_or_else(|_| ProxyError::Internal("failed to build response".into()).into_response())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ok = state.client.is_some();
    let detail = if ok {
        "HTTP client initialized"
    } else {
        "HTTP client not initialized"
    };
    Json(json!({
        "status": if ok { "ok" } else { "warning" },
        "detail": detail,
    }))
}
