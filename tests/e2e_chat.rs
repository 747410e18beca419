//! Black-box `/chat` tests against a local mock upstream (spec §8 scenarios S1 and S5).
//!
//! The mock upstream is a tiny axum server bound to an ephemeral port via
//! `tokio::net::TcpListener`, the same "local mock listener" tooling
//! `SPEC_FULL.md`'s test-tooling section calls for — no real network access.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use chat_proxy::config::Config;
use chat_proxy::orchestrator::AppState;
use chat_proxy::server::app_router;
use tower::ServiceExt;

async fn spawn_mock_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn sse_body(lines: &'static str) -> Response {
    ([("content-type", "text/event-stream")], lines).into_response()
}

async fn mock_openai_happy_path() -> Response {
    sse_body(
        "data: {\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}\n\n\
         data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n\
         data: [DONE]\n\n",
    )
}

async fn mock_openai_unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("content-type", "application/json")],
        r#"{"error":{"message":"bad key"}}"#,
    )
        .into_response()
}

async fn read_lines(response: Response) -> Vec<serde_json::Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn chat_app() -> Router {
    app_router(AppState {
        client: Some(reqwest::Client::new()),
        config: Arc::new(Config::from_env()),
    })
}

#[tokio::test]
async fn s1_openai_happy_path_no_reasoning_no_search() {
    let mock = spawn_mock_upstream(Router::new().route("/v1/chat/completions", post(mock_openai_happy_path))).await;

    let body = serde_json::json!({
        "provider": "openai",
        "model": "gpt-4o-mini",
        "api_key": "K",
        "api_address": mock,
        "messages": [{"role": "user", "content": "hi"}],
    });

    let response = chat_app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream; charset=utf-8"
    );

    let events = read_lines(response).await;
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["content", "content", "finish"]);
    assert_eq!(events[0]["text"], "hel");
    assert_eq!(events[1]["text"], "lo");
    assert_eq!(events[2]["reason"], "stop");
}

#[tokio::test]
async fn s5_upstream_401_yields_error_then_finish() {
    let mock = spawn_mock_upstream(Router::new().route("/v1/chat/completions", post(mock_openai_unauthorized))).await;

    let body = serde_json::json!({
        "provider": "openai",
        "model": "gpt-4o-mini",
        "api_key": "K",
        "api_address": mock,
        "messages": [{"role": "user", "content": "hi"}],
    });

    let response = chat_app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let events = read_lines(response).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "error");
    assert_eq!(events[0]["message"], "bad key");
    assert_eq!(events[0]["upstream_status"], 401);
    assert_eq!(events[1]["type"], "finish");
    assert_eq!(events[1]["reason"], "upstream_error");
}
