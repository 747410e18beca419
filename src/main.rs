//! Process entry point: tracing setup, config load, HTTP client construction, bind.

use std::sync::Arc;

use chat_proxy::config;
use chat_proxy::orchestrator::AppState;
use chat_proxy::server;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()).into()),
        )
        .init();

    let config = config::Config::from_env();
    let client = match config.build_http_client() {
        Ok(client) => Some(client),
        Err(err) => {
            tracing::error!(%err, "failed to build upstream HTTP client; /chat will return 503");
            None
        }
    };

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = AppState {
        client,
        config: Arc::new(config),
    };

    let app = server::app_router(state);

    tracing::info!(%bind_addr, "chat-proxy starting");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind listen address");

    axum::serve(listener, app).await.expect("server failed");
}
