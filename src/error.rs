//! Pre-stream error surface. Once the SSE body has started, failures are represented
//! as `NormalizedEvent::Error` + `NormalizedEvent::Finish` instead (see `orchestrator`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Service unavailable: HTTP client not initialized.")]
    Configuration,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::Configuration => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(%status, "Responding error: {}", self);
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "code": status.as_u16(),
                "type": "proxy_error",
            }
        }));
        (status, body).into_response()
    }
}
