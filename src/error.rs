use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the proxy.
///
/// Every variant maps to a clean HTTP status with a short message. Upstream
/// detail (headers, body previews, transport errors) is logged, never echoed
/// back to the client.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("url is required")]
    MissingUrl,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("upstream responded with {0}")]
    UpstreamFailure(StatusCode),

    #[error("upstream transport error: {0}")]
    TransportFailure(#[from] reqwest::Error),

    #[error("rewrite unavailable: {0}")]
    RewriteFailure(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::MissingUrl | ProxyError::InvalidUrl(_) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response()
            }
            ProxyError::UpstreamFailure(status) => (
                status,
                Json(json!({ "error": format!("upstream responded with {}", status.as_u16()) })),
            )
                .into_response(),
            ProxyError::TransportFailure(ref e) => {
                error!("Upstream transport failure: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
            ProxyError::RewriteFailure(ref msg)
            | ProxyError::ConfigError(ref msg)
            | ProxyError::Internal(ref msg) => {
                error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}
