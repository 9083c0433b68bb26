use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Error taxonomy from spec §7, mapped to HTTP status codes the way the
/// teacher's `LlmError` maps provider failures.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("upstream returned {status}: {body_snippet}")]
    UpstreamHttp { status: u16, body_snippet: String },

    #[error("upstream read failed: {0}")]
    UpstreamRead(String),

    #[error("upstream timed out")]
    Timeout,
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            Self::UpstreamHttp { .. } | Self::UpstreamRead(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::InvalidRequest(_) => "invalid_request_error",
            Self::AuthenticationFailed => "authentication_error",
            Self::UpstreamHttp { .. } | Self::UpstreamRead(_) => "api_error",
            Self::Timeout => "timeout_error",
        }
    }

    /// Message safe to expose to API consumers — never the raw upstream body
    /// (which could embo an API key) and never a bare socket error string.
    pub fn client_message(&self) -> String {
        match self {
            Self::UpstreamHttp { status, .. } => format!("upstream request failed with status {status}"),
            Self::UpstreamRead(_) => "upstream connection failed".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    r#type: String,
    message: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetails {
                r#type: self.error_type().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}
