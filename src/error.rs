use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("submission failed: {message}")]
    Submission {
        status: Option<u16>,
        message: String,
    },

    #[error("upstream returned HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Returns true for failures of a single status check. The poller absorbs
    /// these and keeps going; they never end a session on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamStatus { .. } | Self::Request(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamStatus { .. } | Self::Request(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) | Self::Submission { .. } | Self::Store(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Produce a sanitized error message safe for returning to HTTP callers.
    /// Does not leak the upstream URL, the API key, or raw upstream bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(_) => "AI service is not configured".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::Submission { status, .. } => match status {
                Some(s) => format!("failed to send prompt to AI service (HTTP {s})"),
                None => "failed to send prompt to AI service".to_string(),
            },
            Self::UpstreamStatus { status, .. } => {
                format!("AI service status check failed (HTTP {status})")
            }
            Self::Request(_) => "request to AI service failed".to_string(),
            Self::NotFound(what) => format!("{what} not found"),
            Self::Store(_) => "failed to save result".to_string(),
            Self::Other(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "request failed: {self}");
        } else {
            tracing::debug!(status = status.as_u16(), "request rejected: {self}");
        }
        let body = serde_json::json!({
            "success": false,
            "error": self.user_message(),
        });
        (status, Json(body)).into_response()
    }
}
