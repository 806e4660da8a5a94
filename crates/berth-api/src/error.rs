//! Error types for the HTTP API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

/// Result type for API handlers
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for API handlers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing, malformed or unknown credentials
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Request body could not be understood
    #[error("bad request: {0}")]
    InvalidBody(String),

    /// An engine operation failed
    #[error(transparent)]
    Engine(#[from] berth_common::Error),
}

impl Error {
    /// Status code and stable error class
    fn classify(&self) -> (StatusCode, &'static str) {
        use berth_common::Error as E;
        match self {
            Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            Error::InvalidBody(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            Error::Engine(e) => {
                let status = match e {
                    E::BadRequest { .. } => StatusCode::BAD_REQUEST,
                    E::NotFound { .. } => StatusCode::NOT_FOUND,
                    E::Conflict { .. } => StatusCode::CONFLICT,
                    E::ResourceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    E::UpstreamUnavailable {
                        timed_out: true, ..
                    } => StatusCode::GATEWAY_TIMEOUT,
                    E::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind())
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        if status.is_server_error() {
            warn!(kind, error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "kind": kind,
            "message": self.to_string(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}
