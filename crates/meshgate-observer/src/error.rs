//! Error types for the Observer API server.
//!
//! [`ObserverError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use meshgate_core::CommandError;

/// Errors that can occur in the Observer API layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The broker session is not available right now.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The broker refused a command.
    #[error("bad gateway: {0}")]
    BadGateway(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ObserverError {
    /// HTTP status this error maps to.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CommandError> for ObserverError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotConnected => Self::ServiceUnavailable(err.to_string()),
            CommandError::InvalidNodeId(_) => Self::BadRequest(err.to_string()),
            CommandError::Publish(e) => Self::BadGateway(e.to_string()),
            CommandError::Encode(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::NotFound(msg)
            | Self::BadRequest(msg)
            | Self::ServiceUnavailable(msg)
            | Self::BadGateway(msg)
            | Self::Internal(msg) => msg.clone(),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
