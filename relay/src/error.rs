//! Relay error type and its HTTP mapping.

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::debug;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("No session cookie on inbound request")]
    MissingSession,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Timed out waiting for the home system")]
    Timeout,

    #[error("Answer slot closed before a response arrived")]
    AnswerDropped,

    #[error("Home system sent an unusable answer: {0}")]
    BadAnswer(homeproxy_shared::Error),

    #[error("Malformed poll payload: {0}")]
    MalformedPoll(homeproxy_shared::Error),

    #[error("Request body too large")]
    BodyTooLarge,

    #[error("Permit requested {requested} units but holds only {capacity}")]
    PermitOverflow { requested: u32, capacity: u32 },

    #[error("Permit closed")]
    PermitClosed,

    #[error("Response build error: {0}")]
    Http(#[from] axum::http::Error),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingSession => StatusCode::UNAUTHORIZED,
            RelayError::UnknownSession(_) => StatusCode::NOT_FOUND,
            RelayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::AnswerDropped | RelayError::BadAnswer(_) => StatusCode::BAD_GATEWAY,
            RelayError::MalformedPoll(_) => StatusCode::BAD_REQUEST,
            RelayError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::PermitOverflow { .. } | RelayError::PermitClosed | RelayError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Failures reach the caller as a bare status with an empty body
impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!("{} -> {}", self, status);
        (status, Body::empty()).into_response()
    }
}
