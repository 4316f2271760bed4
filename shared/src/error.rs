//! Error types for HomeProxy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Body is not valid base64: {0}")]
    BodyEncoding(#[from] base64::DecodeError),

    #[error("Malformed header line: {0:?}")]
    HeaderLine(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}
