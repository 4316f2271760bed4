//! JSON wire types exchanged on `POST /poll`.

use serde::{Deserialize, Serialize};

use crate::{codec, headers, Result};

/// A relayed HTTP request waiting for a home system to fetch it.
///
/// Serialized as the `/poll` response body. An empty `url` is the
/// "no work yet" sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRequest {
    /// Path and query relative to the home system's root, without the leading `/`
    #[serde(rename = "url")]
    pub target: String,
    /// Raw `name: value` lines in arrival order
    #[serde(default)]
    pub headers: Vec<String>,
    /// Inbound method, `GET` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Base64-encoded inbound body, absent when the request had none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Relay-assigned id the answer must echo; absent on the sentinel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl TunnelRequest {
    pub fn new(method: impl Into<String>, target: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            target: target.into(),
            headers,
            method: Some(method.into()),
            body: None,
            id: None,
        }
    }

    /// Attach an inbound body; empty bodies stay off the wire
    pub fn with_body(mut self, bytes: &[u8]) -> Self {
        self.body = (!bytes.is_empty()).then(|| codec::encode_body(bytes));
        self
    }

    /// The "no work yet" sentinel
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or("GET")
    }

    pub fn decode_body(&self) -> Result<Vec<u8>> {
        match &self.body {
            Some(encoded) => codec::decode_body(encoded),
            None => Ok(Vec::new()),
        }
    }
}

/// A home system's answer to the request it was previously handed.
///
/// Serialized as the `/poll` request body. Every field is optional on the
/// wire; a first poll sends `{}` or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelResponse {
    /// Identity the poller declares
    pub system: String,
    /// Raw `name: value` lines to replay onto the inbound response
    pub headers: Vec<String>,
    /// Base64-encoded body
    pub body: String,
    /// Upstream status, 200 when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Id of the request this answers, copied from [`TunnelRequest::id`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl TunnelResponse {
    /// Build an answer from raw upstream parts
    pub fn from_parts(system: impl Into<String>, status: u16, headers: Vec<String>, body: &[u8]) -> Self {
        Self {
            system: system.into(),
            headers,
            body: codec::encode_body(body),
            status: Some(status),
            id: None,
        }
    }

    /// Mark this as the answer to `request`
    pub fn answering(mut self, request: &TunnelRequest) -> Self {
        self.id = request.id;
        self
    }

    /// True when this poll carries an answer to deliver.
    ///
    /// A non-empty body is an answer; so is an explicit status, which lets
    /// empty upstream responses (204, redirects) through.
    pub fn has_answer(&self) -> bool {
        !self.body.is_empty() || self.status.is_some()
    }

    pub fn decode_body(&self) -> Result<Vec<u8>> {
        codec::decode_body(&self.body)
    }

    /// Header lines to replay, with any `Content-Length` removed
    pub fn replay_headers(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .map(String::as_str)
            .filter(|line| !headers::is_content_length(line))
    }

    /// Parse a poll body; an empty body is the zero value
    pub fn from_poll_body(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
