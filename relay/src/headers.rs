//! Header capture and replay across the tunnel
//!
//! Inbound request headers become raw `name: value` lines; answer lines
//! are replayed onto the outbound response, minus `Content-Length`, which
//! hyper recomputes from the decoded body.

use homeproxy_shared::headers::{format_line, parse_line};
use homeproxy_shared::{TunnelResponse, SESSION_COOKIE};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use tracing::debug;

/// Capture request headers as wire lines, duplicates kept in order.
///
/// Names come out lowercase: hyper normalizes them while parsing, so the
/// client's original casing is not available here.
pub fn capture(headers: &HeaderMap) -> Vec<String> {
    headers
        .iter()
        .map(|(name, value)| format_line(name.as_str(), &String::from_utf8_lossy(value.as_bytes())))
        .collect()
}

/// Replay an answer's header lines onto `headers`
pub fn replay(answer: &TunnelResponse, headers: &mut HeaderMap) {
    for line in answer.replay_headers() {
        let parsed = parse_line(line).ok().and_then(|(name, value)| {
            Some((
                HeaderName::from_bytes(name.as_bytes()).ok()?,
                HeaderValue::from_str(value).ok()?,
            ))
        });
        match parsed {
            Some((name, value)) => {
                headers.append(name, value);
            }
            None => debug!("Skipping unusable header line {:?}", line),
        }
    }
}

/// Session id from the `HomeProxySystem` cookie, if present and non-empty
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
