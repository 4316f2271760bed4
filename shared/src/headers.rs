//! Raw `name: value` header lines.
//!
//! Headers cross the tunnel as an ordered list of lines so duplicates and
//! ordering survive the JSON round trip.

use crate::{Error, Result};

/// Render a header pair as a wire line
pub fn format_line(name: &str, value: &str) -> String {
    format!("{}: {}", name, value)
}

/// Split a wire line into trimmed name and value.
///
/// The split happens at the first `:` so values may contain colons
/// (`Host: example.com:8080`).
pub fn parse_line(line: &str) -> Result<(&str, &str)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Error::HeaderLine(line.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::HeaderLine(line.to_string()));
    }
    Ok((name, value.trim()))
}

/// True if the line names `Content-Length` (any case)
pub fn is_content_length(line: &str) -> bool {
    matches!(parse_line(line), Ok((name, _)) if name.eq_ignore_ascii_case("content-length"))
}

/// Headers that describe a single hop and must not be replayed across the tunnel
pub fn is_hop_by_hop(name: &str) -> bool {
    const HOP_BY_HOP: [&str; 8] = [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ];
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}
