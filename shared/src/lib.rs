//! HomeProxy Shared Library
//!
//! Wire types, body codec and header-line helpers used by both the relay
//! and the home-side poller.

pub mod codec;
pub mod error;
pub mod headers;
pub mod protocol;

pub use error::{Error, Result};
pub use protocol::{TunnelRequest, TunnelResponse};

/// Cookie carrying the session id on inbound requests
pub const SESSION_COOKIE: &str = "HomeProxySystem";

/// Maximum buffered body size (10 MB)
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
