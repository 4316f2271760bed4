//! HomeProxy Relay
//!
//! Public side of the tunnel: inbound HTTP requests are parked on a
//! per-session channel until the home system polls for them and posts
//! the answer back.

pub mod config;
pub mod error;
pub mod headers;
pub mod metrics;
pub mod permit;
pub mod registry;
pub mod service;
pub mod session;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use registry::SessionRegistry;
pub use service::{router, AppState};
pub use session::{SessionChannel, Timeouts};
