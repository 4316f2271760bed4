//! Relay configuration
//!
//! Every flag can also come from a `HOMEPROXY_*` environment variable.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use homeproxy_shared::MAX_BODY_SIZE;

use crate::session::Timeouts;

/// Room for the JSON envelope of a poll on top of the encoded body
const POLL_ENVELOPE_SLACK: usize = 64 * 1024;

#[derive(Debug, Clone, Parser)]
#[command(name = "homeproxy-relay")]
#[command(version)]
#[command(about = "Public relay that tunnels HTTP requests to polling home systems", long_about = None)]
pub struct RelayConfig {
    /// Address to listen on
    #[arg(long, env = "HOMEPROXY_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Session id handed out by /login and used by pollers that declare none
    #[arg(long, env = "HOMEPROXY_DEFAULT_SYSTEM", default_value = "home")]
    pub default_system: String,

    /// Lifetime of the login cookie, in seconds
    #[arg(long, env = "HOMEPROXY_COOKIE_MAX_AGE", default_value_t = 20)]
    pub cookie_max_age_secs: u64,

    /// How long an inbound request waits for its answer, in milliseconds
    #[arg(long, env = "HOMEPROXY_SUBMIT_TIMEOUT_MS", default_value_t = 2000)]
    pub submit_timeout_ms: u64,

    /// How long a poll waits for work, in seconds
    #[arg(long, env = "HOMEPROXY_POLL_TIMEOUT", default_value_t = 10)]
    pub poll_timeout_secs: u64,

    /// Largest request body accepted on any route, in bytes
    #[arg(long, env = "HOMEPROXY_MAX_BODY", default_value_t = MAX_BODY_SIZE)]
    pub max_body_size: usize,

    /// Evict sessions idle this long, in seconds (0 keeps them forever)
    #[arg(long, env = "HOMEPROXY_SESSION_IDLE", default_value_t = 600)]
    pub session_idle_secs: u64,

    /// How often the idle reaper runs, in seconds
    #[arg(long, env = "HOMEPROXY_REAP_INTERVAL", default_value_t = 60)]
    pub reap_interval_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            default_system: "home".to_string(),
            cookie_max_age_secs: 20,
            submit_timeout_ms: 2000,
            poll_timeout_secs: 10,
            max_body_size: MAX_BODY_SIZE,
            session_idle_secs: 600,
            reap_interval_secs: 60,
            verbose: false,
        }
    }
}

impl RelayConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            submit: Duration::from_millis(self.submit_timeout_ms),
            poll: Duration::from_secs(self.poll_timeout_secs),
        }
    }

    /// Idle limit for the reaper, `None` when eviction is off
    pub fn session_idle(&self) -> Option<Duration> {
        (self.session_idle_secs > 0).then(|| Duration::from_secs(self.session_idle_secs))
    }

    /// Largest `/poll` payload accepted.
    ///
    /// An answer body of `max_body_size` bytes grows by a third once base64
    /// encoded, and the JSON around it (headers, system, status) needs room too.
    pub fn poll_body_limit(&self) -> usize {
        self.max_body_size.saturating_add(2) / 3 * 4 + POLL_ENVELOPE_SLACK
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_system.is_empty() {
            anyhow::bail!("Default system id cannot be empty");
        }
        // It is written verbatim into a Set-Cookie header.
        if !self
            .default_system
            .bytes()
            .all(|b| b.is_ascii_graphic() && !matches!(b, b';' | b',' | b'"' | b'\\'))
        {
            anyhow::bail!("Default system id '{}' is not a valid cookie value", self.default_system);
        }
        if self.submit_timeout_ms == 0 || self.poll_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli() {
        let parsed = RelayConfig::try_parse_from(["homeproxy-relay"]).unwrap();
        let defaults = RelayConfig::default();
        assert_eq!(parsed.default_system, defaults.default_system);
        assert_eq!(parsed.timeouts(), Timeouts::default());
        assert_eq!(parsed.session_idle(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_flags() {
        let config = RelayConfig::try_parse_from([
            "homeproxy-relay",
            "--listen",
            "127.0.0.1:9000",
            "--submit-timeout-ms",
            "500",
            "--session-idle-secs",
            "0",
        ])
        .unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.timeouts().submit, Duration::from_millis(500));
        assert_eq!(config.session_idle(), None);
    }

    #[test]
    fn test_poll_limit_fits_encoded_body() {
        let config = RelayConfig { max_body_size: 1000, ..Default::default() };
        let encoded = homeproxy_shared::codec::encode_body(&[0u8; 1000]);
        assert!(config.poll_body_limit() >= encoded.len() + POLL_ENVELOPE_SLACK);
    }

    #[test]
    fn test_validate() {
        assert!(RelayConfig::default().validate().is_ok());

        let bad = RelayConfig { default_system: "a;b".into(), ..Default::default() };
        assert!(bad.validate().is_err());

        let bad = RelayConfig { default_system: String::new(), ..Default::default() };
        assert!(bad.validate().is_err());

        let bad = RelayConfig { poll_timeout_secs: 0, ..Default::default() };
        assert!(bad.validate().is_err());
    }
}
