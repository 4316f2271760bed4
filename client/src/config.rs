//! Configuration file parser for HomeProxy
//!
//! Supports homeproxy.yml declaring the relay and one or more home
//! systems, each backed by a local web server.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeConfig {
    /// Relay base URL
    #[serde(default = "default_relay")]
    pub relay: String,

    /// Seconds to wait before reconnecting after a relay error
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// HTTP timeout for a single poll call; must exceed the relay's poll deadline
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Home systems to serve
    #[serde(default)]
    pub systems: Vec<SystemConfig>,
}

/// Single home system definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Session id declared to the relay
    pub name: String,

    /// Base URL of the local web server
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Timeout for one upstream fetch, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_relay() -> String {
    "http://localhost:8080".to_string()
}

fn default_upstream() -> String {
    "http://127.0.0.1:80".to_string()
}

fn default_retry_delay() -> u64 {
    5
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    10
}

impl SystemConfig {
    pub fn new(name: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            upstream: upstream.into(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl HomeConfig {
    /// Configuration for a single system given on the command line
    pub fn single(relay: &str, system: SystemConfig) -> Self {
        Self {
            relay: relay.to_string(),
            retry_delay_secs: default_retry_delay(),
            poll_timeout_secs: default_poll_timeout(),
            systems: vec![system],
        }
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: HomeConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.relay) {
            anyhow::bail!("Relay '{}' must be an http:// or https:// URL", self.relay);
        }
        if self.systems.is_empty() {
            anyhow::bail!("No systems defined in configuration");
        }

        let mut seen = HashSet::new();
        for system in &self.systems {
            if system.name.is_empty() {
                anyhow::bail!("System name cannot be empty");
            }
            if !seen.insert(system.name.as_str()) {
                anyhow::bail!("System '{}' is defined twice", system.name);
            }
            if !is_http_url(&system.upstream) {
                anyhow::bail!(
                    "Upstream '{}' for system '{}' must be an http:// or https:// URL",
                    system.upstream,
                    system.name
                );
            }
        }

        Ok(())
    }

    /// Search for config file in standard locations
    pub fn find_config() -> Option<std::path::PathBuf> {
        let candidates = [
            "homeproxy.yml",
            "homeproxy.yaml",
            ".homeproxy.yml",
            ".homeproxy.yaml",
        ];

        for name in &candidates {
            let path = std::path::PathBuf::from(name);
            if path.exists() {
                return Some(path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            for name in &candidates {
                let path = home.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        None
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}
