//! Local upstream fetches
//!
//! Turns a tunneled request into a real HTTP call against the home
//! system's web server and packs the reply as an answer for the relay.

use anyhow::{Context, Result};
use homeproxy_shared::headers::{format_line, is_hop_by_hop, parse_line};
use homeproxy_shared::{TunnelRequest, TunnelResponse};
use reqwest::{redirect, Client, Method};
use std::time::Duration;
use tracing::debug;

/// One local web server
#[derive(Clone)]
pub struct Upstream {
    client: Client,
    base: String,
}

impl Upstream {
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        // Redirects go back to the original caller rather than being followed here.
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()
            .context("Failed to build upstream HTTP client")?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, target: &str) -> String {
        format!("{}/{}", self.base, target.trim_start_matches('/'))
    }

    /// Fetch `request` from the upstream and build the answer for `system`
    pub async fn fetch(&self, system: &str, request: &TunnelRequest) -> Result<TunnelResponse> {
        let method = Method::from_bytes(request.method().as_bytes())
            .with_context(|| format!("Invalid method {:?}", request.method()))?;
        let url = self.url_for(&request.target);
        debug!("Fetching {} {}", method, url);

        let mut builder = self.client.request(method, &url);
        for line in &request.headers {
            let Ok((name, value)) = parse_line(line) else {
                continue;
            };
            if forwardable(name) {
                builder = builder.header(name, value);
            }
        }
        let body = request.decode_body().context("Request body is not valid base64")?;
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Upstream request to {} failed", url))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| format_line(name.as_str(), &String::from_utf8_lossy(value.as_bytes())))
            .collect();
        let body = response.bytes().await.context("Failed to read upstream body")?;

        Ok(TunnelResponse::from_parts(system, status, headers, &body))
    }
}

// Host and Content-Length are recomputed by reqwest for the upstream call.
fn forwardable(name: &str) -> bool {
    !is_hop_by_hop(name)
        && !name.eq_ignore_ascii_case("host")
        && !name.eq_ignore_ascii_case("content-length")
}
