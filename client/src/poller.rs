//! Long-poll loop for one home system

use anyhow::{Context, Result};
use homeproxy_shared::{TunnelRequest, TunnelResponse};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SystemConfig;
use crate::forward::Upstream;

pub struct HomePoller {
    name: String,
    poll_url: String,
    relay: Client,
    upstream: Upstream,
}

impl HomePoller {
    pub fn new(relay_url: &str, system: &SystemConfig, poll_timeout: Duration) -> Result<Self> {
        let relay = Client::builder()
            .timeout(poll_timeout)
            .build()
            .context("Failed to build relay HTTP client")?;
        let upstream = Upstream::new(
            &system.upstream,
            Duration::from_secs(system.request_timeout_secs),
        )?;
        Ok(Self {
            name: system.name.clone(),
            poll_url: format!("{}/poll", relay_url.trim_end_matches('/')),
            relay,
            upstream,
        })
    }

    /// One round trip: deliver `answer`, return the next request if any
    pub async fn poll_once(&self, answer: &TunnelResponse) -> Result<Option<TunnelRequest>> {
        let response = self
            .relay
            .post(&self.poll_url)
            .json(answer)
            .send()
            .await
            .with_context(|| format!("Poll to {} failed", self.poll_url))?;

        if !response.status().is_success() {
            anyhow::bail!("Relay rejected poll: {}", response.status());
        }

        let request: TunnelRequest = response.json().await.context("Malformed poll response")?;
        Ok((!request.is_empty()).then_some(request))
    }

    /// Poll forever, answering each request from the upstream.
    ///
    /// Returns only on a relay error; the caller decides whether to retry.
    pub async fn run(&self) -> Result<()> {
        let mut answer = self.idle();
        loop {
            answer = match self.poll_once(&answer).await? {
                None => {
                    debug!("[{}] no work", self.name);
                    self.idle()
                }
                Some(request) => self.answer(&request).await,
            };
        }
    }

    /// Fetch `request` from the upstream; failures become a 502 answer.
    ///
    /// The answer carries the request's id so the relay can pair it.
    pub async fn answer(&self, request: &TunnelRequest) -> TunnelResponse {
        let answer = match self.upstream.fetch(&self.name, request).await {
            Ok(answer) => {
                info!(
                    "[{}] {} /{} -> {}",
                    self.name,
                    request.method(),
                    request.target,
                    answer.status.unwrap_or(200)
                );
                answer
            }
            Err(e) => {
                warn!("[{}] {} /{} failed: {:#}", self.name, request.method(), request.target, e);
                TunnelResponse::from_parts(self.name.as_str(), 502, Vec::new(), b"")
            }
        };
        answer.answering(request)
    }

    /// Payload for a poll that carries no answer
    fn idle(&self) -> TunnelResponse {
        TunnelResponse {
            system: self.name.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use homeproxy_relay::{router, AppState, RelayConfig};
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn upstream() -> SocketAddr {
        let app = Router::new()
            .route("/home", get(|| async { ([("x-upstream", "yes")], "welcome home") }))
            .route(
                "/web/*rest",
                get(|axum::extract::Path(rest): axum::extract::Path<String>| async move {
                    format!("page {}", rest)
                }),
            );
        serve(app).await
    }

    async fn relay() -> (SocketAddr, AppState) {
        let config = RelayConfig {
            poll_timeout_secs: 1,
            ..Default::default()
        };
        let state = AppState::new(config);
        (serve(router(state.clone())).await, state)
    }

    #[tokio::test]
    async fn test_answer_reports_upstream_failure_as_bad_gateway() {
        // Nothing listens on port 9 locally.
        let system = SystemConfig::new("home", "http://127.0.0.1:9");
        let poller = HomePoller::new("http://127.0.0.1:1", &system, Duration::from_secs(5)).unwrap();
        let request = TunnelRequest {
            id: Some(4),
            ..TunnelRequest::new("GET", "home", vec![])
        };
        let answer = poller.answer(&request).await;
        assert_eq!(answer.status, Some(502));
        assert!(answer.has_answer());
        assert_eq!(answer.id, Some(4));
    }

    #[tokio::test]
    async fn test_poll_once_returns_none_on_sentinel() {
        let (relay_addr, _state) = relay().await;
        let system = SystemConfig::new("idle", "http://127.0.0.1:9");
        let poller =
            HomePoller::new(&format!("http://{}", relay_addr), &system, Duration::from_secs(5)).unwrap();
        assert!(poller.poll_once(&poller.idle()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_through_relay() {
        let upstream_addr = upstream().await;
        let (relay_addr, state) = relay().await;
        state.registry.find_or_create("home").await;

        let system = SystemConfig::new("home", format!("http://{}", upstream_addr));
        let poller =
            HomePoller::new(&format!("http://{}", relay_addr), &system, Duration::from_secs(5)).unwrap();
        let task = tokio::spawn(async move { poller.run().await });

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/home", relay_addr))
            .header("Cookie", "HomeProxySystem=home")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.headers()["x-upstream"], "yes");
        assert_eq!(response.text().await.unwrap(), "welcome home");

        let response = client
            .get(format!("http://{}/web/a/b", relay_addr))
            .header("Cookie", "HomeProxySystem=home")
            .send()
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "page a/b");

        task.abort();
    }
}
