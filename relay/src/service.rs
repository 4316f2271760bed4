//! HTTP surface of the relay
//!
//! | Route                                  | Purpose                                  |
//! |----------------------------------------|------------------------------------------|
//! | `/home`, `/web/*`, `/media/*` (any)    | inbound request tunneled to a session    |
//! | `POST /poll`                           | home system delivers an answer, waits for work |
//! | `GET /login`                           | issues the session cookie                |
//! | `GET /health`, `GET /metrics`          | liveness and Prometheus text             |

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Request, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use homeproxy_shared::{TunnelRequest, TunnelResponse, SESSION_COOKIE};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::headers;
use crate::metrics::Metrics;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub metrics: Metrics,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        let metrics = Metrics::new();
        Self {
            registry: SessionRegistry::new(config.timeouts(), metrics.clone()),
            metrics,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_body_size;
    let poll_limit = state.config.poll_body_limit();
    Router::new()
        .route("/home", any(inbound_handler))
        .route("/web/*rest", any(inbound_handler))
        .route("/media/*rest", any(inbound_handler))
        .route("/poll", post(poll_handler).layer(DefaultBodyLimit::max(poll_limit)))
        .route("/login", get(login_handler))
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn inbound_handler(State(state): State<AppState>, req: Request) -> Response {
    let start = Instant::now();
    let session = headers::session_cookie(req.headers());

    let response = match relay_inbound(&state, session.as_deref(), req).await {
        Ok(response) => response,
        Err(e) => {
            if let RelayError::UnknownSession(id) = &e {
                warn!("No session: {}", id);
            }
            e.into_response()
        }
    };

    state
        .metrics
        .record_inbound(
            session.as_deref(),
            response.status().as_u16(),
            start.elapsed().as_micros() as u64,
        )
        .await;
    response
}

async fn relay_inbound(state: &AppState, session: Option<&str>, req: Request) -> Result<Response> {
    let session = session.ok_or(RelayError::MissingSession)?;
    let channel = state
        .registry
        .find(session)
        .ok_or_else(|| RelayError::UnknownSession(session.to_string()))?;

    let (parts, body) = req.into_parts();
    let uri = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let target = uri.strip_prefix('/').unwrap_or(uri);
    let body = axum::body::to_bytes(body, state.config.max_body_size)
        .await
        .map_err(|_| RelayError::BodyTooLarge)?;

    let request = TunnelRequest::new(parts.method.as_str(), target, headers::capture(&parts.headers))
        .with_body(&body);
    debug!("[{}] inbound {} /{}", session, request.method(), request.target);

    let answer = channel.submit(request).await?;

    let body = answer.decode_body().map_err(RelayError::BadAnswer)?;
    let status = answer
        .status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);
    let mut response = hyper::Response::builder()
        .status(status)
        .body(Body::from(body))?;
    headers::replay(&answer, response.headers_mut());
    Ok(response)
}

async fn poll_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<TunnelRequest>> {
    let answer = TunnelResponse::from_poll_body(&body).map_err(|e| {
        warn!("Malformed poll payload: {}", e);
        RelayError::MalformedPoll(e)
    })?;

    let system = if answer.system.is_empty() {
        state.config.default_system.as_str()
    } else {
        answer.system.as_str()
    };
    let channel = state.registry.find_or_create(system).await;
    debug!("[{}] poll (answer: {})", channel.id(), answer.has_answer());

    let request = channel.poll(Some(answer)).await;
    state.metrics.record_poll(request.is_some());
    Ok(Json(request.unwrap_or_else(TunnelRequest::empty)))
}

async fn login_handler(State(state): State<AppState>) -> impl IntoResponse {
    let config = &state.config;
    info!("Login: issuing cookie for {}", config.default_system);
    let cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly",
        SESSION_COOKIE, config.default_system, config.cookie_max_age_secs
    );
    ([(SET_COOKIE, cookie)], "OK")
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.to_prometheus().await
}
