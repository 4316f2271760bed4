//! Metrics Collection for the HomeProxy Relay
//!
//! Atomic counters, a delivery-latency ring buffer, and a
//! Prometheus-compatible /metrics rendering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Relay-wide metrics
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    /// Inbound requests answered (any status)
    inbound_requests: AtomicU64,
    /// Sessions currently in the registry
    active_sessions: AtomicU64,
    /// Answers handed back to a waiting inbound request
    delivered: AtomicU64,
    /// Inbound requests that hit the deadline
    timed_out: AtomicU64,
    /// Answers that arrived after their request gave up
    late_answers: AtomicU64,
    /// Poll calls that handed out a request, and those that returned the sentinel
    served_polls: AtomicU64,
    empty_polls: AtomicU64,
    /// Status class counts for inbound responses
    status_2xx: AtomicU64,
    status_3xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    /// Inbound round-trip latency
    latencies: Mutex<LatencyHistogram>,
    /// Per-session counters
    session_metrics: Mutex<HashMap<String, SessionMetrics>>,
}

/// Latency histogram for percentile calculation
struct LatencyHistogram {
    /// Recent latencies (ring buffer, microseconds)
    values: Vec<u64>,
    pos: usize,
    count: u64,
    sum: u64,
}

impl LatencyHistogram {
    fn new(capacity: usize) -> Self {
        Self {
            values: vec![0; capacity],
            pos: 0,
            count: 0,
            sum: 0,
        }
    }

    fn record(&mut self, latency_us: u64) {
        self.values[self.pos] = latency_us;
        self.pos = (self.pos + 1) % self.values.len();
        self.count += 1;
        self.sum = self.sum.saturating_add(latency_us);
    }

    fn percentile(&self, p: f64) -> u64 {
        let count = self.count.min(self.values.len() as u64) as usize;
        if count == 0 {
            return 0;
        }

        let mut sorted = self.values[..count].to_vec();
        sorted.sort_unstable();

        let idx = ((count as f64 * p / 100.0) as usize).min(count - 1);
        sorted[idx]
    }

    fn average(&self) -> u64 {
        if self.count == 0 { 0 } else { self.sum / self.count }
    }
}

/// Per-session counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    pub requests: u64,
    pub errors: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                inbound_requests: AtomicU64::new(0),
                active_sessions: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
                late_answers: AtomicU64::new(0),
                served_polls: AtomicU64::new(0),
                empty_polls: AtomicU64::new(0),
                status_2xx: AtomicU64::new(0),
                status_3xx: AtomicU64::new(0),
                status_4xx: AtomicU64::new(0),
                status_5xx: AtomicU64::new(0),
                latencies: Mutex::new(LatencyHistogram::new(10000)),
                session_metrics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Record a finished inbound request
    pub async fn record_inbound(&self, session: Option<&str>, status: u16, latency_us: u64) {
        self.inner.inbound_requests.fetch_add(1, Ordering::Relaxed);

        match status / 100 {
            2 => { self.inner.status_2xx.fetch_add(1, Ordering::Relaxed); }
            3 => { self.inner.status_3xx.fetch_add(1, Ordering::Relaxed); }
            4 => { self.inner.status_4xx.fetch_add(1, Ordering::Relaxed); }
            5 => { self.inner.status_5xx.fetch_add(1, Ordering::Relaxed); }
            _ => {}
        }

        self.inner.latencies.lock().await.record(latency_us);

        // Only sessions the registry knows get an entry, so the map stays bounded.
        if let Some(session) = session {
            let mut sessions = self.inner.session_metrics.lock().await;
            if let Some(entry) = sessions.get_mut(session) {
                entry.requests += 1;
                if status >= 400 {
                    entry.errors += 1;
                }
            }
        }
    }

    pub fn record_delivered(&self) {
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.inner.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_answer(&self) {
        self.inner.late_answers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll(&self, served: bool) {
        if served {
            self.inner.served_polls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.empty_polls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn session_opened(&self, session: &str) {
        self.inner.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.inner
            .session_metrics
            .lock()
            .await
            .insert(session.to_string(), SessionMetrics::default());
    }

    pub async fn session_closed(&self, session: &str) {
        self.inner.active_sessions.fetch_sub(1, Ordering::Relaxed);
        self.inner.session_metrics.lock().await.remove(session);
    }

    #[cfg(test)]
    async fn session(&self, session: &str) -> Option<SessionMetrics> {
        self.inner.session_metrics.lock().await.get(session).cloned()
    }

    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.inner.timed_out.load(Ordering::Relaxed)
    }

    pub fn late_answers(&self) -> u64 {
        self.inner.late_answers.load(Ordering::Relaxed)
    }

    /// Generate Prometheus-format metrics text
    pub async fn to_prometheus(&self) -> String {
        let lat = self.inner.latencies.lock().await;
        let p50 = lat.percentile(50.0);
        let p95 = lat.percentile(95.0);
        let p99 = lat.percentile(99.0);
        let avg = lat.average();
        drop(lat);

        let mut sessions: Vec<(String, SessionMetrics)> = self
            .inner
            .session_metrics
            .lock()
            .await
            .iter()
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));

        let mut per_session = String::from(
            "# HELP homeproxy_session_requests_total Inbound requests per session\n\
             # TYPE homeproxy_session_requests_total counter\n",
        );
        for (id, m) in &sessions {
            per_session.push_str(&format!(
                "homeproxy_session_requests_total{{session=\"{}\"}} {}\n",
                escape_label(id),
                m.requests
            ));
        }
        per_session.push_str(
            "\n# HELP homeproxy_session_errors_total Inbound requests per session answered with 4xx or 5xx\n\
             # TYPE homeproxy_session_errors_total counter\n",
        );
        for (id, m) in &sessions {
            per_session.push_str(&format!(
                "homeproxy_session_errors_total{{session=\"{}\"}} {}\n",
                escape_label(id),
                m.errors
            ));
        }

        format!(
r#"# HELP homeproxy_inbound_requests_total Inbound requests answered
# TYPE homeproxy_inbound_requests_total counter
homeproxy_inbound_requests_total {}

# HELP homeproxy_active_sessions Sessions held by the registry
# TYPE homeproxy_active_sessions gauge
homeproxy_active_sessions {}

# HELP homeproxy_handoffs_total Outcomes of tunneled requests
# TYPE homeproxy_handoffs_total counter
homeproxy_handoffs_total{{outcome="delivered"}} {}
homeproxy_handoffs_total{{outcome="timeout"}} {}
homeproxy_handoffs_total{{outcome="late_answer"}} {}

# HELP homeproxy_polls_total Poll calls served
# TYPE homeproxy_polls_total counter
homeproxy_polls_total{{result="request"}} {}
homeproxy_polls_total{{result="empty"}} {}

# HELP homeproxy_inbound_by_status Inbound responses by HTTP status class
# TYPE homeproxy_inbound_by_status counter
homeproxy_inbound_by_status{{status="2xx"}} {}
homeproxy_inbound_by_status{{status="3xx"}} {}
homeproxy_inbound_by_status{{status="4xx"}} {}
homeproxy_inbound_by_status{{status="5xx"}} {}

# HELP homeproxy_latency_us Inbound round-trip latency in microseconds
# TYPE homeproxy_latency_us summary
homeproxy_latency_us{{quantile="0.5"}} {}
homeproxy_latency_us{{quantile="0.95"}} {}
homeproxy_latency_us{{quantile="0.99"}} {}
homeproxy_latency_us_avg {}

{}"#,
            self.inner.inbound_requests.load(Ordering::Relaxed),
            self.inner.active_sessions.load(Ordering::Relaxed),
            self.inner.delivered.load(Ordering::Relaxed),
            self.inner.timed_out.load(Ordering::Relaxed),
            self.inner.late_answers.load(Ordering::Relaxed),
            self.inner.served_polls.load(Ordering::Relaxed),
            self.inner.empty_polls.load(Ordering::Relaxed),
            self.inner.status_2xx.load(Ordering::Relaxed),
            self.inner.status_3xx.load(Ordering::Relaxed),
            self.inner.status_4xx.load(Ordering::Relaxed),
            self.inner.status_5xx.load(Ordering::Relaxed),
            p50, p95, p99, avg,
            per_session,
        )
    }
}

// Label values are quoted; backslash, quote and newline must be escaped.
fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
