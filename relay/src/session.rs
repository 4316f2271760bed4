//! Per-session rendezvous between inbound requests and home pollers
//!
//! Each home system gets one [`SessionChannel`]. An inbound handler
//! `submit`s a request and waits for the answer; the home system's poller
//! `poll`s, picks the request up, and hands the answer back on its next
//! poll. The channel's permit keeps exactly one request in flight.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use homeproxy_shared::{TunnelRequest, TunnelResponse};
use tokio::sync::{oneshot, Notify};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::metrics::Metrics;
use crate::permit::Permit;

/// Default deadline for an inbound request to be answered
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default long-poll deadline
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadlines for both sides of the rendezvous
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub submit: Duration,
    pub poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            submit: DEFAULT_SUBMIT_TIMEOUT,
            poll: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// A published request with the sender its answer goes to
struct Queued {
    ticket: u64,
    request: TunnelRequest,
    reply: oneshot::Sender<TunnelResponse>,
}

/// A request already handed to a poller, waiting for its answer
struct Awaiting {
    ticket: u64,
    reply: oneshot::Sender<TunnelResponse>,
}

#[derive(Default)]
struct Slots {
    queued: Option<Queued>,
    awaiting: Option<Awaiting>,
    next_ticket: u64,
}

pub struct SessionChannel {
    id: String,
    permit: Permit,
    slots: Mutex<Slots>,
    request_ready: Notify,
    timeouts: Timeouts,
    last_active: Mutex<Instant>,
    metrics: Metrics,
}

impl SessionChannel {
    pub fn new(id: impl Into<String>, timeouts: Timeouts, metrics: Metrics) -> Self {
        Self {
            id: id.into(),
            permit: Permit::binary(),
            slots: Mutex::new(Slots::default()),
            request_ready: Notify::new(),
            timeouts,
            last_active: Mutex::new(Instant::now()),
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn permit(&self) -> &Permit {
        &self.permit
    }

    /// Hand `request` to the next poller and wait for its answer.
    ///
    /// Waits for the permit first, so a second request for the same
    /// session queues behind the first. Returns [`RelayError::Timeout`]
    /// when no answer arrives within the submit deadline. The permit is
    /// released and the request withdrawn on every exit, including when
    /// the caller drops this future.
    pub async fn submit(&self, request: TunnelRequest) -> Result<TunnelResponse> {
        let _permit = self.permit.acquire(1).await?;
        self.touch();

        let (reply, answer) = oneshot::channel();
        let ticket = self.publish(request, reply);
        let _withdraw = Withdraw { channel: self, ticket };

        match timeout(self.timeouts.submit, answer).await {
            Ok(Ok(response)) => {
                self.touch();
                self.metrics.record_delivered();
                Ok(response)
            }
            Ok(Err(_)) => Err(RelayError::AnswerDropped),
            Err(_) => {
                debug!("[{}] request #{} timed out", self.id, ticket);
                self.metrics.record_timeout();
                Err(RelayError::Timeout)
            }
        }
    }

    /// Deliver the previous answer, if any, then wait for the next request.
    ///
    /// Returns `None` when the poll deadline passes with no work; the
    /// caller answers with the empty sentinel.
    pub async fn poll(&self, answer: Option<TunnelResponse>) -> Option<TunnelRequest> {
        self.touch();
        if let Some(answer) = answer.filter(TunnelResponse::has_answer) {
            self.deliver(answer);
        }

        let deadline = Instant::now() + self.timeouts.poll;
        loop {
            // Register interest before looking at the slot so a publish in
            // between still wakes us.
            let notified = self.request_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(request) = self.take_queued() {
                self.touch();
                return Some(request);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Hand an answer to the request awaiting one. Never blocks.
    ///
    /// An answer carrying an id only reaches the request with that id; one
    /// without an id goes to whichever request is awaiting. Returns false
    /// when the answer matched nobody (its request already timed out); the
    /// answer is dropped.
    pub fn deliver(&self, answer: TunnelResponse) -> bool {
        let awaiting = {
            let mut slots = self.slots();
            let stale = matches!(
                (&slots.awaiting, answer.id),
                (Some(awaiting), Some(id)) if awaiting.ticket != id
            );
            if stale { None } else { slots.awaiting.take() }
        };
        let delivered = match awaiting {
            Some(Awaiting { ticket, reply }) => {
                debug!("[{}] answer for request #{}", self.id, ticket);
                reply.send(answer).is_ok()
            }
            None => false,
        };
        if !delivered {
            warn!("[{}] late answer dropped, no request is waiting for it", self.id);
            self.metrics.record_late_answer();
        }
        delivered
    }

    /// Time since the last submit or poll touched this session
    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    #[cfg(test)]
    fn has_queued(&self) -> bool {
        self.slots().queued.is_some()
    }

    fn publish(&self, mut request: TunnelRequest, reply: oneshot::Sender<TunnelResponse>) -> u64 {
        let ticket = {
            let mut slots = self.slots();
            slots.next_ticket += 1;
            let ticket = slots.next_ticket;
            request.id = Some(ticket);
            debug!("[{}] request #{} published: {} {}", self.id, ticket, request.method(), request.target);
            slots.queued = Some(Queued { ticket, request, reply });
            ticket
        };
        self.request_ready.notify_one();
        ticket
    }

    fn take_queued(&self) -> Option<TunnelRequest> {
        let mut slots = self.slots();
        let Queued { ticket, request, reply } = slots.queued.take()?;
        slots.awaiting = Some(Awaiting { ticket, reply });
        debug!("[{}] request #{} handed to poller", self.id, ticket);
        Some(request)
    }

    /// Clear whatever `ticket` still occupies
    fn withdraw(&self, ticket: u64) {
        let mut slots = self.slots();
        if slots.queued.as_ref().is_some_and(|q| q.ticket == ticket) {
            debug!("[{}] request #{} withdrawn before pickup", self.id, ticket);
            slots.queued = None;
        }
        if slots.awaiting.as_ref().is_some_and(|a| a.ticket == ticket) {
            slots.awaiting = None;
        }
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    // Never held across an await.
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears a submit's slots when it finishes, times out or is dropped
struct Withdraw<'a> {
    channel: &'a SessionChannel,
    ticket: u64,
}

impl Drop for Withdraw<'_> {
    fn drop(&mut self) {
        self.channel.withdraw(self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn channel() -> Arc<SessionChannel> {
        Arc::new(SessionChannel::new("abc", Timeouts::default(), Metrics::new()))
    }

    fn answer(body: &[u8]) -> TunnelResponse {
        TunnelResponse::from_parts("abc", 200, vec!["X-Foo: bar".into()], body)
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_reaches_poller_and_answer_returns() {
        let ch = channel();
        let submitter = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.submit(TunnelRequest::new("GET", "foo?x=1", vec![])).await })
        };

        let request = ch.poll(None).await.expect("request");
        assert_eq!(request.target, "foo?x=1");

        // The answer rides on the next poll, which then waits for more work.
        let next = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.poll(Some(answer(b"hello"))).await })
        };

        let response = submitter.await.unwrap().unwrap();
        assert_eq!(response.decode_body().unwrap(), b"hello");
        assert_eq!(ch.permit().available(), 1);
        assert!(next.await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_times_out_and_frees_permit() {
        let ch = channel();
        let started = Instant::now();
        let result = ch.submit(TunnelRequest::new("GET", "home", vec![])).await;

        assert!(matches!(result, Err(RelayError::Timeout)));
        assert!(started.elapsed() >= DEFAULT_SUBMIT_TIMEOUT);
        assert!(started.elapsed() < DEFAULT_SUBMIT_TIMEOUT + Duration::from_millis(10));
        assert_eq!(ch.permit().available(), 1);
        // The unclaimed request was withdrawn, so a later poller sees nothing stale.
        assert!(!ch.has_queued());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_none_at_deadline() {
        let ch = channel();
        let started = Instant::now();
        assert!(ch.poll(None).await.is_none());
        assert!(started.elapsed() >= DEFAULT_POLL_TIMEOUT);
        assert!(started.elapsed() < DEFAULT_POLL_TIMEOUT + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_woken_by_later_submit() {
        let ch = channel();
        let poller = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.poll(None).await })
        };
        tokio::time::sleep(Duration::from_secs(3)).await;

        let submitter = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.submit(TunnelRequest::new("GET", "late", vec![])).await })
        };
        let request = poller.await.unwrap().expect("request before deadline");
        assert_eq!(request.target, "late");
        assert!(matches!(submitter.await.unwrap(), Err(RelayError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_answer_does_not_block_or_leak() {
        let ch = channel();
        let submitter = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.submit(TunnelRequest::new("GET", "slow", vec![])).await })
        };
        assert!(ch.poll(None).await.is_some());
        assert!(matches!(submitter.await.unwrap(), Err(RelayError::Timeout)));

        // Nobody waits any more: the answer is dropped without blocking.
        assert!(!ch.deliver(answer(b"too late")));

        // And it is not handed to the next request either.
        let next = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.submit(TunnelRequest::new("GET", "fresh", vec![])).await })
        };
        let request = ch.poll(None).await.expect("fresh request");
        assert_eq!(request.target, "fresh");
        assert!(ch.deliver(answer(b"fresh answer")));
        let response = next.await.unwrap().unwrap();
        assert_eq!(response.decode_body().unwrap(), b"fresh answer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_answer_from_other_poller_is_not_paired() {
        let ch = channel();
        let first = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.submit(TunnelRequest::new("GET", "one", vec![])).await })
        };
        let one = ch.poll(None).await.expect("first request");
        assert_eq!(one.target, "one");
        assert!(matches!(first.await.unwrap(), Err(RelayError::Timeout)));

        // A second poller picks up the next request while the first is still busy.
        let second = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.submit(TunnelRequest::new("GET", "two", vec![])).await })
        };
        let two = ch.poll(None).await.expect("second request");
        assert_eq!(two.target, "two");
        assert_ne!(one.id, two.id);

        // The first poller's answer finally arrives and must not reach "two".
        assert!(!ch.deliver(answer(b"answer-for-one").answering(&one)));
        assert!(ch.deliver(answer(b"answer-for-two").answering(&two)));

        let response = second.await.unwrap().unwrap();
        assert_eq!(response.decode_body().unwrap(), b"answer-for-two");
        assert_eq!(ch.metrics.late_answers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_body_is_not_an_answer() {
        let ch = channel();
        let submitter = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.submit(TunnelRequest::new("GET", "x", vec![])).await })
        };
        assert!(ch.poll(None).await.is_some());

        let empty = TunnelResponse { system: "abc".into(), ..Default::default() };
        let poller = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.poll(Some(empty)).await })
        };
        assert!(matches!(submitter.await.unwrap(), Err(RelayError::Timeout)));
        assert!(poller.await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_submit_releases_permit_and_withdraws() {
        let ch = channel();
        let submitter = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.submit(TunnelRequest::new("GET", "gone", vec![])).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ch.has_queued());
        assert_eq!(ch.permit().available(), 0);

        submitter.abort();
        let _ = submitter.await;

        assert!(!ch.has_queued());
        assert_eq!(ch.permit().available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submit_waits_for_first() {
        let ch = channel();
        let first = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.submit(TunnelRequest::new("GET", "one", vec![])).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.submit(TunnelRequest::new("GET", "two", vec![])).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let got = ch.poll(None).await.unwrap();
        assert_eq!(got.target, "one");
        // "two" cannot be published while "one" is unanswered.
        assert!(!ch.has_queued());

        assert!(ch.deliver(answer(b"1")));
        assert_eq!(first.await.unwrap().unwrap().decode_body().unwrap(), b"1");

        let got = ch.poll(None).await.unwrap();
        assert_eq!(got.target, "two");
        assert!(ch.deliver(answer(b"2")));
        assert_eq!(second.await.unwrap().unwrap().decode_body().unwrap(), b"2");
    }
}
