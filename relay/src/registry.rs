//! Session registry for the HomeProxy relay
//!
//! Maps a home system's id to its [`SessionChannel`]. Channels are created
//! when a poller first declares the id and live until the idle reaper
//! removes them.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::metrics::Metrics;
use crate::session::{SessionChannel, Timeouts};

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<SessionChannel>>>,
    timeouts: Timeouts,
    metrics: Metrics,
}

impl SessionRegistry {
    pub fn new(timeouts: Timeouts, metrics: Metrics) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            timeouts,
            metrics,
        }
    }

    /// Look up a session without creating it
    pub fn find(&self, id: &str) -> Option<Arc<SessionChannel>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the session for `id`, creating it on first use.
    ///
    /// Concurrent calls for the same id always end up with the same channel.
    pub async fn find_or_create(&self, id: &str) -> Arc<SessionChannel> {
        if let Some(channel) = self.find(id) {
            return channel;
        }

        let (channel, created) = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let channel = Arc::new(SessionChannel::new(id, self.timeouts, self.metrics.clone()));
                entry.insert(Arc::clone(&channel));
                (channel, true)
            }
        };

        if created {
            info!("Session opened: {}", id);
            self.metrics.session_opened(id).await;
        }
        channel
    }

    /// Drop sessions idle for at least `max_idle`.
    ///
    /// A session some handler still holds (a waiting poll or submit) is
    /// never removed. Returns how many were removed.
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let mut removed = Vec::new();
        self.sessions.retain(|id, channel| {
            let busy = Arc::strong_count(channel) > 1;
            let keep = busy || channel.idle_for() < max_idle;
            if !keep {
                removed.push(id.clone());
            }
            keep
        });

        for id in &removed {
            info!("Session {} evicted after {:?} idle", id, max_idle);
            self.metrics.session_closed(id).await;
        }
        removed.len()
    }

    /// Run [`reap_idle`](Self::reap_idle) every `every` until the task is aborted
    pub fn spawn_reaper(&self, max_idle: Duration, every: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = registry.reap_idle(max_idle).await;
                debug!("Reaper pass: {} removed, {} live", removed, registry.len());
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
