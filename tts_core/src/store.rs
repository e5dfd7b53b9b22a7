//! Short-lived storage of synthesis requests for the two-phase stream flow.
//!
//! A handle stays redeemable until it expires; fetching does not consume it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::request::SynthesisRequest;

pub const DEFAULT_STREAM_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
struct PendingStream {
    request: SynthesisRequest,
    deadline: Instant,
}

impl PendingStream {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}

#[derive(Debug)]
pub struct StreamStore {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, PendingStream>>,
}

impl StreamStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Park a request and return its handle with the wall-clock expiry.
    pub fn create(&self, request: SynthesisRequest) -> (Uuid, DateTime<Utc>) {
        let id = Uuid::new_v4();
        let deadline = Instant::now() + self.ttl;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());

        self.lock().insert(id, PendingStream { request, deadline });
        (id, expires_at)
    }

    /// Look up a pending request. Expired entries are evicted and reported
    /// as missing.
    pub fn fetch(&self, id: &Uuid) -> Option<SynthesisRequest> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(id) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(id);
                None
            }
            Some(entry) => Some(entry.request.clone()),
            None => None,
        }
    }

    /// Evict every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`StreamStore::sweep`] every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = store.sweep();
                        if evicted > 0 {
                            debug!(evicted, remaining = store.len(), "expired pending streams");
                        }
                    }
                }
            }
        })
    }

    // A panic while holding the lock cannot leave an entry half-written, so a
    // poisoned table is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, PendingStream>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StreamStore {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_TTL)
    }
}
