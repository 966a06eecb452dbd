//! Keyed, de-duplicating, rate-limited work queue.
//!
//! A key is queued at most once. Adding a key that is already waiting merges
//! the two events into one; adding a key that a worker is processing parks
//! the event until [`WorkQueue::done`] is called for it, so no two workers
//! ever hold the same key. Distinct keys are handed out in FIFO order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// What happened to the object behind a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    /// Merge a newer event into a pending one.
    ///
    /// A deletion supersedes everything; otherwise a pending creation stays a
    /// creation, since the worker has not yet seen the object at all.
    pub fn coalesce(self, newer: EventKind) -> EventKind {
        match (self, newer) {
            (_, EventKind::Deleted) => EventKind::Deleted,
            (EventKind::Created, _) | (_, EventKind::Created) => EventKind::Created,
            _ => EventKind::Updated,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Created => write!(f, "created"),
            EventKind::Updated => write!(f, "updated"),
            EventKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// Backoff and global rate settings for requeues.
#[derive(Debug, Clone, Copy)]
pub struct RateSettings {
    /// Delay before the first requeue of a key.
    pub base_delay: Duration,
    /// Cap on the per-key delay.
    pub max_delay: Duration,
    /// Sustained requeues per second across all keys.
    pub qps: u32,
    /// Burst size across all keys.
    pub burst: u32,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            qps: 10,
            burst: 100,
        }
    }
}

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashMap<K, EventKind>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    ready: Notify,
    limiter: DefaultDirectRateLimiter,
    settings: RateSettings,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(settings: RateSettings) -> Self {
        let qps = NonZeroU32::new(settings.qps).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(settings.burst).unwrap_or(NonZeroU32::MIN);
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashMap::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            ready: Notify::new(),
            limiter: RateLimiter::direct(Quota::per_second(qps).allow_burst(burst)),
            settings,
        }
    }

    /// Queue an event for `key`. Ignored after shutdown.
    pub fn add(&self, key: K, kind: EventKind) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        if let Some(pending) = state.dirty.get_mut(&key) {
            *pending = pending.coalesce(kind);
            return;
        }
        state.dirty.insert(key.clone(), kind);
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.ready.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<(K, EventKind)> {
        loop {
            let notified = self.ready.notified();
            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                while let Some(key) = state.queue.pop_front() {
                    let Some(kind) = state.dirty.remove(&key) else {
                        continue;
                    };
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.ready.notify_one();
                    }
                    return Some((key, kind));
                }
            }
            notified.await;
        }
    }

    /// Release a key. If it was re-added while held, it is queued again.
    pub fn done(&self, key: &K) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains_key(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.ready.notify_one();
        }
    }

    /// Re-add `key` after its per-key backoff and a global rate token.
    pub fn add_rate_limited(self: &Arc<Self>, key: K, kind: EventKind) {
        let delay = {
            let mut state = self.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff(*failures);
            *failures += 1;
            delay
        };
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.limiter.until_ready().await;
            queue.add(key, kind);
        });
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures);
        self.settings
            .base_delay
            .saturating_mul(factor)
            .min(self.settings.max_delay)
    }

    /// How many times `key` has been requeued since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Clear the backoff history of `key`.
    pub fn forget(&self, key: &K) {
        self.state.lock().failures.remove(key);
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys and wake every waiting worker.
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.ready.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}
