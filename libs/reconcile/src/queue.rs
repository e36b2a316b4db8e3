//! Keyed work queue.
//!
//! A key is either waiting in the queue, being processed, or absent; it is
//! never queued twice and never handed to two workers at once. Adding a key
//! that is being processed marks it dirty, and [`WorkQueue::done`] puts it
//! back in line.
//!
//! Delayed adds keep one deadline per key; a later request for the same key
//! only replaces it when it is earlier.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[derive(Debug)]
struct QueueState<K> {
    pending: VecDeque<K>,
    queued: HashSet<K>,
    active: HashSet<K>,
    dirty: HashSet<K>,
    delayed: HashMap<K, Instant>,
    shut_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            queued: HashSet::new(),
            active: HashSet::new(),
            dirty: HashSet::new(),
            delayed: HashMap::new(),
            shut_down: false,
        }
    }
}

/// De-duplicating FIFO of keys with per-key exclusivity.
#[derive(Debug)]
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> Default for WorkQueue<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `key` unless it is already waiting.
    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return;
        }
        if state.active.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.pending.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue `key` once `delay` has passed.
    ///
    /// No-op if the key is already waiting or an earlier deadline is pending.
    pub async fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key).await;
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.state.lock().await;
            if state.shut_down || state.queued.contains(&key) {
                return;
            }
            if matches!(state.delayed.get(&key), Some(pending) if *pending <= deadline) {
                return;
            }
            state.delayed.insert(key.clone(), deadline);
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut state = queue.state.lock().await;
                // superseded by an earlier deadline
                if state.delayed.get(&key) != Some(&deadline) {
                    return;
                }
                state.delayed.remove(&key);
            }
            queue.add(key).await;
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The key is exclusively owned by the caller until [`done`](Self::done).
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.pending.pop_front() {
                    state.queued.remove(&key);
                    state.active.insert(key.clone());
                    return Some(key);
                }
                if state.shut_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release `key`; re-queue it if it was added while being processed.
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.active.remove(key);
        if state.dirty.remove(key) && !state.shut_down && state.queued.insert(key.clone()) {
            state.pending.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub async fn shutdown(&self) {
        self.state.lock().await.shut_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys waiting.
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    pub(crate) async fn delayed_len(&self) -> usize {
        self.state.lock().await.delayed.len()
    }

    /// True while `key` is handed out.
    #[cfg(test)]
    pub(crate) async fn is_active(&self, key: &K) -> bool {
        self.state.lock().await.active.contains(key)
    }
}
