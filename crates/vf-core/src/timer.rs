//! Keyed cancellable delayed tasks
//!
//! Every debounce and speculative classification in the engine is a delayed
//! task keyed by its source identity. Scheduling a new task for a key aborts
//! and replaces the pending one atomically, and each task carries an epoch so
//! a callback that was already running when it got superseded can tell.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

struct Slot {
    epoch: u64,
    handle: JoinHandle<()>,
}

/// A set of pending delayed tasks, at most one per key
pub struct TimerSet<K>
where
    K: Eq + Hash,
{
    slots: Arc<DashMap<K, Slot>>,
    next_epoch: AtomicU64,
}

impl<K> TimerSet<K>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Run `task` after `delay`, replacing any task pending for `key`
    ///
    /// Returns the epoch assigned to the new task. Once the delay elapses the
    /// slot is released before `task` starts, so the task may freely schedule
    /// or cancel timers for its own key.
    pub fn schedule<F>(&self, key: K, delay: Duration, task: F) -> u64
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        let slots = self.slots.clone();
        let task_key = key.clone();

        // Holding the entry across spawn keeps the insert ordered before the
        // task can release its own slot.
        let entry = self.slots.entry(key);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if slots
                .remove_if(&task_key, |_, slot| slot.epoch == epoch)
                .is_none()
            {
                trace!(key = ?task_key, epoch, "Superseded timer woke up, ignoring");
                return;
            }
            task.await;
        });

        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(Slot { epoch, handle });
                previous.handle.abort();
                trace!(key = ?occupied.key(), epoch, "Replaced pending timer");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot { epoch, handle });
            }
        }
        epoch
    }

    /// Cancel the task pending for `key`; returns whether one was pending
    pub fn cancel(&self, key: &K) -> bool {
        match self.slots.remove(key) {
            Some((_, slot)) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending task
    pub fn cancel_all(&self) {
        let keys: Vec<K> = self.slots.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Epoch of the task pending for `key`
    pub fn pending_epoch(&self, key: &K) -> Option<u64> {
        self.slots.get(key).map(|slot| slot.epoch)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<K> Default for TimerSet<K>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for TimerSet<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            slot.handle.abort();
        }
    }
}
