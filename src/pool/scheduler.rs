//! Keyed one-shot timers with cancel-and-replace semantics.
//!
//! Scheduling a job under a key that already has a pending job aborts the
//! pending one, so a burst of refill requests collapses into a single refill.
//! Once a job's delay has elapsed it claims its slot and runs to completion;
//! rescheduling the same key after that point does not interrupt it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

struct Slot {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct Debouncer {
    slots: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
}

impl Debouncer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs `job` after `delay` unless `key` is rescheduled or cancelled first.
    pub fn schedule<F>(self: &Arc<Self>, key: &str, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let timers = Arc::clone(self);
        let owned_key = key.to_string();

        // Hold the lock across spawn so the task cannot claim before its slot exists
        let mut slots = self.slots();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if timers.claim(&owned_key, generation) {
                job.await;
            }
        });

        if let Some(previous) = slots.insert(key.to_string(), Slot { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancels the pending job for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &str) -> bool {
        match self.slots().remove(key) {
            Some(slot) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending job. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Slot> = self.slots().drain().map(|(_, slot)| slot).collect();
        for slot in &drained {
            slot.handle.abort();
        }
        drained.len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.slots().contains_key(key)
    }

    fn claim(&self, key: &str, generation: u64) -> bool {
        let mut slots = self.slots();
        match slots.get(key) {
            Some(slot) if slot.generation == generation => {
                slots.remove(key);
                true
            }
            _ => false,
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
