//! Deduplicating work queue of endpoint keys.
//!
//! A key is held at most once: adding a key that is already waiting is a
//! no-op, and adding a key that a worker is processing marks it dirty so it
//! is queued again when that worker calls [`WorkQueue::done`]. Together this
//! gives one in-flight pass per key while never losing a trigger.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use erinnerung_core::ObjectKey;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<ObjectKey>,
    /// Keys waiting in `queue` or re-added while processing.
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    shutting_down: bool,
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(%key, "Key is being processed, marked dirty");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Adds `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.add(key).await });
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a shutdown in between wakes us.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Releases `key`, queueing it again if it was re-added meanwhile.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stops handing out keys and wakes every waiting worker.
    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_processing(&self, key: &ObjectKey) -> bool {
        self.state.lock().await.processing.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[tokio::test]
    async fn test_duplicates_collapse() {
        let q = WorkQueue::new();
        q.add(key("a")).await;
        q.add(key("a")).await;
        q.add(key("b")).await;
        assert_eq!(q.len().await, 2);

        assert_eq!(q.get().await, Some(key("a")));
        assert_eq!(q.get().await, Some(key("b")));
    }

    #[tokio::test]
    async fn test_readd_while_processing_requeues_on_done() {
        let q = WorkQueue::new();
        q.add(key("a")).await;
        let k = q.get().await.unwrap();

        q.add(key("a")).await;
        // Held back until the current pass finishes.
        assert!(q.is_empty().await);

        q.done(&k).await;
        assert_eq!(q.len().await, 1);
        assert_eq!(q.get().await, Some(key("a")));
        q.done(&key("a")).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let q = WorkQueue::new_shared();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.add(key("late")).await;
        assert_eq!(waiter.await.unwrap(), Some(key("late")));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let q = WorkQueue::new_shared();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shutdown().await;
        assert_eq!(waiter.await.unwrap(), None);

        q.add(key("ignored")).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after() {
        let q = WorkQueue::new_shared();
        q.add_after(key("a"), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(q.is_empty().await);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(q.len().await, 1);
    }
}
