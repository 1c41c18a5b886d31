//! Best-effort notification of record completion.
//!
//! The return engine and service engine call [`CompletionRegistry::notify`] whenever a record
//! transitions into a terminal status. API handlers that want to block-wait for a record (e.g.
//! "submit and wait") call [`CompletionRegistry::watch`] beforehand and await the returned
//! future. Watchers are registered in memory only: if the process restarts, or nobody is
//! watching when a record finishes, the notification is simply dropped. Nothing here is
//! persisted, and nothing here is required for correctness - the record's status in the
//! catalog is always the source of truth.

use observability_deps::tracing::trace;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Registry of in-flight watchers, keyed by record id.
///
/// `S` is the status type delivered to a watcher on completion (typically a `RecordStatus`).
#[derive(Debug)]
pub struct CompletionRegistry<S> {
    watchers: Mutex<HashMap<i64, Vec<oneshot::Sender<S>>>>,
}

impl<S> Default for CompletionRegistry<S> {
    fn default() -> Self {
        Self {
            watchers: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Clone + Send + 'static> CompletionRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `record_id`'s next terminal transition.
    ///
    /// Returns a future that resolves with the new status once [`Self::notify`] is called for
    /// this id, or never resolves if the record never finishes and the registry is dropped
    /// first (the receiving end observes a closed channel, which callers should treat the same
    /// as "poll the record directly").
    pub fn watch(&self, record_id: i64) -> oneshot::Receiver<S> {
        let (tx, rx) = oneshot::channel();
        self.watchers.lock().entry(record_id).or_default().push(tx);
        rx
    }

    /// Notify every watcher registered for `record_id` that it reached `status`, then forget
    /// them. Safe to call even if nobody is watching.
    pub fn notify(&self, record_id: i64, status: S) {
        let senders = self.watchers.lock().remove(&record_id);
        let Some(senders) = senders else {
            return;
        };
        trace!(record_id, n_watchers = senders.len(), "notifying completion watchers");
        for tx in senders {
            // Ignore failures: the watcher simply stopped caring (dropped its receiver).
            let _ = tx.send(status.clone());
        }
    }

    /// Number of records currently being watched. Exposed for tests and diagnostics.
    pub fn watched_len(&self) -> usize {
        self.watchers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_wakes_watcher() {
        let registry: CompletionRegistry<&'static str> = CompletionRegistry::new();
        let rx = registry.watch(42);
        registry.notify(42, "complete");
        assert_eq!(rx.await.unwrap(), "complete");
    }

    #[tokio::test]
    async fn notify_with_no_watchers_is_a_noop() {
        let registry: CompletionRegistry<&'static str> = CompletionRegistry::new();
        registry.notify(7, "complete");
        assert_eq!(registry.watched_len(), 0);
    }

    #[tokio::test]
    async fn multiple_watchers_all_wake() {
        let registry: CompletionRegistry<&'static str> = CompletionRegistry::new();
        let rx1 = registry.watch(1);
        let rx2 = registry.watch(1);
        registry.notify(1, "error");
        assert_eq!(rx1.await.unwrap(), "error");
        assert_eq!(rx2.await.unwrap(), "error");
    }
}
