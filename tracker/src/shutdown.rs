//! Cooperative shutdown signalling for long-running background tasks (the periodic runner).
//!
//! Exactly one periodic runner must be alive per deployment, and it must stop cleanly on
//! SIGINT/SIGTERM rather than being killed mid-claim or mid-iterate. [`ShutdownHandle`] wraps a
//! [`CancellationToken`] so every loop (`server_stats`, `manager_heartbeat_check`,
//! `service_tick`) can `select!` against the same signal.

use tokio_util::sync::CancellationToken;

/// A cloneable handle used to request, and observe, cooperative shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Create a new, not-yet-cancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// True once [`Self::shutdown`] has been called on this handle or any clone of it.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested. Intended for use in `tokio::select!` arms
    /// alongside `tokio::time::sleep` so periodic loops wake promptly on shutdown instead of
    /// waiting out their full interval.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_after_shutdown() {
        let handle = ShutdownHandle::new();
        assert!(!handle.is_shutting_down());

        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown();
        task.await.unwrap();
        assert!(handle.is_shutting_down());
    }
}
