use async_trait::async_trait;
use std::{future::Future, time::Duration};

/// Bounds how long a test will wait on a future, so a hung claim/return call fails fast with a
/// clear panic instead of stalling the whole test binary.
#[async_trait]
pub trait FutureTimeout: Future + Sized {
    /// Await `self`, panicking if it doesn't resolve within `duration`.
    async fn with_timeout(self, duration: Duration) -> Self::Output;

    /// Await `self` with a conservative, fixed default timeout of five seconds.
    async fn with_timeout_panic(self) -> Self::Output
    where
        Self: Send,
        Self::Output: Send,
    {
        self.with_timeout(Duration::from_secs(5)).await
    }
}

#[async_trait]
impl<F> FutureTimeout for F
where
    F: Future + Send,
    F::Output: Send,
{
    async fn with_timeout(self, duration: Duration) -> Self::Output {
        match tokio::time::timeout(duration, self).await {
            Ok(v) => v,
            Err(_) => panic!("future did not complete within {duration:?}"),
        }
    }
}
