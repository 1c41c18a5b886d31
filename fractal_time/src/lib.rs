//! Time abstraction used throughout fractal-server.
//!
//! Almost every invariant in the task queue and manager registry is phrased in terms of
//! `modified_on` timestamps (heartbeat staleness, FIFO ordering, orphan recovery). Routing all
//! reads of "now" through a [`TimeProvider`] lets tests freeze and advance the clock instead of
//! racing real wall-clock time.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::clone_on_ref_ptr
)]

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{fmt::Debug, sync::Arc, time::Duration};

/// A point in time, represented as UTC.
///
/// Newtype around [`DateTime<Utc>`] so call sites read `Time` rather than the more generic
/// `DateTime<Utc>`, matching how the rest of the crate spells timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// The current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Construct from an existing [`DateTime<Utc>`].
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// The underlying [`DateTime<Utc>`].
    pub fn date_time(&self) -> DateTime<Utc> {
        self.0
    }

    /// Duration elapsed between `earlier` and `self`. Saturates to zero if `earlier` is after
    /// `self`.
    pub fn checked_duration_since(&self, earlier: Self) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or_default()
    }
}

impl std::ops::Sub<Duration> for Time {
    type Output = Time;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self(self.0 - chrono::Duration::from_std(rhs).unwrap_or_default())
    }
}

impl std::ops::Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + chrono::Duration::from_std(rhs).unwrap_or_default())
    }
}

/// Something that can report the current time.
///
/// Implementations must be cheap to call and safe to share across tasks; the catalog and
/// manager registry stamp `created_on`/`modified_on` on essentially every write.
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// Returns the current time according to this provider.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] that returns the real, current wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider {}

impl SystemProvider {
    /// Create a new [`SystemProvider`].
    pub fn new() -> Self {
        Self {}
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time::now()
    }
}

/// A [`TimeProvider`] that returns a fixed, settable time. Used in tests that assert on
/// heartbeat staleness or FIFO ordering without sleeping real time.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    /// Create a new [`MockProvider`] initialized to `start`.
    pub fn new(start: Time) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Set the mock time to `time`.
    pub fn set(&self, time: Time) {
        *self.now.write() = time;
    }

    /// Advance the mock time by `duration`.
    pub fn inc(&self, duration: Duration) {
        let mut guard = self.now.write();
        *guard = *guard + duration;
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}

/// Convenience alias for a shared, dynamically-dispatched [`TimeProvider`].
pub type TimeProviderRef = Arc<dyn TimeProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_advances() {
        let start = Time::from_datetime(Utc::now());
        let mock = MockProvider::new(start);
        assert_eq!(mock.now(), start);

        mock.inc(Duration::from_secs(30));
        assert_eq!(mock.now(), start + Duration::from_secs(30));
    }

    #[test]
    fn duration_since_saturates() {
        let t0 = Time::from_datetime(Utc::now());
        let t1 = t0 + Duration::from_secs(10);
        assert_eq!(t1.checked_duration_since(t0), Duration::from_secs(10));
        assert_eq!(t0.checked_duration_since(t1), Duration::ZERO);
    }
}
