//! A small in-process metric registry.
//!
//! fractal-server reports a handful of counters (tasks claimed, returned, rejected) and gauges
//! (active managers, active services) out of the claim engine, return engine, and periodic
//! runner. This crate gives them a single place to register named instruments without pulling
//! in a full Prometheus client — something heavier can be layered on top by scraping
//! [`Registry::report`].
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// A named, monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct U64Counter(Arc<AtomicU64>);

impl U64Counter {
    /// Increment the counter by `delta`.
    pub fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Read the current value.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A named gauge that can move up and down.
#[derive(Debug, Clone, Default)]
pub struct U64Gauge(Arc<AtomicU64>);

impl U64Gauge {
    /// Set the gauge to `value`.
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Read the current value.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A metric with a name and description, holding one recorder per distinct attribute set.
///
/// Most call sites only need a single, unlabeled recorder (`metric.recorder(&[])`); labeled
/// recorders exist for things like "tasks claimed, broken down by tag".
#[derive(Debug)]
pub struct Metric<T> {
    name: &'static str,
    description: &'static str,
    recorders: Mutex<BTreeMap<Vec<(&'static str, String)>, T>>,
}

impl<T: Default + Clone> Metric<T> {
    fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            recorders: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fetch (or lazily create) the recorder for the given set of attributes.
    pub fn recorder(&self, attributes: &[(&'static str, &str)]) -> T {
        let key: Vec<(&'static str, String)> =
            attributes.iter().map(|(k, v)| (*k, v.to_string())).collect();
        self.recorders.lock().entry(key).or_default().clone()
    }
}

/// Registry of all metrics known to a process.
///
/// Construct one per server instance and hand `Arc<Registry>` (or just `&Registry`) to every
/// component that records metrics, mirroring how the catalog, claim engine, and periodic runner
/// each hold onto their own counters.
#[derive(Debug, Default)]
pub struct Registry {
    names: Mutex<Vec<(&'static str, &'static str)>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new named counter metric.
    pub fn register_counter(&self, name: &'static str, description: &'static str) -> Metric<U64Counter> {
        self.names.lock().push((name, description));
        Metric::new(name, description)
    }

    /// Register a new named gauge metric.
    pub fn register_gauge(&self, name: &'static str, description: &'static str) -> Metric<U64Gauge> {
        self.names.lock().push((name, description));
        Metric::new(name, description)
    }

    /// Names and descriptions of every metric registered so far, for introspection/export.
    pub fn report(&self) -> Vec<(&'static str, &'static str)> {
        self.names.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_recorder_is_shared_per_attribute_set() {
        let registry = Registry::new();
        let metric = registry.register_counter("tasks_claimed", "number of tasks claimed");

        let a = metric.recorder(&[("tag", "default")]);
        let b = metric.recorder(&[("tag", "default")]);
        a.inc(3);
        b.inc(4);
        assert_eq!(a.fetch(), 7);

        let c = metric.recorder(&[("tag", "gpu")]);
        assert_eq!(c.fetch(), 0);
    }

    #[test]
    fn gauge_set_overwrites() {
        let registry = Registry::new();
        let metric = registry.register_gauge("active_managers", "number of active managers");
        let g = metric.recorder(&[]);
        g.set(5);
        g.set(2);
        assert_eq!(g.fetch(), 2);
    }
}
