//! The session-scope abstraction (§4.A): a guaranteed-release transactional context, plus the
//! per-concern repository traits every storage operation is grouped under.
//!
//! Mirrors the teacher's catalog/transaction split: callers ask a [`Catalog`] for a
//! [`Transaction`], do their reads/writes against the [`RepoCollection`] it exposes, and either
//! `commit()` or let it drop (which rolls back — readers use this as the "optional_session"
//! short-lived read-only path described in §5).

use crate::claim::ClaimRepo;
use crate::keywords::KeywordRepo;
use crate::manager::ManagerRepo;
use crate::molecule::MoleculeRepo;
use crate::output_store::OutputStoreRepo;
use crate::record::RecordRepo;
use crate::return_engine::ReturnRepo;
use crate::service::ServiceRepo;
use crate::task::TaskRepo;
use crate::Result;
use async_trait::async_trait;
use fractal_time::TimeProviderRef;
use observability_deps::tracing::warn;
use sqlx::{PgPool, Postgres};
use std::sync::Arc;

/// The clock a transaction stamps `created_on`/`modified_on` with, exposed across the crate
/// boundary so a caller building a new row (e.g. `fractal_service` submitting a service's child
/// records) doesn't have to thread a second, possibly-divergent [`fractal_time::TimeProviderRef`]
/// through by hand.
pub trait ClockRepo: Send {
    fn now(&self) -> fractal_time::Time;
}

impl ClockRepo for PostgresTxn {
    fn now(&self) -> fractal_time::Time {
        PostgresTxn::now(self)
    }
}

/// Everything a single high-level storage operation needs, grouped the way §4's subsections are
/// grouped. A `Box<dyn RepoCollection>` is one open transaction; every method call against it
/// participates in the same transaction until [`Transaction::commit`] or
/// [`Transaction::abort`].
pub trait RepoCollection:
    MoleculeRepo
    + KeywordRepo
    + OutputStoreRepo
    + RecordRepo
    + TaskRepo
    + ManagerRepo
    + ClaimRepo
    + ReturnRepo
    + ServiceRepo
    + ClockRepo
    + Send
{
}

impl<T> RepoCollection for T where
    T: MoleculeRepo
        + KeywordRepo
        + OutputStoreRepo
        + RecordRepo
        + TaskRepo
        + ManagerRepo
        + ClaimRepo
        + ReturnRepo
        + ServiceRepo
        + ClockRepo
        + Send
{
}

/// Commit/abort control over an open transaction, implemented alongside [`RepoCollection`] by
/// the same concrete type.
#[async_trait]
pub trait Transaction: RepoCollection {
    /// Commit all writes made through this handle.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all writes made through this handle. Equivalent to dropping it, but lets the
    /// caller log why.
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Top-level handle to the catalog database. One per process; cheap to clone (wraps a pool).
#[async_trait]
pub trait Catalog: std::fmt::Debug + Send + Sync {
    /// Open a new transaction. Every `FOR UPDATE` / `FOR UPDATE SKIP LOCKED` critical section
    /// (claim, return, deactivate) runs inside exactly one of these.
    async fn start_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// The metrics registry writes from this catalog report into.
    fn metrics(&self) -> Arc<metric::Registry>;

    /// The clock this catalog uses for `created_on`/`modified_on` stamps. Swappable in tests.
    fn time_provider(&self) -> TimeProviderRef;
}

/// A `Catalog` backed by a real Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
    metrics: Arc<metric::Registry>,
    time_provider: TimeProviderRef,
}

impl PostgresCatalog {
    /// Wrap an already-configured pool. Callers are responsible for running migrations before
    /// first use.
    pub fn new(pool: PgPool, metrics: Arc<metric::Registry>, time_provider: TimeProviderRef) -> Self {
        Self {
            pool,
            metrics,
            time_provider,
        }
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn start_transaction(&self) -> Result<Box<dyn Transaction>> {
        let txn = self.pool.begin().await?;
        Ok(Box::new(PostgresTxn {
            inner: Some(txn),
            time_provider: Arc::clone(&self.time_provider),
        }))
    }

    fn metrics(&self) -> Arc<metric::Registry> {
        Arc::clone(&self.metrics)
    }

    fn time_provider(&self) -> TimeProviderRef {
        Arc::clone(&self.time_provider)
    }
}

/// Concrete [`RepoCollection`]/[`Transaction`] over a live `sqlx` transaction.
///
/// `inner` is an `Option` purely so `commit`/`abort` (which consume `sqlx::Transaction` by
/// value) can be called from a `&mut self` receiver under `Box<dyn Transaction>`; it is `Some`
/// for the handle's entire observable lifetime and only taken at the very end.
pub struct PostgresTxn {
    pub(crate) inner: Option<sqlx::Transaction<'static, Postgres>>,
    pub(crate) time_provider: TimeProviderRef,
}

impl std::fmt::Debug for PostgresTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTxn").finish_non_exhaustive()
    }
}

impl PostgresTxn {
    /// Borrow the live connection for a query. Panics if called after `commit`/`abort`, which
    /// cannot happen through the public API since those consume `Box<Self>`.
    pub(crate) fn conn(&mut self) -> &mut sqlx::Transaction<'static, Postgres> {
        self.inner.as_mut().expect("transaction already finished")
    }

    pub(crate) fn now(&self) -> fractal_time::Time {
        self.time_provider.now()
    }
}

#[async_trait]
impl Transaction for PostgresTxn {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        let txn = self.inner.take().expect("transaction already finished");
        txn.commit().await?;
        Ok(())
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        let txn = self.inner.take().expect("transaction already finished");
        txn.rollback().await?;
        Ok(())
    }
}

impl Drop for PostgresTxn {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!("catalog transaction dropped without explicit commit/abort; rolling back");
        }
    }
}
