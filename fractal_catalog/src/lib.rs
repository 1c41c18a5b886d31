//! Postgres-backed storage layer for fractal-server.
//!
//! This crate owns every table in §6's persisted-state layout and the operations described in
//! §4.A through §4.H: deduplicating insertion, the task queue, the manager registry, the claim
//! engine's critical section, and the return engine. Nothing above this crate talks to `sqlx`
//! directly.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod claim;
pub mod interface;
pub mod keywords;
pub mod manager;
pub mod molecule;
pub mod output_store;
pub mod record;
pub mod return_engine;
pub mod service;
pub mod storage;
pub mod task;

pub use interface::{Catalog, ClockRepo, PostgresCatalog, RepoCollection, Transaction};

use snafu::Snafu;

/// Catalog-layer errors. Boundary-converted into [`fractal_types::FractalError`] by callers that
/// need the crate-agnostic vocabulary (e.g. `fractal_service`).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The underlying connection pool or a query against it failed.
    #[snafu(display("sqlx error: {source}"))]
    Sqlx { source: sqlx::Error },

    /// A `get`-by-id found nothing and the caller asked for `missing_ok = false`.
    #[snafu(display("{kind} {id} not found"))]
    NotFound { kind: &'static str, id: String },

    /// A non-upsert insert path found a uniquely-keyed row that already exists.
    #[snafu(display("{kind} already exists: {detail}"))]
    AlreadyExists { kind: &'static str, detail: String },

    /// A batch request exceeded a configured `api_limits.*` ceiling.
    #[snafu(display("requested {requested} rows, limit is {limit}"))]
    LimitExceeded { requested: usize, limit: usize },

    /// A manager referenced by name is unknown, inactive, or does not own the record it is
    /// acting on.
    #[snafu(display("manager error: {message} (shutdown={shutdown})"))]
    Manager { message: String, shutdown: bool },

    /// A value failed to round-trip through JSON (e.g. a malformed `service_state`).
    #[snafu(display("serde error: {source}"))]
    Serde { source: serde_json::Error },

    /// A requested operation (e.g. a compression algorithm) is a recognized value with no
    /// implementation in this build.
    #[snafu(display("unsupported: {detail}"))]
    Unsupported { detail: String },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Sqlx { source }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Serde { source }
    }
}

impl From<Error> for fractal_types::FractalError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { kind, id } => {
                fractal_types::FractalError::missing(format!("{kind} {id} not found"))
            }
            Error::AlreadyExists { kind, detail } => {
                fractal_types::FractalError::already_exists(format!("{kind}: {detail}"))
            }
            Error::LimitExceeded { requested, limit } => {
                fractal_types::FractalError::LimitExceeded { requested, limit }
            }
            Error::Manager { message, shutdown } => {
                fractal_types::ComputeManagerError::new(message, shutdown).into()
            }
            Error::Sqlx { source } => fractal_types::FractalError::internal(source.to_string()),
            Error::Serde { source } => fractal_types::FractalError::internal(source.to_string()),
            Error::Unsupported { detail } => fractal_types::FractalError::internal(detail),
        }
    }
}

/// Catalog-local result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
