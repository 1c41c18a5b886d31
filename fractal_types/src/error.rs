//! Typed errors that cross component boundaries (§7).
//!
//! Two separate error surfaces exist on purpose:
//!
//! - [`FractalError`] is returned by the storage layer, record store, and service engine to
//!   *internal* callers (other Rust code in this workspace).
//! - [`ComputeManagerError`] is the narrower shape the claim/return engines hand back across the
//!   manager wire protocol; it carries only what a manager needs to decide whether to shut down.
//!
//! An internal exception raised while applying a single task's result must never abort the
//! surrounding batch (§4.H step 5); callers are expected to catch [`FractalError::Internal`] at
//! the per-task boundary and convert it into a synthesized failed result rather than propagate
//! it.

use snafu::Snafu;
use std::fmt;

/// Errors surfaced by the storage, record, task, and service layers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FractalError {
    /// A `get`-by-id call with `missing_ok = false` found nothing.
    #[snafu(display("missing data: {message}"))]
    MissingData {
        /// Human-readable detail.
        message: String,
    },

    /// An insert path that is not upsert-on-conflict found a uniquely-keyed row that already
    /// exists.
    #[snafu(display("already exists: {message}"))]
    AlreadyExists {
        /// Human-readable detail.
        message: String,
    },

    /// A request's batch size exceeded a configured `api_limits.*` ceiling.
    #[snafu(display("limit exceeded: requested {requested}, limit is {limit}"))]
    LimitExceeded {
        /// The size that was requested.
        requested: usize,
        /// The configured ceiling.
        limit: usize,
    },

    /// A manager is unknown, inactive, or no longer owns the record it is submitting for.
    #[snafu(display("compute manager error: {source}"))]
    Manager {
        /// The underlying manager error.
        source: ComputeManagerError,
    },

    /// A validation error safe to show directly to a client.
    #[snafu(display("{message}"))]
    UserReportable {
        /// Human-readable detail.
        message: String,
    },

    /// Anything else. Per §7, these are caught at the per-record boundary in the return engine
    /// and service engine and converted into a `FailedOperation{error_type:
    /// internal_fractal_error}` on the affected record rather than propagated to the caller.
    #[snafu(display("internal error: {message}"))]
    Internal {
        /// Human-readable detail, usually including a captured backtrace/debug string.
        message: String,
    },
}

impl FractalError {
    /// Build a [`Self::MissingData`] error.
    pub fn missing(message: impl Into<String>) -> Self {
        Self::MissingData {
            message: message.into(),
        }
    }

    /// Build a [`Self::AlreadyExists`] error.
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            message: message.into(),
        }
    }

    /// Build a [`Self::UserReportable`] error.
    pub fn user_reportable(message: impl Into<String>) -> Self {
        Self::UserReportable {
            message: message.into(),
        }
    }

    /// Build a [`Self::Internal`] error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Error returned to a compute manager over the wire when it is unknown, inactive, or has lost
/// ownership of a record it tried to act on.
///
/// `shutdown` tells the manager whether it should stop polling entirely (it has been
/// deactivated, e.g. by the heartbeat sweep) or whether the specific request was simply
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeManagerError {
    /// Human-readable detail.
    pub message: String,
    /// If true, the manager should terminate rather than keep polling.
    pub shutdown: bool,
}

impl ComputeManagerError {
    /// Construct a new manager error.
    pub fn new(message: impl Into<String>, shutdown: bool) -> Self {
        Self {
            message: message.into(),
            shutdown,
        }
    }
}

impl fmt::Display for ComputeManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ComputeManagerError {}

impl From<ComputeManagerError> for FractalError {
    fn from(source: ComputeManagerError) -> Self {
        Self::Manager { source }
    }
}
