//! The service engine (§4.I): drives records that decompose into child records — torsion
//! drive, grid optimization, reaction, and NEB — to completion across repeated
//! [`engine::iterate`] ticks, the way `fractal_catalog`'s return engine drives ordinary
//! single-task records to completion in one call.
//!
//! Many-body expansions are *not* handled here: `fractal_types::RecordType::is_service` names
//! exactly the four record types above, and `ManybodyRecord` (§4.D) has no `service_state` of
//! its own — its one compute task is completed directly by `fractal_catalog::return_engine`,
//! same as a singlepoint or optimization. See `DESIGN.md` for why.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod engine;
pub mod gridoptimization;
pub mod model;
pub mod neb;
pub mod reaction;
pub mod torsiondrive;

pub use engine::{iterate, run_tick, Outcome, TickSummary};

use snafu::Snafu;

/// Service-engine errors, boundary-converted into [`fractal_types::FractalError`] the same way
/// `fractal_catalog::Error` is.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The underlying storage layer failed.
    #[snafu(display("catalog error: {source}"))]
    Catalog { source: fractal_catalog::Error },

    /// `iterate` was asked to tick a record whose type isn't service-driven.
    #[snafu(display("record {record_id} is not a service-driven record type"))]
    NotAService { record_id: fractal_types::RecordId },

    /// A malformed `service_state` blob (submitted by a caller, or corrupted between ticks).
    #[snafu(display("malformed service_state for record {record_id}: {detail}"))]
    MalformedState {
        record_id: fractal_types::RecordId,
        detail: String,
    },
}

impl From<fractal_catalog::Error> for Error {
    fn from(source: fractal_catalog::Error) -> Self {
        Self::Catalog { source }
    }
}

impl From<Error> for fractal_types::FractalError {
    fn from(err: Error) -> Self {
        match err {
            Error::Catalog { source } => source.into(),
            Error::NotAService { record_id } => {
                fractal_types::FractalError::internal(format!("record {record_id} is not a service"))
            }
            Error::MalformedState { record_id, detail } => {
                fractal_types::FractalError::internal(format!("record {record_id}: {detail}"))
            }
        }
    }
}

/// Service-engine-local result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
