//! Core data model shared by the catalog, service engine, and server crates.
//!
//! Nothing in here talks to a database or the network; it is the vocabulary every other crate
//! builds on: record/task/manager shapes, the status lifecycles they move through, and the
//! typed errors that cross component boundaries (see `error`).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::clone_on_ref_ptr
)]

pub mod compute_history;
pub mod config;
pub mod error;
pub mod ids;
pub mod keywords;
pub mod manager;
pub mod metadata;
pub mod molecule;
pub mod output_store;
pub mod qcspec;
pub mod record;
pub mod service;
pub mod status;
pub mod task;

pub use compute_history::ComputeHistoryRow;
pub use config::{ApiLimits, FractalConfig, PeriodicsConfig};
pub use error::{ComputeManagerError, FractalError};
pub use ids::{KeywordSetId, ManagerName, MoleculeId, OutputStoreId, RecordId, TaskId};
pub use keywords::KeywordSet;
pub use manager::{ComputeManager, ManagerLog};
pub use metadata::{DeleteMetadata, InsertMetadata, QueryMetadata, TaskReturnMetadata};
pub use molecule::Molecule;
pub use output_store::{CompressionAlgorithm, OutputStoreEntry, OutputType};
pub use qcspec::QcSpecification;
pub use record::{
    BaseRecord, Driver, GridoptimizationRecord, ManybodyRecord, NebIteration, NebRecord,
    OptimizationRecord, ReactionComponent, ReactionRecord, Record, RecordType, ScanDimension,
    ScanDimensionType, SinglepointRecord, TorsiondriveRecord,
};
pub use service::{ServiceDependency, ServiceQueueEntry};
pub use status::{ManagerStatus, Priority, RecordStatus};
pub use task::{RequiredPrograms, Task};
