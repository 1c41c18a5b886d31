//! Append-only compute attempt history (§3, §4.H).

use crate::ids::RecordId;
use crate::status::RecordStatus;
use fractal_time::Time;
use serde::{Deserialize, Serialize};

/// One compute attempt against a record. Rows are never updated or deleted; a record's full
/// history is the ordered sequence of these by `modified_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeHistoryRow {
    /// The record this attempt belongs to.
    pub record_id: RecordId,
    /// The outcome of this attempt. Only `complete` and `error` are ever recorded here; a
    /// `running` or `waiting` record has no history row yet for its current attempt.
    pub status: RecordStatus,
    /// The manager that performed the computation, if any (absent for locally-completed or
    /// service-expanded records).
    pub manager_name: Option<String>,
    /// When this attempt finished.
    pub modified_on: Time,
    /// Opaque provenance blob as returned by the compute engine (program name/version, wall
    /// time, etc).
    pub provenance: serde_json::Value,
    /// Output identifiers produced by this attempt (stdout/stderr/error, each a pointer into the
    /// output store).
    pub outputs: Vec<crate::ids::OutputStoreId>,
}

impl ComputeHistoryRow {
    /// True if this attempt represents a successful computation.
    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Complete
    }
}
