//! Per-call response metadata returned alongside bulk storage operations.
//!
//! These mirror the shapes the storage layer hands back from `insert_general`-style batched
//! operations (§4.A): every element of an input list maps to exactly one outcome, in input
//! order, so a caller can zip its original request list against the metadata to find out what
//! happened to each item.

use serde::{Deserialize, Serialize};

/// Outcome of a batched insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertMetadata {
    /// Indices (into the input list) of items that were newly inserted.
    pub inserted_idx: Vec<usize>,
    /// Indices of items that matched an existing row and were not re-inserted.
    pub existing_idx: Vec<usize>,
    /// `(index, message)` pairs for items that could not be processed at all.
    pub errors: Vec<(usize, String)>,
}

impl InsertMetadata {
    /// Number of rows actually inserted.
    pub fn n_inserted(&self) -> usize {
        self.inserted_idx.len()
    }

    /// Number of rows that already existed.
    pub fn n_existing(&self) -> usize {
        self.existing_idx.len()
    }
}

/// Outcome of a batched delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteMetadata {
    /// Indices of items that were deleted.
    pub deleted_idx: Vec<usize>,
    /// `(index, message)` pairs for items that could not be deleted (not found, referenced by
    /// something else, etc).
    pub errors: Vec<(usize, String)>,
}

/// Pagination/count metadata for a projected query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// Total number of rows matching the filter, ignoring `limit`/`skip`.
    pub n_found: usize,
    /// Number of rows actually returned (after `limit`/`skip`).
    pub n_returned: usize,
    /// `skip` that was applied.
    pub skip: usize,
    /// `limit` that was applied.
    pub limit: usize,
}

/// Summary counters returned from a manager's `update_completed` (return engine) call (§4.H).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskReturnMetadata {
    /// Task ids accepted and applied successfully.
    pub accepted_ids: Vec<crate::ids::TaskId>,
    /// `(task_id, message)` pairs for tasks rejected outright (consistency check failed; the
    /// task's status/manager ownership no longer matched).
    pub rejected: Vec<(crate::ids::TaskId, String)>,
}
