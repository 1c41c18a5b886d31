//! Status and priority enums shared across records, tasks, and managers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle a [`crate::BaseRecord`] moves through (§3 invariant 6).
///
/// Transitions: `waiting -> running -> {complete, error}`; any non-terminal state can move to
/// `cancelled`; `complete` can flip to `invalid` and back; any state can be soft-`deleted`, and
/// a revert restores the prior non-deleted status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Submitted, no task assigned to a manager yet (or waiting on a service iteration).
    Waiting,
    /// A manager has claimed the corresponding task and is computing it.
    Running,
    /// Finished successfully; latest `compute_history` row is also `complete`.
    Complete,
    /// Finished with a failure.
    Error,
    /// Cancelled by a user; any in-flight task row has been removed.
    Cancelled,
    /// Previously `complete`, but flagged unusable (and may be flipped back).
    Invalid,
    /// Soft-deleted; not normally visible, but can be restored to its prior status.
    Deleted,
}

impl RecordStatus {
    /// True for `waiting` and `running`: per invariant (1), these are exactly the statuses that
    /// have a corresponding row in the task queue.
    pub fn has_task(self) -> bool {
        matches!(self, Self::Waiting | Self::Running)
    }

    /// True for `complete`, `error`, `cancelled`: no further work will happen on this record
    /// without an explicit reset.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Invalid => "invalid",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// Claim-time scheduling priority. Higher priority preempts lower priority at claim time only;
/// a task already running is never preempted (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Claimed only once no `normal`/`high` work of the same tag remains.
    Low,
    /// The default priority for newly submitted work.
    Normal,
    /// Claimed ahead of `normal`/`low` work of the same tag.
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    /// Numeric rank used for `ORDER BY priority DESC`; higher sorts first.
    pub fn rank(self) -> i16 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }
}

/// Liveness state of a [`crate::ComputeManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerStatus {
    /// Heartbeating within the last `5 * heartbeat_frequency`; eligible to claim/return tasks.
    Active,
    /// Deactivated, either explicitly or by the heartbeat sweep; any running tasks it held have
    /// been returned to `waiting`.
    Inactive,
}
