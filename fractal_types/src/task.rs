//! The task queue's row type (§4.F).
//!
//! A task is the unit a compute manager claims and returns a result for. Every record with
//! status `waiting` or `running` has exactly one corresponding task row (§3 invariant 1); the
//! row is deleted once the record leaves that pair of statuses.

use crate::ids::{ManagerName, RecordId, TaskId};
use crate::status::Priority;
use fractal_time::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The programs a task requires a manager to support, keyed by lower-case program name with an
/// optional pinned version (`required_programs{name→version|null}`, §6, §4.F). Keys are
/// persisted lower-case; the original schema enforces this with a check constraint
/// (`required_programs::text = LOWER(required_programs::text)`).
///
/// §8 notes the source is inconsistent about whether this is a name→version map or a plain name
/// set; this implementation keeps the map shape (it is the richer of the two and degrades to a
/// set by ignoring values) and resolves containment as a **name-only** subset test — a pinned
/// version on the task is informational and is not matched against the manager's own version
/// for that program. See the project's design notes for the full rationale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequiredPrograms(pub BTreeMap<String, Option<String>>);

impl RequiredPrograms {
    /// Build from an iterator of program names with no pinned version, lowercasing each name.
    pub fn new(programs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(
            programs
                .into_iter()
                .map(|p| (p.into().to_lowercase(), None))
                .collect(),
        )
    }

    /// True if every required program name appears as a key in `manager_programs`.
    pub fn satisfied_by(&self, manager_programs: &BTreeMap<String, Option<String>>) -> bool {
        self.0.keys().all(|name| manager_programs.contains_key(name))
    }
}

/// A queued or in-flight unit of compute work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Assigned on insert.
    pub id: Option<TaskId>,
    /// The record this task computes a result for. Unique: at most one task per record
    /// (invariant 1).
    pub record_id: RecordId,
    /// Opaque, program-specific input blob handed unchanged to the manager.
    pub spec: serde_json::Value,
    /// Routes the task to managers polling for this tag; `"*"` is the wildcard every manager
    /// without an explicit tag list implicitly matches.
    pub tag: String,
    /// Programs a claiming manager must support.
    pub required_programs: RequiredPrograms,
    /// Claim-time scheduling priority.
    pub priority: Priority,
    /// The manager currently holding this task, if claimed.
    pub manager_name: Option<ManagerName>,
    /// When this row was created. Used as the FIFO tiebreaker within a priority tier
    /// (`ORDER BY priority DESC, created_on ASC`, §5).
    pub created_on: Time,
}

impl Task {
    /// True if a manager currently holds this task.
    pub fn is_claimed(&self) -> bool {
        self.manager_name.is_some()
    }
}
