//! Compute manager registry row and heartbeat log (§4.G).

use crate::ids::ManagerName;
use crate::status::ManagerStatus;
use fractal_time::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered compute manager: a remote worker pool that polls the claim/return endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeManager {
    /// Unique name, conventionally `cluster-hostname-uuid` (§6).
    pub name: ManagerName,
    /// Cluster identifier supplied at activation.
    pub cluster: String,
    /// Hostname supplied at activation.
    pub hostname: String,
    /// Username the manager authenticated as.
    pub username: Option<String>,
    /// `qcengine`/manager software version string.
    pub manager_version: String,
    /// Tags this manager polls for, in priority order. Must contain at least one non-empty tag
    /// (§6); `"*"` matches any tag including an absent one.
    pub compute_tags: Vec<String>,
    /// Programs (and optional pinned versions) this manager can execute. Must contain at least
    /// one entry (§6); keys are lower-cased by the server on activation.
    pub programs: BTreeMap<String, Option<String>>,
    /// Current liveness state.
    pub status: ManagerStatus,
    /// When this manager was first activated.
    pub created_on: Time,
    /// Last activate/heartbeat/deactivate time. Staleness is judged against this field
    /// (`modified_on < now - 5 * heartbeat_frequency`, §4.J).
    pub modified_on: Time,
    /// Tasks currently claimed and not yet returned.
    pub active_tasks: i64,
    /// Cores currently in use, as last reported in a heartbeat.
    pub active_cores: i64,
    /// Memory (GiB) currently in use, as last reported in a heartbeat.
    pub active_memory: f64,
    /// Cumulative CPU-hours reported across this manager's lifetime.
    pub total_cpu_hours: f64,
    /// Cumulative tasks successfully completed.
    pub completed: i64,
    /// Cumulative tasks that failed.
    pub failures: i64,
    /// Cumulative tasks claimed.
    pub claimed: i64,
    /// Cumulative tasks returned to `waiting` out from under this manager (deactivation,
    /// orphan recovery).
    pub returned: i64,
}

impl ComputeManager {
    /// Whether `tag` is served by this manager: an exact match, or the manager carries the `"*"`
    /// wildcard tag (§4.F step 2).
    pub fn serves_tag(&self, tag: &str) -> bool {
        self.compute_tags.iter().any(|t| t == "*" || t == tag)
    }
}

/// One heartbeat snapshot, appended to the manager's log on every activate/heartbeat call that
/// requests logging (§4.G).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerLog {
    /// The manager this entry belongs to.
    pub manager_name: ManagerName,
    /// When this entry was recorded.
    pub timestamp: Time,
    /// Tasks completed since the previous log entry.
    pub completed: i64,
    /// Tasks submitted (claimed) since the previous log entry.
    pub submitted: i64,
    /// Tasks failed since the previous log entry.
    pub failures: i64,
    /// Cumulative worker wall time at this snapshot, seconds.
    pub total_worker_walltime: f64,
    /// Cumulative task wall time at this snapshot, seconds.
    pub total_task_walltime: f64,
    /// Active tasks at this snapshot.
    pub active_tasks: i64,
    /// Active cores at this snapshot.
    pub active_cores: i64,
    /// Active memory (GiB) at this snapshot.
    pub active_memory: f64,
}
