//! Manager↔server wire shapes (§6) and the thin translation into catalog calls.
//!
//! These are plain DTOs, not request/response types for any particular transport — the HTTP
//! layer that would decode JSON/msgpack into them and encode the responses back out is explicitly
//! out of scope (§1). What lives here is exactly what a transport handler would call once it had
//! decoded a body: open one transaction, do the catalog call, fire the ambient side effects
//! (metrics, completion notifications) the periodic runner isn't in a position to fire, and
//! commit.

use std::collections::BTreeMap;
use std::collections::HashMap;

use fractal_catalog::claim::{ClaimRepo, ClaimedTask};
use fractal_catalog::manager::{HeartbeatStats, ManagerRepo};
use fractal_catalog::return_engine::{ReturnRepo, TaskResult};
use fractal_catalog::task::TaskRepo;
use fractal_catalog::Transaction;
use fractal_types::{ManagerName, RecordStatus, TaskId, TaskReturnMetadata};
use observability_deps::tracing::info;

use crate::{Error, FractalServer, Result};

/// `POST /compute/v1/managers` body (§6 `name_data` is flattened here: callers build the
/// `cluster-hostname-uuid` name however their transport layer assembles it).
#[derive(Debug, Clone)]
pub struct ActivateRequest {
    pub name: ManagerName,
    pub cluster: String,
    pub hostname: String,
    pub username: Option<String>,
    pub manager_version: String,
    pub programs: BTreeMap<String, Option<String>>,
    pub compute_tags: Vec<String>,
}

/// `PATCH /compute/v1/managers/{fullname}` body.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatRequest {
    pub active_tasks: i64,
    pub active_cores: i64,
    pub active_memory: f64,
    pub total_cpu_hours: f64,
    /// `status == "inactive"` in the original body; `true` deactivates instead of heartbeating.
    pub shutting_down: bool,
}

/// `POST /compute/v1/tasks/claim` body. `programs`/`compute_tags` are accepted for shape
/// compatibility with §6 but not consulted: eligibility is judged against what the manager
/// registered at activation (`ManagerRepo::activate`), not whatever it rebroadcasts on each
/// claim call, so a manager can't widen its own claim eligibility without re-activating.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub name: ManagerName,
    pub limit: usize,
}

/// `RecordTask` (§6): `{id, record_id, function, args, kwargs, compute_tag,
/// required_programs}`. This implementation keeps the program input as a single opaque `spec`
/// blob rather than splitting `args`/`kwargs` apart — whatever composed the task's `spec` at
/// submission time is responsible for shaping it the way the manager's adapter layer (out of
/// scope, §1) expects to find it, the same way `function`/`args`/`kwargs` are opaque to the
/// server in the original.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordTask {
    pub id: TaskId,
    pub record_id: fractal_types::RecordId,
    pub spec: serde_json::Value,
    pub compute_tag: String,
    pub required_programs: serde_json::Value,
}

impl From<ClaimedTask> for RecordTask {
    fn from(t: ClaimedTask) -> Self {
        Self {
            id: t.id,
            record_id: t.record_id,
            spec: t.spec,
            compute_tag: t.compute_tag,
            required_programs: t.required_programs,
        }
    }
}

/// `POST /compute/v1/tasks/return` response (§6): `{accepted_ids, rejected_info,
/// error_description?}`. `error_description` never gets set here — that field exists in the
/// original for a call that fails before any task is processed (e.g. the manager itself is
/// rejected), which is already a `ComputeManagerError` raised before this type is ever built.
#[derive(Debug, Clone, Default)]
pub struct ReturnOutcome {
    pub accepted_ids: Vec<TaskId>,
    pub rejected_info: Vec<(TaskId, String)>,
}

impl From<TaskReturnMetadata> for ReturnOutcome {
    fn from(m: TaskReturnMetadata) -> Self {
        Self {
            accepted_ids: m.accepted_ids,
            rejected_info: m.rejected,
        }
    }
}

/// Activate a manager (§4.F step 1, §6). Lower-cases tags/programs and rejects empty lists the
/// same way the original validates the activation body; the catalog layer itself does not
/// enforce non-emptiness, so that check belongs here, at the boundary the request crossed.
pub async fn activate(server: &FractalServer, req: ActivateRequest) -> Result<()> {
    if req.compute_tags.iter().all(|t| t.trim().is_empty()) {
        return Err(Error::InvalidRequest {
            message: "activation requires at least one non-empty compute tag".to_string(),
        });
    }
    if req.programs.keys().all(|p| p.trim().is_empty()) {
        return Err(Error::InvalidRequest {
            message: "activation requires at least one non-empty program".to_string(),
        });
    }

    let tags: Vec<String> = req.compute_tags.into_iter().map(|t| t.to_lowercase()).collect();
    let programs: BTreeMap<String, Option<String>> = req
        .programs
        .into_iter()
        .map(|(name, version)| (name.to_lowercase(), version))
        .collect();

    let mut txn = server.catalog.start_transaction().await.map_err(Error::from)?;
    ManagerRepo::activate(
        &mut *txn,
        req.name.clone(),
        req.cluster,
        req.hostname,
        req.username,
        req.manager_version,
        programs,
        tags,
    )
    .await
    .map_err(Error::from)?;
    txn.commit().await.map_err(Error::from)?;

    server
        .metrics()
        .register_counter("managers_activated", "compute managers activated")
        .recorder(&[])
        .inc(1);
    Ok(())
}

/// Heartbeat or deactivate a manager (§4.F step 2, §6).
pub async fn heartbeat(server: &FractalServer, name: &ManagerName, req: HeartbeatRequest) -> Result<()> {
    let mut txn = server.catalog.start_transaction().await.map_err(Error::from)?;
    if req.shutting_down {
        ManagerRepo::deactivate(&mut *txn, std::slice::from_ref(name))
            .await
            .map_err(Error::from)?;
    } else {
        let stats = HeartbeatStats {
            active_tasks: req.active_tasks,
            active_cores: req.active_cores,
            active_memory: req.active_memory,
            total_cpu_hours: req.total_cpu_hours,
            log: true,
        };
        ManagerRepo::heartbeat(&mut *txn, name, stats).await.map_err(Error::from)?;
    }
    txn.commit().await.map_err(Error::from)?;
    Ok(())
}

/// Claim tasks for a manager (§4.G, §6). Records a `tasks_claimed` counter alongside the
/// catalog's own lifetime counter on the manager row.
pub async fn claim_tasks(server: &FractalServer, req: ClaimRequest) -> Result<Vec<RecordTask>> {
    let mut txn = server.catalog.start_transaction().await.map_err(Error::from)?;
    let claimed = ClaimRepo::claim_tasks(&mut *txn, &req.name, req.limit)
        .await
        .map_err(Error::from)?;
    txn.commit().await.map_err(Error::from)?;

    if !claimed.is_empty() {
        server
            .metrics()
            .register_counter("tasks_claimed", "tasks claimed by managers")
            .recorder(&[])
            .inc(claimed.len() as u64);
    }

    Ok(claimed.into_iter().map(RecordTask::from).collect())
}

/// Apply a batch of manager-reported results (§4.H, §6), then fire a completion notification
/// (§4.K) for every accepted task whose record reached a terminal status this call.
///
/// `results` is keyed by task id rather than record id, matching the wire shape; record ids are
/// resolved from the still-live task rows before `ReturnRepo::update_completed` consumes (and
/// deletes) them, since notification watchers are keyed by record id (§4.K — callers submit and
/// then watch a record, not a task).
pub async fn return_results(
    server: &FractalServer,
    name: &ManagerName,
    results: HashMap<TaskId, TaskResult>,
) -> Result<ReturnOutcome> {
    let mut txn = server.catalog.start_transaction().await.map_err(Error::from)?;

    let mut record_ids = HashMap::with_capacity(results.len());
    let mut outcomes = HashMap::with_capacity(results.len());
    for (task_id, result) in &results {
        if let Some(task) = TaskRepo::get(&mut *txn, *task_id).await.map_err(Error::from)? {
            record_ids.insert(*task_id, task.record_id);
        }
        let status = match result {
            TaskResult::Success(_) => RecordStatus::Complete,
            TaskResult::Failed(_) => RecordStatus::Error,
        };
        outcomes.insert(*task_id, status);
    }

    let metadata = ReturnRepo::update_completed(&mut *txn, name, results)
        .await
        .map_err(Error::from)?;
    txn.commit().await.map_err(Error::from)?;

    let accepted = metadata.accepted_ids.len();
    let rejected = metadata.rejected.len();
    if accepted + rejected > 0 {
        info!(manager = %name, accepted, rejected, "task results returned");
    }

    let counter = server
        .metrics()
        .register_counter("tasks_returned", "task results processed, by outcome");
    if accepted > 0 {
        counter.recorder(&[("outcome", "accepted")]).inc(accepted as u64);
    }
    if rejected > 0 {
        counter.recorder(&[("outcome", "rejected")]).inc(rejected as u64);
    }

    for &task_id in &metadata.accepted_ids {
        if let (Some(record_id), Some(status)) = (record_ids.get(&task_id), outcomes.get(&task_id)) {
            server.notifications.notify(record_id.get(), *status);
        }
    }

    Ok(metadata.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_task_carries_the_claimed_task_shape_unchanged() {
        let claimed = ClaimedTask {
            id: TaskId(1),
            record_id: fractal_types::RecordId(2),
            spec: serde_json::json!({"k": "v"}),
            compute_tag: "default".to_string(),
            required_programs: serde_json::json!({"psi4": null}),
        };
        let task: RecordTask = claimed.clone().into();
        assert_eq!(task.id, claimed.id);
        assert_eq!(task.record_id, claimed.record_id);
        assert_eq!(task.spec, claimed.spec);
    }

    #[test]
    fn return_outcome_maps_accepted_and_rejected() {
        let metadata = TaskReturnMetadata {
            accepted_ids: vec![TaskId(1)],
            rejected: vec![(TaskId(2), "task is not running".to_string())],
        };
        let outcome: ReturnOutcome = metadata.into();
        assert_eq!(outcome.accepted_ids, vec![TaskId(1)]);
        assert_eq!(outcome.rejected_info, vec![(TaskId(2), "task is not running".to_string())]);
    }
}
