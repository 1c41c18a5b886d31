//! The return engine (§4.H): a manager reports finished (or failed) tasks, one savepoint each.
//!
//! Only [`fractal_types::RecordType`] variants that are not services ever have a task of their
//! own to return against — singlepoint, optimization, manybody (§4.D; the four service types
//! decompose into those, and the service engine drives them, not a manager). Each gets its own
//! specialized completion handler below, as the original's per-procedure dispatch does.

use std::collections::HashMap;

use async_trait::async_trait;
use fractal_types::{
    ComputeHistoryRow, ManagerName, Molecule, OptimizationRecord, Record, RecordId, RecordStatus,
    SinglepointRecord, TaskId, TaskReturnMetadata,
};
use observability_deps::tracing::{error, warn};

use crate::interface::PostgresTxn;
use crate::molecule::MoleculeRepo;
use crate::output_store::OutputStoreRepo;
use crate::record::RecordRepo;
use crate::task::TaskRepo;
use crate::Result;

/// One optimization trajectory step, as reported by a manager.
#[derive(Debug, Clone)]
pub struct TrajectoryStep {
    pub molecule: Molecule,
    pub properties: Option<serde_json::Value>,
    pub return_result: Option<serde_json::Value>,
    pub energy: f64,
}

/// A successful compute result (§4.H step 4, "Success with a recognized kind").
#[derive(Debug, Clone)]
pub struct SuccessResult {
    pub properties: Option<serde_json::Value>,
    pub return_result: Option<serde_json::Value>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Non-empty only for an optimization record's completion.
    pub trajectory: Vec<TrajectoryStep>,
    /// The optimized geometry, for an optimization record's completion.
    pub final_molecule: Option<Molecule>,
    pub provenance: serde_json::Value,
}

/// A failed compute result (§4.H step 4, `FailedOperation`).
#[derive(Debug, Clone)]
pub struct FailedOperation {
    pub error: serde_json::Value,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

#[derive(Debug, Clone)]
pub enum TaskResult {
    Success(SuccessResult),
    Failed(FailedOperation),
}

#[async_trait]
pub trait ReturnRepo: Send {
    /// Apply a batch of manager-reported results (§4.H). Each task is processed under its own
    /// savepoint so one bad result can't lose the manager lock or the other results in the same
    /// call; rejected tasks leave their record untouched.
    async fn update_completed(
        &mut self,
        manager_name: &ManagerName,
        results: HashMap<TaskId, TaskResult>,
    ) -> Result<TaskReturnMetadata>;
}

#[async_trait]
impl ReturnRepo for PostgresTxn {
    async fn update_completed(
        &mut self,
        manager_name: &ManagerName,
        results: HashMap<TaskId, TaskResult>,
    ) -> Result<TaskReturnMetadata> {
        // Step 1: pin the manager row; it must be active to submit results at all.
        let status: Option<(String,)> =
            sqlx::query_as(r#"SELECT status FROM queue_manager WHERE name = $1 FOR UPDATE"#)
                .bind(manager_name.as_ref())
                .fetch_optional(self.conn())
                .await?;
        match status {
            None => {
                return Err(crate::Error::Manager {
                    message: format!("manager {manager_name} is not registered"),
                    shutdown: true,
                })
            }
            Some((s,)) if s != "active" => {
                return Err(crate::Error::Manager {
                    message: format!("manager {manager_name} is not active"),
                    shutdown: true,
                })
            }
            Some(_) => {}
        }

        let mut metadata = TaskReturnMetadata::default();
        let mut completed = 0i64;
        let mut failures = 0i64;

        for (task_id, result) in results {
            let savepoint = format!("ret_{}", task_id.get());
            sqlx::query(&format!("SAVEPOINT {savepoint}"))
                .execute(self.conn())
                .await?;

            match process_one(self, manager_name, task_id, result).await {
                Ok(outcome) => {
                    sqlx::query(&format!("RELEASE SAVEPOINT {savepoint}"))
                        .execute(self.conn())
                        .await?;
                    if outcome.succeeded {
                        completed += 1;
                    } else {
                        failures += 1;
                    }
                    metadata.accepted_ids.push(task_id);
                }
                Err(reject_reason) => {
                    sqlx::query(&format!("ROLLBACK TO SAVEPOINT {savepoint}"))
                        .execute(self.conn())
                        .await?;
                    warn!(task = %task_id, reason = %reject_reason, "task result rejected");
                    metadata.rejected.push((task_id, reject_reason));
                }
            }
        }

        sqlx::query(r#"UPDATE queue_manager SET completed = completed + $2, failures = failures + $3, returned = returned + $4 WHERE name = $1"#)
            .bind(manager_name.as_ref())
            .bind(completed)
            .bind(failures)
            .bind(completed + failures)
            .execute(self.conn())
            .await?;

        Ok(metadata)
    }
}

struct Outcome {
    succeeded: bool,
}

/// Runs steps 2–4 of §4.H for one task. `Err` means "reject the task" (consistency check failed,
/// or something inside step 4 raised — caught here and turned into the same outcome step 5
/// describes: an internal failure recorded against the record, not a rejection of the call).
async fn process_one(
    txn: &mut PostgresTxn,
    manager_name: &ManagerName,
    task_id: TaskId,
    result: TaskResult,
) -> std::result::Result<Outcome, String> {
    let task = TaskRepo::get(txn, task_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "task not found".to_string())?;

    let record_id = task.record_id;
    let record = RecordRepo::get(txn, vec![record_id], true)
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| "record not found".to_string())?;

    let base = record.base();
    if base.status != RecordStatus::Running {
        return Err("task is not running".to_string());
    }
    if base.manager_name.as_deref() != Some(manager_name.as_ref()) {
        return Err("task is claimed by another manager".to_string());
    }

    let outcome = match apply_result(txn, record, result).await {
        Ok(succeeded) => succeeded,
        Err(e) => {
            error!(task = %task_id, record = %record_id, error = %e, "internal failure applying task result");
            let failed = FailedOperation {
                error: serde_json::json!({"error_type": "internal_fractal_error", "error_message": e.to_string()}),
                stdout: None,
                stderr: None,
            };
            let record = RecordRepo::get(txn, vec![record_id], true)
                .await
                .map_err(|e| e.to_string())?
                .into_iter()
                .next()
                .flatten()
                .ok_or_else(|| "record not found".to_string())?;
            apply_failure(txn, record, failed).await.map_err(|e| e.to_string())?;
            false
        }
    };

    TaskRepo::delete(txn, task_id).await.map_err(|e| e.to_string())?;
    Ok(Outcome { succeeded: outcome })
}

/// Returns `Ok(true)` on success, `Ok(false)` on a reported `FailedOperation`.
async fn apply_result(txn: &mut PostgresTxn, record: Record, result: TaskResult) -> Result<bool> {
    match result {
        TaskResult::Failed(failed) => {
            apply_failure(txn, record, failed).await?;
            Ok(false)
        }
        TaskResult::Success(success) => {
            apply_success(txn, record, success).await?;
            Ok(true)
        }
    }
}

async fn apply_failure(txn: &mut PostgresTxn, mut record: Record, failed: FailedOperation) -> Result<()> {
    let error_id = store_optional_output(txn, fractal_types::OutputType::Error, failed.error.to_string().into_bytes()).await?;
    let stdout_id = store_optional_text(txn, fractal_types::OutputType::Stdout, failed.stdout).await?;
    let stderr_id = store_optional_text(txn, fractal_types::OutputType::Stderr, failed.stderr).await?;

    let now = txn.now();
    {
        let base = record.base_mut();
        base.status = RecordStatus::Error;
        base.stdout = stdout_id.or(base.stdout);
        base.stderr = stderr_id.or(base.stderr);
        base.error = error_id;
        base.compute_history.push(ComputeHistoryRow {
            record_id: base.id.unwrap_or(RecordId(0)),
            status: RecordStatus::Error,
            manager_name: base.manager_name.clone(),
            modified_on: now,
            provenance: serde_json::json!({}),
            outputs: error_id.into_iter().collect(),
        });
    }
    RecordRepo::replace_payload(txn, record.base().id.expect("record has id"), record).await
}

async fn apply_success(txn: &mut PostgresTxn, record: Record, success: SuccessResult) -> Result<()> {
    match record {
        Record::Singlepoint(sp) => apply_singlepoint_success(txn, sp, success).await,
        Record::Optimization(opt) => apply_optimization_success(txn, opt, success).await,
        Record::Manybody(mb) => apply_manybody_success(txn, mb, success).await,
        other => Err(crate::Error::Unsupported {
            detail: format!("{:?} records have no direct task to complete", other.record_type()),
        }),
    }
}

async fn apply_singlepoint_success(
    txn: &mut PostgresTxn,
    mut sp: SinglepointRecord,
    success: SuccessResult,
) -> Result<()> {
    let stdout_id = store_optional_text(txn, fractal_types::OutputType::Stdout, success.stdout).await?;
    let stderr_id = store_optional_text(txn, fractal_types::OutputType::Stderr, success.stderr).await?;

    sp.properties = success.properties;
    sp.return_result = success.return_result;

    finalize_base(&mut sp.base, stdout_id, stderr_id, success.provenance, txn.now());
    RecordRepo::replace_payload(txn, sp.base.id.expect("record has id"), Record::Singlepoint(sp)).await
}

async fn apply_optimization_success(
    txn: &mut PostgresTxn,
    mut opt: OptimizationRecord,
    success: SuccessResult,
) -> Result<()> {
    let stdout_id = store_optional_text(txn, fractal_types::OutputType::Stdout, success.stdout).await?;
    let stderr_id = store_optional_text(txn, fractal_types::OutputType::Stderr, success.stderr).await?;

    if let Some(final_molecule) = success.final_molecule {
        let (_meta, ids) = MoleculeRepo::insert(txn, vec![final_molecule]).await?;
        opt.final_molecule_id = ids.into_iter().next().flatten();
    }

    // Trajectory steps are themselves deduplicated singlepoint records (§4.H "Optimization
    // completion additionally").
    let mut trajectory = Vec::with_capacity(success.trajectory.len());
    let mut energies = Vec::with_capacity(success.trajectory.len());
    for step in success.trajectory {
        let (_meta, molecule_ids) = MoleculeRepo::insert(txn, vec![step.molecule]).await?;
        let molecule_id = molecule_ids
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| crate::Error::Unsupported {
                detail: "trajectory step molecule insert returned no id".to_string(),
            })?;

        let now = txn.now();
        let child = fractal_types::SinglepointRecord {
            base: fractal_types::BaseRecord {
                id: None,
                record_type: fractal_types::RecordType::Singlepoint,
                status: RecordStatus::Complete,
                manager_name: None,
                created_on: now,
                modified_on: now,
                owner: opt.base.owner.clone(),
                extras: serde_json::json!({}),
                provenance: serde_json::json!({}),
                compute_history: Vec::new(),
                comments: Vec::new(),
                stdout: None,
                stderr: None,
                error: None,
                is_service: false,
                tag: opt.base.tag.clone(),
                priority: opt.base.priority,
            },
            specification: opt.specification.clone(),
            molecule_id,
            properties: step.properties,
            return_result: step.return_result,
        };
        let ids = RecordRepo::insert(txn, vec![(Record::Singlepoint(child), None)]).await?;
        let child_id = ids.into_iter().next().expect("one id per insert");
        trajectory.push(child_id);
        energies.push(step.energy);
    }
    opt.trajectory = trajectory;
    opt.energies = energies;

    finalize_base(&mut opt.base, stdout_id, stderr_id, success.provenance, txn.now());
    RecordRepo::replace_payload(txn, opt.base.id.expect("record has id"), Record::Optimization(opt)).await
}

async fn apply_manybody_success(
    txn: &mut PostgresTxn,
    mut mb: fractal_types::ManybodyRecord,
    success: SuccessResult,
) -> Result<()> {
    let stdout_id = store_optional_text(txn, fractal_types::OutputType::Stdout, success.stdout).await?;
    let stderr_id = store_optional_text(txn, fractal_types::OutputType::Stderr, success.stderr).await?;
    mb.results = success.properties;
    finalize_base(&mut mb.base, stdout_id, stderr_id, success.provenance, txn.now());
    RecordRepo::replace_payload(txn, mb.base.id.expect("record has id"), Record::Manybody(mb)).await
}

fn finalize_base(
    base: &mut fractal_types::BaseRecord,
    stdout_id: Option<fractal_types::OutputStoreId>,
    stderr_id: Option<fractal_types::OutputStoreId>,
    provenance: serde_json::Value,
    now: fractal_time::Time,
) {
    base.status = RecordStatus::Complete;
    base.stdout = stdout_id.or(base.stdout);
    base.stderr = stderr_id.or(base.stderr);
    base.provenance = provenance.clone();
    base.compute_history.push(ComputeHistoryRow {
        record_id: base.id.unwrap_or(RecordId(0)),
        status: RecordStatus::Complete,
        manager_name: base.manager_name.clone(),
        modified_on: now,
        provenance,
        outputs: stdout_id.into_iter().chain(stderr_id).collect(),
    });
    base.modified_on = now;
}

async fn store_optional_text(
    txn: &mut PostgresTxn,
    output_type: fractal_types::OutputType,
    text: Option<String>,
) -> Result<Option<fractal_types::OutputStoreId>> {
    match text {
        Some(s) => store_optional_output(txn, output_type, s.into_bytes()).await,
        None => Ok(None),
    }
}

async fn store_optional_output(
    txn: &mut PostgresTxn,
    output_type: fractal_types::OutputType,
    data: Vec<u8>,
) -> Result<Option<fractal_types::OutputStoreId>> {
    let id = OutputStoreRepo::insert(
        txn,
        output_type,
        fractal_types::CompressionAlgorithm::Zstd,
        crate::output_store::DEFAULT_COMPRESSION_LEVEL,
        &data,
    )
    .await?;
    Ok(Some(id))
}
