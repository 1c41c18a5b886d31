//! The `iterate` driver (§4.I) and the periodic runner's `service_tick` entry point (§4.J).
//!
//! Each record gets its own transaction, the same isolation `fractal_catalog`'s claim and return
//! engines give each manager call (§5: "each incoming request runs on an independent execution
//! context") — one service stalling partway through a tick must not hold a lock across, or roll
//! back progress already made on, any other service in the same batch.

use fractal_catalog::interface::Transaction;
use fractal_catalog::molecule::MoleculeRepo;
use fractal_catalog::record::RecordRepo;
use fractal_catalog::service::ServiceRepo;
use fractal_catalog::task::TaskRepo;
use fractal_catalog::{Catalog, ClockRepo};
use fractal_types::{
    BaseRecord, ComputeHistoryRow, Molecule, MoleculeId, Record, RecordId, RecordStatus,
    RecordType, ServiceDependency,
};
use observability_deps::tracing::{error, info};
use std::collections::HashMap;
use tracker::CompletionRegistry;

use crate::model::{CompletedChild, NewChild, NewChildKind, StepOutcome};
use crate::{gridoptimization, neb, reaction, torsiondrive, Error, Result};

/// What one `iterate` call decided for a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Dependencies outstanding; nothing to do this tick.
    Waiting,
    /// A new batch of children was submitted, or `service_state` otherwise advanced.
    Progressed,
    /// The record reached `complete`.
    Completed,
    /// The record reached `error` because a child errored.
    Errored,
}

/// Tallies from one `service_tick` batch (§4.J), logged by the periodic runner.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickSummary {
    pub waiting: usize,
    pub progressed: usize,
    pub completed: usize,
    pub errored: usize,
    /// Ticks that failed outright (storage error, malformed state) and were rolled back; the
    /// record is left exactly as it was and will be retried next tick.
    pub failed: usize,
}

/// Run one `service_tick` (§4.J): select up to `limit` services, backfilling `waiting` ones into
/// `running` slots, and iterate each in its own transaction.
///
/// `notifications` is the completion-hook registry (§4.K): once a record's transaction commits
/// with an outcome of `complete` or `error`, `notify` fires on it so a caller blocked in
/// `watch(record_id)` wakes on the same tick the record's row changed, not some later poll.
pub async fn run_tick(
    catalog: &dyn Catalog,
    limit: usize,
    notifications: &CompletionRegistry<RecordStatus>,
) -> Result<TickSummary> {
    let mut listing = catalog.start_transaction().await.map_err(Error::from)?;
    let ids = ServiceRepo::list_for_tick(&mut *listing, limit)
        .await
        .map_err(Error::from)?;
    listing.commit().await.map_err(Error::from)?;

    let mut summary = TickSummary::default();
    for record_id in ids {
        let mut txn = match catalog.start_transaction().await {
            Ok(txn) => txn,
            Err(source) => {
                error!(record = %record_id, %source, "failed to open transaction for service tick");
                summary.failed += 1;
                continue;
            }
        };

        match iterate(&mut *txn, record_id).await {
            Ok(outcome) => {
                if let Err(source) = txn.commit().await {
                    error!(record = %record_id, %source, "failed to commit service tick");
                    summary.failed += 1;
                    continue;
                }
                match outcome {
                    Outcome::Waiting => summary.waiting += 1,
                    Outcome::Progressed => summary.progressed += 1,
                    Outcome::Completed => {
                        summary.completed += 1;
                        notifications.notify(record_id.get(), RecordStatus::Complete);
                    }
                    Outcome::Errored => {
                        summary.errored += 1;
                        notifications.notify(record_id.get(), RecordStatus::Error);
                    }
                }
            }
            Err(err) => {
                error!(record = %record_id, error = %err, "service iteration failed, rolling back");
                let _ = txn.abort().await;
                summary.failed += 1;
            }
        }
    }

    if summary.progressed + summary.completed + summary.errored > 0 {
        info!(
            progressed = summary.progressed,
            completed = summary.completed,
            errored = summary.errored,
            "service tick"
        );
    }

    Ok(summary)
}

/// Run one tick of `iterate(service)` (§4.I) against a single record, inside an already-open
/// transaction.
pub async fn iterate(txn: &mut dyn Transaction, record_id: RecordId) -> Result<Outcome> {
    let mut record = RecordRepo::get(txn, vec![record_id], false)
        .await
        .map_err(Error::from)?
        .into_iter()
        .next()
        .flatten()
        .expect("missing_ok=false guarantees Some");

    if !record.record_type().is_service() {
        return Err(Error::NotAService { record_id });
    }

    // First tick: waiting -> running (§4.I).
    if record.base().status == RecordStatus::Waiting {
        RecordRepo::update_status(txn, record_id, RecordStatus::Running)
            .await
            .map_err(Error::from)?;
        record.base_mut().status = RecordStatus::Running;
    }

    let dependencies = ServiceRepo::get_dependencies(txn, record_id)
        .await
        .map_err(Error::from)?;

    let completed = if dependencies.is_empty() {
        None
    } else {
        match collect_completed(txn, &dependencies).await? {
            Some(children) => Some(children),
            None => return Ok(Outcome::Waiting),
        }
    };

    if let Some(children) = &completed {
        // a cancelled child is treated the same as an errored one: the service cannot proceed
        // without it, and outstanding siblings are not transitively cancelled here (§9 open
        // question), they simply become orphaned dependency rows cleaned up by `ServiceRepo::remove`.
        if let Some(failure) = children.iter().find(|c| !matches!(c.status, RecordStatus::Complete)) {
            let failure = failure.clone();
            mark_errored(txn, record, &failure).await?;
            return Ok(Outcome::Errored);
        }
    }

    let molecules = resolve_reference_molecules(txn, &record).await?;
    let step = dispatch(&mut record, completed.as_deref(), &molecules)?;

    match step {
        StepOutcome::Submit(children) => {
            let base = record.base().clone();
            let deps = submit_children(txn, &base, children).await?;
            apply_child_ids(&mut record, &deps)?;
            ServiceRepo::replace_dependencies(txn, record_id, deps)
                .await
                .map_err(Error::from)?;
            sync_state_and_persist(txn, &mut record).await?;
            Ok(Outcome::Progressed)
        }
        StepOutcome::Done => {
            let now = txn.now();
            {
                let base = record.base_mut();
                base.status = RecordStatus::Complete;
                base.modified_on = now;
                base.compute_history.push(ComputeHistoryRow {
                    record_id: base.id.unwrap_or(RecordId(0)),
                    status: RecordStatus::Complete,
                    manager_name: None,
                    modified_on: now,
                    provenance: serde_json::json!({}),
                    outputs: Vec::new(),
                });
            }
            sync_state_and_persist(txn, &mut record).await?;
            ServiceRepo::remove(txn, record_id).await.map_err(Error::from)?;
            Ok(Outcome::Completed)
        }
    }
}

fn dispatch(
    record: &mut Record,
    completed: Option<&[CompletedChild]>,
    molecules: &HashMap<MoleculeId, Molecule>,
) -> Result<StepOutcome> {
    match (record, completed) {
        (Record::Torsiondrive(r), None) => torsiondrive::initial(r, molecules),
        (Record::Torsiondrive(r), Some(c)) => torsiondrive::advance(r, c, molecules),
        (Record::Gridoptimization(r), None) => gridoptimization::initial(r, molecules),
        (Record::Gridoptimization(r), Some(c)) => gridoptimization::advance(r, c, molecules),
        (Record::Reaction(r), None) => reaction::initial(r, molecules),
        (Record::Reaction(r), Some(c)) => reaction::advance(r, c, molecules),
        (Record::Neb(r), None) => neb::initial(r, molecules),
        (Record::Neb(r), Some(c)) => neb::advance(r, c, molecules),
        (other, _) => unreachable!(
            "non-service record type {:?} filtered out by iterate's is_service() check",
            other.record_type()
        ),
    }
}

/// Resolve every molecule a record's algorithm needs by id but does not receive as part of a
/// [`CompletedChild`] — the fixed "reference" geometries a service was submitted with (initial
/// molecules, scan starting point, reaction components, NEB chain endpoints).
async fn resolve_reference_molecules(
    txn: &mut dyn Transaction,
    record: &Record,
) -> Result<HashMap<MoleculeId, Molecule>> {
    let ids: Vec<MoleculeId> = match record {
        Record::Torsiondrive(r) => r.initial_molecules.clone(),
        Record::Gridoptimization(r) => vec![r.starting_molecule_id],
        Record::Reaction(r) => r.components.iter().map(|c| c.molecule_id).collect(),
        Record::Neb(r) => r.initial_chain.clone(),
        _ => Vec::new(),
    };
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let found = MoleculeRepo::get(txn, ids.clone(), false)
        .await
        .map_err(Error::from)?;
    Ok(ids
        .into_iter()
        .zip(found.into_iter())
        .filter_map(|(id, m)| m.map(|m| (id, m)))
        .collect())
}

/// Fold a just-submitted batch's assigned record ids back into the record's own typed child
/// tracking (`optimizations`, `components[i].{singlepoint,optimization}_id`, `iterations`) —
/// `service_queue_tasks` tracks *that* a child is pending, these fields track *what it is* in the
/// shape each algorithm's result structure expects. Key formats are each algorithm module's own
/// convention:
/// - torsiondrive/gridoptimization: `key` is the grid-point string verbatim.
/// - reaction: `key` is `"{component index}:singlepoint"` or `"{component index}:optimization"`.
/// - neb: `key` is `"{iteration index}:{image index}"`.
fn apply_child_ids(record: &mut Record, deps: &[ServiceDependency]) -> Result<()> {
    let record_id = record.base().id.expect("record has id");
    let malformed = |detail: String| Error::MalformedState { record_id, detail };

    match record {
        Record::Torsiondrive(r) => {
            for dep in deps {
                r.optimizations.insert(dep.key.clone(), dep.child_record_id);
            }
        }
        Record::Gridoptimization(r) => {
            for dep in deps {
                r.optimizations.insert(dep.key.clone(), dep.child_record_id);
            }
        }
        Record::Reaction(r) => {
            for dep in deps {
                let (index, kind) = dep
                    .key
                    .split_once(':')
                    .ok_or_else(|| malformed(format!("reaction child key {:?}", dep.key)))?;
                let index: usize = index
                    .parse()
                    .map_err(|_| malformed(format!("reaction child key {:?}", dep.key)))?;
                let component = r
                    .components
                    .get_mut(index)
                    .ok_or_else(|| malformed(format!("reaction component {index} out of range")))?;
                match kind {
                    "singlepoint" => component.singlepoint_id = Some(dep.child_record_id),
                    "optimization" => component.optimization_id = Some(dep.child_record_id),
                    other => return Err(malformed(format!("unknown reaction child kind {other:?}"))),
                }
            }
        }
        Record::Neb(r) => {
            for dep in deps {
                // the terminal TS optimization submits under an opaque key with no round/image
                // pair; it has no typed slot of its own until it completes (`neb::advance` sets
                // `ts_optimization_id` directly from the `CompletedChild`).
                let Some((iteration, image)) = dep.key.split_once(':') else {
                    continue;
                };
                let iteration: usize = iteration
                    .parse()
                    .map_err(|_| malformed(format!("neb child key {:?}", dep.key)))?;
                let image: usize = image
                    .parse()
                    .map_err(|_| malformed(format!("neb child key {:?}", dep.key)))?;
                while r.iterations.len() <= iteration {
                    r.iterations.push(fractal_types::NebIteration {
                        singlepoints: Default::default(),
                    });
                }
                r.iterations[iteration].singlepoints.insert(image, dep.child_record_id);
            }
        }
        other => {
            return Err(Error::NotAService {
                record_id: other.base().id.unwrap_or(record_id),
            })
        }
    }
    Ok(())
}

/// Fetch every dependency's current record; `None` if any is still `{waiting, running}`.
async fn collect_completed(
    txn: &mut dyn Transaction,
    dependencies: &[ServiceDependency],
) -> Result<Option<Vec<CompletedChild>>> {
    let ids: Vec<RecordId> = dependencies.iter().map(|d| d.child_record_id).collect();
    let records = RecordRepo::get(txn, ids, false).await.map_err(Error::from)?;

    let mut out = Vec::with_capacity(dependencies.len());
    for (dep, record) in dependencies.iter().zip(records.into_iter()) {
        let record = record.expect("missing_ok=false guarantees Some");
        let status = record.base().status;
        if !status.is_terminal() {
            return Ok(None);
        }

        let (energy, final_molecule, final_molecule_id, properties) = match &record {
            Record::Singlepoint(sp) => (
                sp.return_result.as_ref().and_then(|v| v.as_f64()),
                None,
                None,
                sp.properties.clone(),
            ),
            Record::Optimization(opt) => {
                let energy = opt.energies.last().copied();
                let final_molecule = match opt.final_molecule_id {
                    Some(mid) => MoleculeRepo::get(txn, vec![mid], true)
                        .await
                        .map_err(Error::from)?
                        .into_iter()
                        .next()
                        .flatten(),
                    None => None,
                };
                (energy, final_molecule, opt.final_molecule_id, None)
            }
            _ => (None, None, None, None),
        };

        out.push(CompletedChild {
            key: dep.key.clone(),
            position: dep.position,
            extras: dep.extras.clone(),
            record_id: dep.child_record_id,
            status,
            energy,
            final_molecule,
            final_molecule_id,
            properties,
        });
    }

    out.sort_by_key(|c| c.position);
    Ok(Some(out))
}

/// Insert a batch of new children (§4.I: "submit child records+tasks via the standard insert
/// path"), one record + one task each, and return the dependency rows that track them.
async fn submit_children(
    txn: &mut dyn Transaction,
    parent: &BaseRecord,
    children: Vec<NewChild>,
) -> Result<Vec<ServiceDependency>> {
    let now = txn.now();
    let mut deps = Vec::with_capacity(children.len());

    for child in children {
        let (specification, record) = match child.kind {
            NewChildKind::Singlepoint {
                specification,
                molecule,
            } => {
                let molecule_id = dedup_molecule(txn, molecule).await?;
                let base = new_child_base(now, parent, RecordType::Singlepoint);
                (
                    specification.clone(),
                    Record::Singlepoint(fractal_types::SinglepointRecord {
                        base,
                        specification,
                        molecule_id,
                        properties: None,
                        return_result: None,
                    }),
                )
            }
            NewChildKind::Optimization {
                specification,
                initial_molecule,
            } => {
                let molecule_id = dedup_molecule(txn, initial_molecule).await?;
                let base = new_child_base(now, parent, RecordType::Optimization);
                (
                    specification.clone(),
                    Record::Optimization(fractal_types::OptimizationRecord {
                        base,
                        specification,
                        initial_molecule_id: molecule_id,
                        final_molecule_id: None,
                        trajectory: Vec::new(),
                        energies: Vec::new(),
                    }),
                )
            }
        };

        let spec_json = serde_json::to_value(&specification).map_err(|source| {
            Error::MalformedState {
                record_id: parent.id.unwrap_or(RecordId(0)),
                detail: source.to_string(),
            }
        })?;

        let ids = RecordRepo::insert(txn, vec![(record, None)])
            .await
            .map_err(Error::from)?;
        let record_id = ids.into_iter().next().expect("one id per insert");

        TaskRepo::create(
            txn,
            record_id,
            spec_json,
            parent.tag.clone(),
            specification.required_programs(),
            parent.priority,
        )
        .await
        .map_err(Error::from)?;

        deps.push(ServiceDependency {
            child_record_id: record_id,
            key: child.key,
            position: child.position,
            extras: child.extras,
        });
    }

    Ok(deps)
}

async fn dedup_molecule(txn: &mut dyn Transaction, molecule: Molecule) -> Result<MoleculeId> {
    let (_meta, ids) = MoleculeRepo::insert(txn, vec![molecule])
        .await
        .map_err(Error::from)?;
    ids.into_iter()
        .next()
        .flatten()
        .ok_or_else(|| Error::MalformedState {
            record_id: RecordId(0),
            detail: "molecule insert returned no id".to_string(),
        })
}

fn new_child_base(now: fractal_time::Time, parent: &BaseRecord, record_type: RecordType) -> BaseRecord {
    BaseRecord {
        id: None,
        record_type,
        status: RecordStatus::Waiting,
        manager_name: None,
        created_on: now,
        modified_on: now,
        owner: parent.owner.clone(),
        extras: serde_json::json!({}),
        provenance: serde_json::json!({}),
        compute_history: Vec::new(),
        comments: Vec::new(),
        stdout: None,
        stderr: None,
        error: None,
        is_service: false,
        tag: parent.tag.clone(),
        priority: parent.priority,
    }
}

async fn mark_errored(
    txn: &mut dyn Transaction,
    mut record: Record,
    failure: &CompletedChild,
) -> Result<()> {
    let now = txn.now();
    let record_id = record.base().id.expect("record has id");
    {
        let base = record.base_mut();
        base.status = RecordStatus::Error;
        base.modified_on = now;
        base.compute_history.push(ComputeHistoryRow {
            record_id: base.id.unwrap_or(RecordId(0)),
            status: RecordStatus::Error,
            manager_name: None,
            modified_on: now,
            provenance: serde_json::json!({
                "failed_child_record_id": failure.record_id.get(),
                "failed_child_key": failure.key,
            }),
            outputs: Vec::new(),
        });
    }
    RecordRepo::replace_payload(txn, record_id, record)
        .await
        .map_err(Error::from)?;
    ServiceRepo::remove(txn, record_id).await.map_err(Error::from)?;
    Ok(())
}

/// Mirror the record's own `service_state` into the `service_queue` row (see `service.rs`'s
/// module doc) and persist the full record payload.
async fn sync_state_and_persist(txn: &mut dyn Transaction, record: &mut Record) -> Result<()> {
    let record_id = record.base().id.expect("record has id");
    let now = txn.now();
    record.base_mut().modified_on = now;

    let service_state = match record {
        Record::Torsiondrive(r) => r.service_state.clone(),
        Record::Gridoptimization(r) => r.service_state.clone(),
        Record::Reaction(r) => r.service_state.clone(),
        Record::Neb(r) => r.service_state.clone(),
        _ => serde_json::Value::Null,
    };
    ServiceRepo::update_state(txn, record_id, service_state)
        .await
        .map_err(Error::from)?;

    RecordRepo::replace_payload(txn, record_id, record.clone())
        .await
        .map_err(Error::from)?;
    Ok(())
}
