//! The claim engine (§4.G): atomic assignment of waiting tasks to a polling manager.
//!
//! This is the one piece of the system where lock discipline is the entire correctness argument
//! (§5, §8 invariants 2–3): `SELECT ... FOR UPDATE` pins the manager row for the duration of the
//! transaction, and `SELECT ... FOR UPDATE SKIP LOCKED` on the task rows is what lets two
//! managers poll concurrently without ever racing onto the same task or blocking behind each
//! other.

use std::collections::HashMap;

use async_trait::async_trait;
use fractal_types::{ManagerName, Record, RecordId, RecordStatus, TaskId};
use observability_deps::tracing::info;

use crate::interface::PostgresTxn;
use crate::record::RecordRepo;
use crate::task::TaskRepo;
use crate::Result;

/// One task handed to a manager by [`ClaimRepo::claim_tasks`] — the `RecordTask` shape from §6,
/// without the full base record.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    pub id: TaskId,
    pub record_id: RecordId,
    pub spec: serde_json::Value,
    pub compute_tag: String,
    pub required_programs: serde_json::Value,
}

#[async_trait]
pub trait ClaimRepo: Send {
    /// Atomically claim up to `limit` tasks for `manager_name`, honoring the manager's tag order
    /// and program containment (§4.G). Raises `Error::Manager{shutdown: true, ..}` if the
    /// manager is unknown or inactive.
    async fn claim_tasks(&mut self, manager_name: &ManagerName, limit: usize) -> Result<Vec<ClaimedTask>>;

    /// Reset all records currently `running` under one of `managers` back to `waiting`, clearing
    /// `manager_name` on both the record and its (already-existing) task row, and preserving
    /// compute history (§4.G cont., §8 "reset in place" policy — see DESIGN.md). Each reset
    /// record's count is reflected in its former manager's `returned` statistic (§4.G cont.).
    /// Returns the number of records reset.
    async fn reset_orphaned(&mut self, managers: &[ManagerName]) -> Result<usize>;

    /// Reset named `error` records back to `waiting`, user-facing (§7). Unlike `reset_orphaned`,
    /// the task row for an errored record was already deleted at completion time (§4.H step 4),
    /// so this creates a fresh one rather than clearing ownership on an existing row; compute
    /// history is untouched either way (§8 "reset in place, preserve history"). Records not
    /// currently in `error` are skipped and reported in the second element of the tuple.
    async fn reset_errored(&mut self, record_ids: &[RecordId]) -> Result<(usize, Vec<RecordId>)>;
}

#[async_trait]
impl ClaimRepo for PostgresTxn {
    async fn claim_tasks(&mut self, manager_name: &ManagerName, limit: usize) -> Result<Vec<ClaimedTask>> {
        // Step 1: pin the manager row for the duration of the transaction. A manager only ever
        // has one outstanding claim call at a time in practice; a plain `FOR UPDATE` serializes
        // the rare case where it doesn't.
        let manager_row = sqlx::query_as::<_, (String, serde_json::Value, serde_json::Value)>(
            r#"SELECT status, tags, programs FROM queue_manager WHERE name = $1 FOR UPDATE"#,
        )
        .bind(manager_name.as_ref())
        .fetch_optional(self.conn())
        .await?;

        let (status, tags_json, programs_json) = manager_row.ok_or_else(|| crate::Error::Manager {
            message: format!("manager {manager_name} is not registered"),
            shutdown: true,
        })?;

        if status != "active" {
            return Err(crate::Error::Manager {
                message: format!("manager {manager_name} is not active"),
                shutdown: true,
            });
        }

        let tags: Vec<String> = serde_json::from_value(tags_json)?;

        let mut claimed = Vec::new();

        // Step 2: walk the manager's tags in priority order, stopping once `limit` is reached.
        // Program containment (`task.required_programs ⊂ manager.programs`, names only — see
        // DESIGN.md) is expressed as: every key of the task's required_programs object is also a
        // key of the manager's programs object, which `jsonb ?&` (key-array containment) answers
        // directly without a subquery per row.
        for tag in &tags {
            let remaining = limit.saturating_sub(claimed.len());
            if remaining == 0 {
                break;
            }

            #[allow(clippy::type_complexity)]
            let rows = sqlx::query_as::<
                _,
                (i64, i64, serde_json::Value, String, serde_json::Value),
            >(
                r#"
                SELECT t.id, t.base_result_id, t.spec, t.compute_tag, t.required_programs
                FROM task_queue t
                JOIN base_record r ON r.id = t.base_result_id
                WHERE r.status = 'waiting'
                  AND ($2 = '*' OR t.compute_tag = $2)
                  AND (
                    SELECT coalesce(array_agg(key), '{}')
                    FROM jsonb_object_keys(t.required_programs) AS key
                  ) <@ (
                    SELECT coalesce(array_agg(key), '{}') FROM jsonb_object_keys($3::jsonb) AS key
                  )
                ORDER BY t.priority DESC, t.created_on ASC
                LIMIT $1
                FOR UPDATE OF t SKIP LOCKED
                "#,
            )
            .bind(remaining as i64)
            .bind(tag)
            .bind(&programs_json)
            .fetch_all(self.conn())
            .await?;

            if rows.is_empty() {
                continue;
            }

            let now = self.now();
            let task_ids: Vec<i64> = rows.iter().map(|r| r.0).collect();
            let record_ids: Vec<i64> = rows.iter().map(|r| r.1).collect();

            sqlx::query(
                r#"
                UPDATE base_record SET status = 'running', manager_name = $2, modified_on = $3
                WHERE id = ANY($1)
                "#,
            )
            .bind(&record_ids)
            .bind(manager_name.as_ref())
            .bind(now.date_time())
            .execute(self.conn())
            .await?;

            sqlx::query(r#"UPDATE task_queue SET manager = $2 WHERE id = ANY($1)"#)
                .bind(&task_ids)
                .bind(manager_name.as_ref())
                .execute(self.conn())
                .await?;

            for (id, record_id, spec, compute_tag, required_programs) in rows {
                claimed.push(ClaimedTask {
                    id: TaskId(id),
                    record_id: RecordId(record_id),
                    spec,
                    compute_tag,
                    required_programs,
                });
            }
        }

        // Step 3: bump the manager's lifetime claimed counter.
        if !claimed.is_empty() {
            sqlx::query(r#"UPDATE queue_manager SET claimed = claimed + $2 WHERE name = $1"#)
                .bind(manager_name.as_ref())
                .bind(claimed.len() as i64)
                .execute(self.conn())
                .await?;
            info!(manager = %manager_name, count = claimed.len(), "tasks claimed");
        }

        Ok(claimed)
    }

    async fn reset_orphaned(&mut self, managers: &[ManagerName]) -> Result<usize> {
        if managers.is_empty() {
            return Ok(0);
        }
        let now = self.now();
        let raw: Vec<&str> = managers.iter().map(|m| m.as_ref()).collect();

        // Pin the affected rows (and capture which manager owned each) before the reset
        // overwrites `manager_name`; `UPDATE ... RETURNING` only ever sees the post-update row.
        let affected = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT id, manager_name FROM base_record
            WHERE status = 'running' AND manager_name = ANY($1)
            FOR UPDATE
            "#,
        )
        .bind(&raw)
        .fetch_all(self.conn())
        .await?;

        if affected.is_empty() {
            return Ok(0);
        }

        let record_ids: Vec<i64> = affected.iter().map(|(id, _)| *id).collect();

        sqlx::query(
            r#"
            UPDATE base_record
            SET status = 'waiting', manager_name = NULL, modified_on = $2
            WHERE id = ANY($1)
            "#,
        )
        .bind(&record_ids)
        .bind(now.date_time())
        .execute(self.conn())
        .await?;

        sqlx::query(r#"UPDATE task_queue SET manager = NULL WHERE base_result_id = ANY($1)"#)
            .bind(&record_ids)
            .execute(self.conn())
            .await?;

        let mut per_manager: HashMap<String, i64> = HashMap::new();
        for (_, manager_name) in &affected {
            *per_manager.entry(manager_name.clone()).or_insert(0) += 1;
        }
        for (manager_name, count) in &per_manager {
            sqlx::query(r#"UPDATE queue_manager SET returned = returned + $2 WHERE name = $1"#)
                .bind(manager_name)
                .bind(count)
                .execute(self.conn())
                .await?;
        }

        info!(count = record_ids.len(), "orphaned tasks reset to waiting");

        Ok(record_ids.len())
    }

    async fn reset_errored(&mut self, record_ids: &[RecordId]) -> Result<(usize, Vec<RecordId>)> {
        let mut reset = 0;
        let mut skipped = Vec::new();

        for &record_id in record_ids {
            let record = RecordRepo::get(self, vec![record_id], true).await?.into_iter().next().flatten();
            let Some(record) = record else {
                skipped.push(record_id);
                continue;
            };
            if record.base().status != RecordStatus::Error {
                skipped.push(record_id);
                continue;
            }

            if !record.base().is_service {
                let (spec_json, required_programs) = match &record {
                    Record::Singlepoint(r) => (
                        serde_json::to_value(&r.specification)?,
                        r.specification.required_programs(),
                    ),
                    Record::Optimization(r) => (
                        serde_json::to_value(&r.specification)?,
                        r.specification.required_programs(),
                    ),
                    Record::Manybody(r) => (
                        serde_json::to_value(&r.specification)?,
                        r.specification.required_programs(),
                    ),
                    _ => {
                        skipped.push(record_id);
                        continue;
                    }
                };
                TaskRepo::create(
                    self,
                    record_id,
                    spec_json,
                    record.base().tag.clone(),
                    required_programs,
                    record.base().priority,
                )
                .await?;
            }

            RecordRepo::update_status(self, record_id, RecordStatus::Waiting).await?;
            reset += 1;
        }

        if reset > 0 {
            info!(count = reset, "errored records reset to waiting");
        }

        Ok((reset, skipped))
    }
}
