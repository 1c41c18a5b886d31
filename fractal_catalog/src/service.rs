//! The service queue (§4.I, §6 `service_queue`/`service_queue_tasks`): scheduling state and
//! dependency bookkeeping for records driven by the service engine rather than by a manager.
//!
//! `service_queue` mirrors `task_queue`'s role for ordinary records: one row per service record
//! while it is `{waiting, running}`, carrying the compute tag/priority the periodic runner
//! schedules ticks by. Its `service_state` column is the same JSON blob the record's own
//! specialization also carries (§3) — duplicated the way `base_record`'s indexed columns
//! duplicate `record_json` (see `record.rs`): the engine reads/writes it here on every tick
//! without deserializing the full record, and the two are kept in lockstep by always writing
//! both in the same transaction. `service_queue_tasks` is the generic, per-tick dependency list
//! described in `SPEC_FULL.md`'s supplemented features.

use async_trait::async_trait;
use fractal_types::{Priority, RecordId, ServiceDependency, ServiceQueueEntry};

use crate::interface::PostgresTxn;
use crate::Result;

/// Service queue storage.
#[async_trait]
pub trait ServiceRepo: Send {
    /// Enroll a newly submitted service record. Called once, alongside the record insert, when a
    /// service record is first created in `waiting` (§4.I).
    async fn enroll(
        &mut self,
        record_id: RecordId,
        compute_tag: String,
        priority: Priority,
        service_state: serde_json::Value,
    ) -> Result<()>;

    /// Fetch a service's current `service_state`.
    async fn get_state(&mut self, record_id: RecordId) -> Result<Option<serde_json::Value>>;

    /// Overwrite `service_state` after an iteration mutates it (§4.I: "explicitly flag the JSON
    /// column as modified, since nested mutation is not auto-tracked by the storage layer" — in
    /// this layer that just means always issuing the `UPDATE`, never relying on an ORM's dirty
    /// tracking).
    async fn update_state(&mut self, record_id: RecordId, service_state: serde_json::Value) -> Result<()>;

    /// Select up to `limit` services for this tick (§4.J `service_tick`): every currently
    /// `running` service, then `waiting` services backfilled in priority/FIFO order to fill the
    /// remaining slots. The engine's `iterate` is responsible for actually flipping a
    /// backfilled service from `waiting` to `running` on its first tick.
    async fn list_for_tick(&mut self, limit: usize) -> Result<Vec<RecordId>>;

    /// Count services currently `{waiting, running}` (§4.J `server_stats`).
    async fn count_active(&mut self) -> Result<u64>;

    /// Current dependency rows for a service, ordered by `position` (§4.I: "order them by
    /// `position` in the `extras`").
    async fn get_dependencies(&mut self, record_id: RecordId) -> Result<Vec<ServiceDependency>>;

    /// Replace a service's dependency rows wholesale — called once per tick that submits a new
    /// batch of children, after the previous batch's results have been consumed.
    async fn replace_dependencies(
        &mut self,
        record_id: RecordId,
        dependencies: Vec<ServiceDependency>,
    ) -> Result<()>;

    /// Remove a service's queue row and any remaining dependency rows. Called once the service
    /// reaches a terminal status (complete or error).
    async fn remove(&mut self, record_id: RecordId) -> Result<()>;
}

#[async_trait]
impl ServiceRepo for PostgresTxn {
    async fn enroll(
        &mut self,
        record_id: RecordId,
        compute_tag: String,
        priority: Priority,
        service_state: serde_json::Value,
    ) -> Result<()> {
        let now = self.now();
        sqlx::query(
            r#"
            INSERT INTO service_queue (procedure_id, compute_tag, priority, service_state, created_on, modified_on)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (procedure_id) DO NOTHING
            "#,
        )
        .bind(record_id.get())
        .bind(&compute_tag)
        .bind(priority.rank())
        .bind(&service_state)
        .bind(now.date_time())
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn get_state(&mut self, record_id: RecordId) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            r#"SELECT service_state FROM service_queue WHERE procedure_id = $1"#,
        )
        .bind(record_id.get())
        .fetch_optional(self.conn())
        .await?;
        Ok(row.map(|(s,)| s))
    }

    async fn update_state(&mut self, record_id: RecordId, service_state: serde_json::Value) -> Result<()> {
        let now = self.now();
        sqlx::query(
            r#"UPDATE service_queue SET service_state = $2, modified_on = $3 WHERE procedure_id = $1"#,
        )
        .bind(record_id.get())
        .bind(&service_state)
        .bind(now.date_time())
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn list_for_tick(&mut self, limit: usize) -> Result<Vec<RecordId>> {
        let running: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT s.procedure_id FROM service_queue s
            JOIN base_record r ON r.id = s.procedure_id
            WHERE r.status = 'running'
            ORDER BY s.priority DESC, s.created_on ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(self.conn())
        .await?;

        let mut ids: Vec<RecordId> = running.into_iter().map(|(id,)| RecordId(id)).collect();
        let remaining = limit.saturating_sub(ids.len());
        if remaining > 0 {
            let waiting: Vec<(i64,)> = sqlx::query_as(
                r#"
                SELECT s.procedure_id FROM service_queue s
                JOIN base_record r ON r.id = s.procedure_id
                WHERE r.status = 'waiting'
                ORDER BY s.priority DESC, s.created_on ASC
                LIMIT $1
                "#,
            )
            .bind(remaining as i64)
            .fetch_all(self.conn())
            .await?;
            ids.extend(waiting.into_iter().map(|(id,)| RecordId(id)));
        }
        Ok(ids)
    }

    async fn count_active(&mut self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT count(*) FROM service_queue s
            JOIN base_record r ON r.id = s.procedure_id
            WHERE r.status IN ('waiting', 'running')
            "#,
        )
        .fetch_one(self.conn())
        .await?;
        Ok(count as u64)
    }

    async fn get_dependencies(&mut self, record_id: RecordId) -> Result<Vec<ServiceDependency>> {
        let rows = sqlx::query_as::<_, (i64, String, i32, serde_json::Value)>(
            r#"
            SELECT child_record_id, key, position, extras
            FROM service_queue_tasks
            WHERE parent_record_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(record_id.get())
        .fetch_all(self.conn())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(child_record_id, key, position, extras)| ServiceDependency {
                child_record_id: RecordId(child_record_id),
                key,
                position,
                extras,
            })
            .collect())
    }

    async fn replace_dependencies(
        &mut self,
        record_id: RecordId,
        dependencies: Vec<ServiceDependency>,
    ) -> Result<()> {
        sqlx::query(r#"DELETE FROM service_queue_tasks WHERE parent_record_id = $1"#)
            .bind(record_id.get())
            .execute(self.conn())
            .await?;
        for dep in dependencies {
            sqlx::query(
                r#"
                INSERT INTO service_queue_tasks (parent_record_id, child_record_id, key, position, extras)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(record_id.get())
            .bind(dep.child_record_id.get())
            .bind(&dep.key)
            .bind(dep.position)
            .bind(&dep.extras)
            .execute(self.conn())
            .await?;
        }
        Ok(())
    }

    async fn remove(&mut self, record_id: RecordId) -> Result<()> {
        sqlx::query(r#"DELETE FROM service_queue_tasks WHERE parent_record_id = $1"#)
            .bind(record_id.get())
            .execute(self.conn())
            .await?;
        sqlx::query(r#"DELETE FROM service_queue WHERE procedure_id = $1"#)
            .bind(record_id.get())
            .execute(self.conn())
            .await?;
        Ok(())
    }
}
