//! The task queue (§4.E): one row per record in `{waiting, running}` (invariant 1).
//!
//! A task row is created once, when its record first becomes `waiting` (submission, or an
//! explicit reset of an `error` record — §7, §8 invariant 7, which requires a *new* task while
//! preserving history). It survives the waiting→running transition unchanged except for
//! `manager_name` (set by the claim engine, cleared by orphan recovery); it is deleted when the
//! record leaves `{waiting, running}` for any reason (complete, error, cancelled).

use async_trait::async_trait;
use fractal_types::{ManagerName, Priority, RecordId, RequiredPrograms, Task, TaskId};

use crate::interface::PostgresTxn;
use crate::Result;

/// Task queue storage.
#[async_trait]
pub trait TaskRepo: Send {
    /// Create a task row for `record_id`. Called atomically alongside record submission (§4.E)
    /// and by an explicit error→waiting reset (§7).
    #[allow(clippy::too_many_arguments)]
    async fn create(
        &mut self,
        record_id: RecordId,
        spec: serde_json::Value,
        tag: String,
        required_programs: RequiredPrograms,
        priority: Priority,
    ) -> Result<TaskId>;

    /// Fetch the task for a record, if its status is still `{waiting, running}`.
    async fn get_by_record(&mut self, record_id: RecordId) -> Result<Option<Task>>;

    /// Fetch a task by id.
    async fn get(&mut self, task_id: TaskId) -> Result<Option<Task>>;

    /// Delete a task row. Called when its record leaves `{waiting, running}`.
    async fn delete(&mut self, task_id: TaskId) -> Result<()>;

    /// Delete the task row for a record, if any. Used when cancelling (§5: "tasks for cancelled
    /// records are removed synchronously").
    async fn delete_by_record(&mut self, record_id: RecordId) -> Result<()>;

    /// Clear `manager_name` on the named tasks without touching any other field. Used by orphan
    /// recovery (§4.G cont.): the task row for a `running` record is untouched by the
    /// waiting→running transition's inverse, only ownership is released.
    async fn clear_manager(&mut self, task_ids: &[TaskId]) -> Result<()>;
}

#[async_trait]
impl TaskRepo for PostgresTxn {
    async fn create(
        &mut self,
        record_id: RecordId,
        spec: serde_json::Value,
        tag: String,
        required_programs: RequiredPrograms,
        priority: Priority,
    ) -> Result<TaskId> {
        let now = self.now();
        let required_programs_json = serde_json::to_value(&required_programs.0)?;
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO task_queue
                (base_result_id, spec, compute_tag, required_programs, priority, created_on)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(record_id.get())
        .bind(spec)
        .bind(&tag)
        .bind(required_programs_json)
        .bind(priority.rank())
        .bind(now.date_time())
        .fetch_one(self.conn())
        .await?;
        Ok(TaskId(row.0))
    }

    async fn get_by_record(&mut self, record_id: RecordId) -> Result<Option<Task>> {
        fetch_task(self, r#"WHERE base_result_id = $1"#, record_id.get()).await
    }

    async fn get(&mut self, task_id: TaskId) -> Result<Option<Task>> {
        fetch_task(self, r#"WHERE id = $1"#, task_id.get()).await
    }

    async fn delete(&mut self, task_id: TaskId) -> Result<()> {
        sqlx::query(r#"DELETE FROM task_queue WHERE id = $1"#)
            .bind(task_id.get())
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn delete_by_record(&mut self, record_id: RecordId) -> Result<()> {
        sqlx::query(r#"DELETE FROM task_queue WHERE base_result_id = $1"#)
            .bind(record_id.get())
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn clear_manager(&mut self, task_ids: &[TaskId]) -> Result<()> {
        if task_ids.is_empty() {
            return Ok(());
        }
        let raw_ids: Vec<i64> = task_ids.iter().map(|t| t.get()).collect();
        sqlx::query(r#"UPDATE task_queue SET manager = NULL WHERE id = ANY($1)"#)
            .bind(&raw_ids)
            .execute(self.conn())
            .await?;
        Ok(())
    }
}

async fn fetch_task(txn: &mut PostgresTxn, clause: &str, id: i64) -> Result<Option<Task>> {
    let query = format!(
        r#"
        SELECT id, base_result_id, spec, compute_tag, required_programs, priority, manager, created_on
        FROM task_queue {clause}
        "#
    );
    let row = sqlx::query_as::<
        _,
        (
            i64,
            i64,
            serde_json::Value,
            String,
            serde_json::Value,
            i16,
            Option<String>,
            chrono::DateTime<chrono::Utc>,
        ),
    >(&query)
    .bind(id)
    .fetch_optional(txn.conn())
    .await?;

    Ok(row.map(
        |(id, record_id, spec, tag, required_programs, priority, manager, created_on)| Task {
            id: Some(TaskId(id)),
            record_id: RecordId(record_id),
            spec,
            tag,
            required_programs: RequiredPrograms(
                serde_json::from_value(required_programs).unwrap_or_default(),
            ),
            priority: priority_from_rank(priority),
            manager_name: manager.map(ManagerName),
            created_on: fractal_time::Time::from_datetime(created_on),
        },
    ))
}

fn priority_from_rank(rank: i16) -> Priority {
    match rank {
        2 => Priority::High,
        0 => Priority::Low,
        _ => Priority::Normal,
    }
}
