//! The record store (§3, §4.C, §4.D): the polymorphic root of every compute result.
//!
//! A record's common fields (status, manager, history, outputs) are mirrored into indexed
//! columns so the status sweep, orphan recovery, and the service tick can query them directly;
//! the full typed payload — base fields plus whichever specialization applies — round-trips
//! through a single `record_json` column. This is the same trade the task queue makes for
//! `spec`/`required_programs` and the manager registry makes for `programs`/`tags`: a handful of
//! columns earn their keep as predicates, everything else travels as JSON.

use async_trait::async_trait;
use fractal_types::{ComputeHistoryRow, OutputStoreId, Record, RecordId, RecordStatus};
use std::collections::HashMap;

use crate::interface::PostgresTxn;
use crate::Result;

#[async_trait]
pub trait RecordRepo: Send {
    /// Insert new records, each paired with the dedup key [`RecordRepo::find_existing`] would
    /// have looked up for it (`None` for record types with no meaningful dedup key, e.g.
    /// services). Each gets a fresh id; no deduplication is attempted here — that is
    /// `find_existing`'s job, called by the submission path *before* this.
    async fn insert(&mut self, records: Vec<(Record, Option<String>)>) -> Result<Vec<RecordId>>;

    /// Standalone dedup lookup (§4.C, supplemented from the original's `add_singlepoints`-style
    /// existing-record search): given precomputed dedup keys (typically a hash of molecule id +
    /// specification, computed by the caller per record type), return which already have a
    /// matching record. Deliberately independent of [`storage::insert_general`](crate::storage)
    /// — records aren't immutable-content-addressed the way molecules/keyword sets are, so the
    /// generic batch-dedup-insert shape doesn't apply; this is a plain read used to decide
    /// whether to insert at all.
    async fn find_existing(&mut self, dedup_keys: Vec<String>) -> Result<HashMap<String, RecordId>>;

    /// Fetch records by id, in input order.
    async fn get(&mut self, ids: Vec<RecordId>, missing_ok: bool) -> Result<Vec<Option<Record>>>;

    /// Update lifecycle status and bump `modified_on` (invariant 6).
    async fn update_status(&mut self, id: RecordId, status: RecordStatus) -> Result<()>;

    /// Update status for a batch of records in one statement (used by the periodic status sweep
    /// and by cancellation, which may touch many records at once).
    async fn update_status_batch(&mut self, ids: &[RecordId], status: RecordStatus) -> Result<()>;

    /// Set or clear the owning manager.
    async fn set_manager(&mut self, id: RecordId, manager_name: Option<String>) -> Result<()>;

    /// Append one entry to `compute_history` (append-only, §3).
    async fn append_compute_history(&mut self, id: RecordId, row: ComputeHistoryRow) -> Result<()>;

    /// Attach captured stdout/stderr/error blobs from a completed or failed attempt.
    async fn set_outputs(
        &mut self,
        id: RecordId,
        stdout: Option<OutputStoreId>,
        stderr: Option<OutputStoreId>,
        error: Option<OutputStoreId>,
    ) -> Result<()>;

    /// Replace a record's full typed payload (base fields plus specialization). Used by the
    /// service engine and the return engine whenever a specialized mutation — a new trajectory
    /// step, an updated `service_state`, a populated `final_energy_dict` — needs to be persisted.
    async fn replace_payload(&mut self, id: RecordId, record: Record) -> Result<()>;
}

fn record_type_str(record: &Record) -> &'static str {
    use fractal_types::RecordType::*;
    match record.record_type() {
        Singlepoint => "singlepoint",
        Optimization => "optimization",
        Torsiondrive => "torsiondrive",
        Gridoptimization => "gridoptimization",
        Reaction => "reaction",
        Manybody => "manybody",
        Neb => "neb",
    }
}

fn status_str(status: RecordStatus) -> &'static str {
    use RecordStatus::*;
    match status {
        Waiting => "waiting",
        Running => "running",
        Complete => "complete",
        Error => "error",
        Cancelled => "cancelled",
        Invalid => "invalid",
        Deleted => "deleted",
    }
}

#[async_trait]
impl RecordRepo for PostgresTxn {
    async fn insert(&mut self, records: Vec<(Record, Option<String>)>) -> Result<Vec<RecordId>> {
        let mut ids = Vec::with_capacity(records.len());
        let now = self.now();
        for (record, dedup_key) in records {
            let base = record.base();
            let record_type = record_type_str(&record);
            let status = status_str(base.status);
            let payload = serde_json::to_value(&record)?;

            let row = sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO base_record
                    (record_type, status, manager_name, owner, extras, provenance,
                     compute_history, comments, stdout, stderr, error, is_service,
                     created_on, modified_on, record_json, dedup_key)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13, $14, $15)
                RETURNING id
                "#,
            )
            .bind(record_type)
            .bind(status)
            .bind(&base.manager_name)
            .bind(&base.owner)
            .bind(&base.extras)
            .bind(&base.provenance)
            .bind(serde_json::to_value(&base.compute_history)?)
            .bind(serde_json::to_value(&base.comments)?)
            .bind(base.stdout.map(|id| id.get()))
            .bind(base.stderr.map(|id| id.get()))
            .bind(base.error.map(|id| id.get()))
            .bind(base.is_service)
            .bind(now.date_time())
            .bind(&payload)
            .bind(&dedup_key)
            .fetch_one(self.conn())
            .await?;
            ids.push(RecordId(row.0));
        }
        Ok(ids)
    }

    async fn find_existing(&mut self, dedup_keys: Vec<String>) -> Result<HashMap<String, RecordId>> {
        if dedup_keys.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"SELECT id, dedup_key FROM base_record WHERE dedup_key = ANY($1)"#,
        )
        .bind(&dedup_keys)
        .fetch_all(self.conn())
        .await?;
        Ok(rows.into_iter().map(|(id, key)| (key, RecordId(id))).collect())
    }

    async fn get(&mut self, ids: Vec<RecordId>, missing_ok: bool) -> Result<Vec<Option<Record>>> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query_as::<_, (i64, serde_json::Value)>(
            r#"SELECT id, record_json FROM base_record WHERE id = ANY($1)"#,
        )
        .bind(&raw_ids)
        .fetch_all(self.conn())
        .await?;

        let mut by_id: HashMap<i64, serde_json::Value> = rows.into_iter().collect();

        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            match by_id.remove(&id.get()) {
                Some(json) => out.push(Some(serde_json::from_value(json)?)),
                None if missing_ok => out.push(None),
                None => {
                    return Err(crate::Error::NotFound {
                        kind: "record",
                        id: id.to_string(),
                    })
                }
            }
        }
        Ok(out)
    }

    async fn update_status(&mut self, id: RecordId, status: RecordStatus) -> Result<()> {
        self.update_status_batch(&[id], status).await
    }

    async fn update_status_batch(&mut self, ids: &[RecordId], status: RecordStatus) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = self.now();
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();

        // `record_json` carries its own nested `base.status`, which must stay in lockstep with
        // the indexed `status` column; patch both in application code rather than fighting
        // Postgres's jsonb path functions over a tagged-enum shape we don't control here.
        let rows = sqlx::query_as::<_, (i64, serde_json::Value)>(
            r#"SELECT id, record_json FROM base_record WHERE id = ANY($1)"#,
        )
        .bind(&raw_ids)
        .fetch_all(self.conn())
        .await?;

        for (id, json) in rows {
            let mut record: Record = serde_json::from_value(json)?;
            record.base_mut().status = status;
            record.base_mut().modified_on = now;
            let payload = serde_json::to_value(&record)?;
            sqlx::query(
                r#"UPDATE base_record SET status = $2, modified_on = $3, record_json = $4 WHERE id = $1"#,
            )
            .bind(id)
            .bind(status_str(status))
            .bind(now.date_time())
            .bind(&payload)
            .execute(self.conn())
            .await?;
        }
        Ok(())
    }

    async fn set_manager(&mut self, id: RecordId, manager_name: Option<String>) -> Result<()> {
        let now = self.now();
        sqlx::query(
            r#"UPDATE base_record SET manager_name = $2, modified_on = $3 WHERE id = $1"#,
        )
        .bind(id.get())
        .bind(&manager_name)
        .bind(now.date_time())
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn append_compute_history(&mut self, id: RecordId, row: ComputeHistoryRow) -> Result<()> {
        let existing = sqlx::query_as::<_, (serde_json::Value,)>(
            r#"SELECT compute_history FROM base_record WHERE id = $1"#,
        )
        .bind(id.get())
        .fetch_optional(self.conn())
        .await?
        .ok_or_else(|| crate::Error::NotFound {
            kind: "record",
            id: id.to_string(),
        })?;

        let mut history: Vec<ComputeHistoryRow> = serde_json::from_value(existing.0)?;
        history.push(row);

        sqlx::query(r#"UPDATE base_record SET compute_history = $2 WHERE id = $1"#)
            .bind(id.get())
            .bind(serde_json::to_value(&history)?)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn set_outputs(
        &mut self,
        id: RecordId,
        stdout: Option<OutputStoreId>,
        stderr: Option<OutputStoreId>,
        error: Option<OutputStoreId>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE base_record SET stdout = $2, stderr = $3, error = $4 WHERE id = $1"#,
        )
        .bind(id.get())
        .bind(stdout.map(|id| id.get()))
        .bind(stderr.map(|id| id.get()))
        .bind(error.map(|id| id.get()))
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn replace_payload(&mut self, id: RecordId, record: Record) -> Result<()> {
        let base = record.base();
        let now = self.now();
        let payload = serde_json::to_value(&record)?;
        sqlx::query(
            r#"
            UPDATE base_record
            SET status = $2, manager_name = $3, extras = $4, provenance = $5,
                compute_history = $6, comments = $7, stdout = $8, stderr = $9, error = $10,
                modified_on = $11, record_json = $12
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(status_str(base.status))
        .bind(&base.manager_name)
        .bind(&base.extras)
        .bind(&base.provenance)
        .bind(serde_json::to_value(&base.compute_history)?)
        .bind(serde_json::to_value(&base.comments)?)
        .bind(base.stdout.map(|id| id.get()))
        .bind(base.stderr.map(|id| id.get()))
        .bind(base.error.map(|id| id.get()))
        .bind(now.date_time())
        .bind(&payload)
        .execute(self.conn())
        .await?;
        Ok(())
    }
}

