//! The manager registry (§4.F): live workers, tags, programs, heartbeats, statistics.

use async_trait::async_trait;
use fractal_types::{ComputeManager, ManagerLog, ManagerName, ManagerStatus};
use observability_deps::tracing::info;
use std::collections::BTreeMap;

use crate::interface::PostgresTxn;
use crate::Result;

/// Heartbeat payload a manager reports on activate/heartbeat (§6 PATCH body).
#[derive(Debug, Clone, Default)]
pub struct HeartbeatStats {
    pub active_tasks: i64,
    pub active_cores: i64,
    pub active_memory: f64,
    pub total_cpu_hours: f64,
    /// Append a [`ManagerLog`] row for this heartbeat (the original's `log=True`).
    pub log: bool,
}

/// Manager registry storage.
#[async_trait]
pub trait ManagerRepo: Send {
    /// Create the row if absent and set it active (§4.F). `programs`/`tags` are lower-cased and
    /// must each be non-empty (§6).
    async fn activate(
        &mut self,
        name: ManagerName,
        cluster: String,
        hostname: String,
        username: Option<String>,
        manager_version: String,
        programs: BTreeMap<String, Option<String>>,
        compute_tags: Vec<String>,
    ) -> Result<()>;

    /// Update counters and `modified_on`. Returns `Err(Error::Manager{shutdown: true, ..})` if
    /// the manager is not currently active.
    async fn heartbeat(&mut self, name: &ManagerName, stats: HeartbeatStats) -> Result<()>;

    /// Flip named managers from active to inactive. Returns the names actually flipped (a
    /// manager already inactive is not re-flipped or re-counted).
    async fn deactivate(&mut self, names: &[ManagerName]) -> Result<Vec<ManagerName>>;

    /// Sweep-deactivate: flip every active manager whose `modified_on` predates `modified_before`
    /// (§4.J). Returns the names flipped.
    async fn deactivate_stale(
        &mut self,
        modified_before: fractal_time::Time,
    ) -> Result<Vec<ManagerName>>;

    /// Increment a manager's lifetime counters (§4.G step 3, §4.H step 6).
    async fn record_claimed(&mut self, name: &ManagerName, count: i64) -> Result<()>;

    /// Increment completed/failure/returned counters after a batch of results is processed.
    async fn record_outcome(
        &mut self,
        name: &ManagerName,
        completed: i64,
        failures: i64,
        returned: i64,
    ) -> Result<()>;

    /// Count currently-active managers (§4.J `server_stats`).
    async fn count_active(&mut self) -> Result<u64>;

    /// Fetch a manager row by name.
    async fn get(&mut self, name: &ManagerName) -> Result<Option<ComputeManager>>;

    /// Fetch recorded heartbeat log entries for a manager, most recent last.
    async fn query_logs(&mut self, name: &ManagerName, limit: usize) -> Result<Vec<ManagerLog>>;
}

#[async_trait]
impl ManagerRepo for PostgresTxn {
    async fn activate(
        &mut self,
        name: ManagerName,
        cluster: String,
        hostname: String,
        username: Option<String>,
        manager_version: String,
        programs: BTreeMap<String, Option<String>>,
        compute_tags: Vec<String>,
    ) -> Result<()> {
        let now = self.now();
        let programs_json = serde_json::to_value(&programs)?;
        let tags_json = serde_json::to_value(&compute_tags)?;
        sqlx::query(
            r#"
            INSERT INTO queue_manager
                (name, cluster, hostname, username, manager_version, programs, tags, status,
                 created_on, modified_on, active_tasks, active_cores, active_memory,
                 total_cpu_hours, completed, failures, claimed, returned)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, 'active', $8, $8, 0, 0, 0, 0, 0, 0, 0, 0)
            ON CONFLICT (name) DO UPDATE SET
                status = 'active',
                modified_on = EXCLUDED.modified_on,
                programs = EXCLUDED.programs,
                tags = EXCLUDED.tags,
                manager_version = EXCLUDED.manager_version
            "#,
        )
        .bind(name.as_ref())
        .bind(&cluster)
        .bind(&hostname)
        .bind(&username)
        .bind(&manager_version)
        .bind(programs_json)
        .bind(tags_json)
        .bind(now.date_time())
        .execute(self.conn())
        .await?;
        info!(manager = %name, "manager activated");
        Ok(())
    }

    async fn heartbeat(&mut self, name: &ManagerName, stats: HeartbeatStats) -> Result<()> {
        let now = self.now();
        let updated = sqlx::query(
            r#"
            UPDATE queue_manager
            SET modified_on = $2,
                active_tasks = $3,
                active_cores = $4,
                active_memory = $5,
                total_cpu_hours = $6
            WHERE name = $1 AND status = 'active'
            "#,
        )
        .bind(name.as_ref())
        .bind(now.date_time())
        .bind(stats.active_tasks)
        .bind(stats.active_cores)
        .bind(stats.active_memory)
        .bind(stats.total_cpu_hours)
        .execute(self.conn())
        .await?;

        if updated.rows_affected() == 0 {
            return Err(crate::Error::Manager {
                message: format!("manager {name} is not active"),
                shutdown: true,
            });
        }

        if stats.log {
            sqlx::query(
                r#"
                INSERT INTO queue_manager_log
                    (manager_name, timestamp, completed, submitted, failures,
                     total_worker_walltime, total_task_walltime, active_tasks, active_cores,
                     active_memory)
                VALUES ($1, $2, 0, 0, 0, 0, 0, $3, $4, $5)
                "#,
            )
            .bind(name.as_ref())
            .bind(now.date_time())
            .bind(stats.active_tasks)
            .bind(stats.active_cores)
            .bind(stats.active_memory)
            .execute(self.conn())
            .await?;
        }
        Ok(())
    }

    async fn deactivate(&mut self, names: &[ManagerName]) -> Result<Vec<ManagerName>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let now = self.now();
        let raw: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            UPDATE queue_manager
            SET status = 'inactive', modified_on = $2
            WHERE name = ANY($1) AND status = 'active'
            RETURNING name
            "#,
        )
        .bind(&raw)
        .bind(now.date_time())
        .fetch_all(self.conn())
        .await?;
        Ok(rows.into_iter().map(|(n,)| ManagerName(n)).collect())
    }

    async fn deactivate_stale(
        &mut self,
        modified_before: fractal_time::Time,
    ) -> Result<Vec<ManagerName>> {
        let now = self.now();
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            UPDATE queue_manager
            SET status = 'inactive', modified_on = $2
            WHERE status = 'active' AND modified_on < $1
            RETURNING name
            "#,
        )
        .bind(modified_before.date_time())
        .bind(now.date_time())
        .fetch_all(self.conn())
        .await?;
        Ok(rows.into_iter().map(|(n,)| ManagerName(n)).collect())
    }

    async fn record_claimed(&mut self, name: &ManagerName, count: i64) -> Result<()> {
        sqlx::query(r#"UPDATE queue_manager SET claimed = claimed + $2 WHERE name = $1"#)
            .bind(name.as_ref())
            .bind(count)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn record_outcome(
        &mut self,
        name: &ManagerName,
        completed: i64,
        failures: i64,
        returned: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE queue_manager
            SET completed = completed + $2, failures = failures + $3, returned = returned + $4
            WHERE name = $1
            "#,
        )
        .bind(name.as_ref())
        .bind(completed)
        .bind(failures)
        .bind(returned)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn count_active(&mut self) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT count(*) FROM queue_manager WHERE status = 'active'"#)
                .fetch_one(self.conn())
                .await?;
        Ok(count as u64)
    }

    async fn get(&mut self, name: &ManagerName) -> Result<Option<ComputeManager>> {
        #[allow(clippy::type_complexity)]
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                Option<String>,
                String,
                serde_json::Value,
                serde_json::Value,
                String,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                i64,
                i64,
                f64,
                f64,
                i64,
                i64,
                i64,
                i64,
            ),
        >(
            r#"
            SELECT name, cluster, hostname, username, manager_version, programs, tags, status,
                   created_on, modified_on, active_tasks, active_cores, active_memory,
                   total_cpu_hours, completed, failures, claimed, returned
            FROM queue_manager WHERE name = $1
            "#,
        )
        .bind(name.as_ref())
        .fetch_optional(self.conn())
        .await?;

        row.map(
            |(
                name,
                cluster,
                hostname,
                username,
                manager_version,
                programs,
                tags,
                status,
                created_on,
                modified_on,
                active_tasks,
                active_cores,
                active_memory,
                total_cpu_hours,
                completed,
                failures,
                claimed,
                returned,
            )| {
                Ok(ComputeManager {
                    name: ManagerName(name),
                    cluster,
                    hostname,
                    username,
                    manager_version,
                    programs: serde_json::from_value(programs)?,
                    compute_tags: serde_json::from_value(tags)?,
                    status: if status == "active" {
                        ManagerStatus::Active
                    } else {
                        ManagerStatus::Inactive
                    },
                    created_on: fractal_time::Time::from_datetime(created_on),
                    modified_on: fractal_time::Time::from_datetime(modified_on),
                    active_tasks,
                    active_cores,
                    active_memory,
                    total_cpu_hours,
                    completed,
                    failures,
                    claimed,
                    returned,
                })
            },
        )
        .transpose()
    }

    async fn query_logs(&mut self, name: &ManagerName, limit: usize) -> Result<Vec<ManagerLog>> {
        let rows = sqlx::query_as::<
            _,
            (
                chrono::DateTime<chrono::Utc>,
                i64,
                i64,
                i64,
                f64,
                f64,
                i64,
                i64,
                f64,
            ),
        >(
            r#"
            SELECT timestamp, completed, submitted, failures, total_worker_walltime,
                   total_task_walltime, active_tasks, active_cores, active_memory
            FROM queue_manager_log WHERE manager_name = $1
            ORDER BY timestamp DESC LIMIT $2
            "#,
        )
        .bind(name.as_ref())
        .bind(limit as i64)
        .fetch_all(self.conn())
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    timestamp,
                    completed,
                    submitted,
                    failures,
                    total_worker_walltime,
                    total_task_walltime,
                    active_tasks,
                    active_cores,
                    active_memory,
                )| ManagerLog {
                    manager_name: name.clone(),
                    timestamp: fractal_time::Time::from_datetime(timestamp),
                    completed,
                    submitted,
                    failures,
                    total_worker_walltime,
                    total_task_walltime,
                    active_tasks,
                    active_cores,
                    active_memory,
                },
            )
            .collect())
    }
}
