//! The periodic runner (§4.J): one in-process scheduler, three jobs, each on its own cadence.
//!
//! Exactly one instance of [`run`] must be alive per deployment. Each job is a loop that
//! `select!`s between its own interval timer and the shared [`ShutdownHandle`], so SIGINT/SIGTERM
//! (wired by `main`) drain all three promptly instead of waiting out the longest period.

use std::sync::Arc;
use std::time::Duration;

use backoff::{Backoff, BackoffConfig};
use fractal_catalog::claim::ClaimRepo;
use fractal_catalog::manager::ManagerRepo;
use fractal_catalog::service::ServiceRepo;
use fractal_catalog::{ClockRepo, Transaction};
use fractal_types::RecordStatus;
use observability_deps::tracing::{info, warn};

use crate::{Error, FractalServer, Result};

/// Run all three periodic jobs concurrently until `server.shutdown` is signalled.
pub async fn run(server: FractalServer) {
    let stats = tokio::spawn(server_stats_loop(server.clone()));
    let heartbeat = tokio::spawn(manager_heartbeat_check_loop(server.clone()));
    let tick = tokio::spawn(service_tick_loop(server.clone()));

    let _ = tokio::join!(stats, heartbeat, tick);
    info!("periodic runner stopped");
}

async fn sleep_or_shutdown(server: &FractalServer, period: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => true,
        _ = server.shutdown.cancelled() => false,
    }
}

/// `server_stats` (§4.J): snapshot active-manager/active-service gauges every
/// `server_stats_frequency_seconds`. The original logs a DB-size snapshot too; sizing the
/// database itself is storage-engine-specific and out of scope here (no table named for it
/// anywhere in §3/§6) — this keeps the counts the rest of the spec actually defines.
async fn server_stats_loop(server: FractalServer) {
    let period = Duration::from_secs(server.config.periodics.server_stats_frequency_seconds.max(1));
    let active_managers = server.metrics().register_gauge("active_managers", "currently active compute managers");
    let active_services = server.metrics().register_gauge("active_services", "service records in waiting or running");

    loop {
        match server_stats_tick(&server).await {
            Ok((managers, services)) => {
                active_managers.recorder(&[]).set(managers);
                active_services.recorder(&[]).set(services);
                info!(managers, services, "server stats");
            }
            Err(source) => warn!(%source, "server_stats tick failed"),
        }

        if !sleep_or_shutdown(&server, period).await {
            break;
        }
    }
}

async fn server_stats_tick(server: &FractalServer) -> Result<(u64, u64)> {
    let mut backoff = Backoff::new(&BackoffConfig::default());
    backoff
        .retry_all_errors("server_stats", || async {
            let mut txn: Box<dyn Transaction> =
                server.catalog.start_transaction().await.map_err(Error::from)?;
            let services = ServiceRepo::count_active(&mut *txn).await.map_err(Error::from)?;
            let managers = ManagerRepo::count_active(&mut *txn).await.map_err(Error::from)?;
            txn.commit().await.map_err(Error::from)?;
            Ok::<(u64, u64), Error>((managers, services))
        })
        .await
        .expect("retry_all_errors never gives up")
}

/// `manager_heartbeat_check` (§4.J, §4.G cont.): deactivate managers whose `modified_on` predates
/// `now - heartbeat_stale_after_seconds`, then reset every record they were still running back to
/// waiting (§8 scenario 4).
async fn manager_heartbeat_check_loop(server: FractalServer) {
    let period = Duration::from_secs(server.config.periodics.heartbeat_frequency_seconds.max(1));

    loop {
        match manager_heartbeat_check_tick(&server).await {
            Ok((deactivated, reset)) if deactivated > 0 => {
                info!(deactivated, reset, "manager heartbeat sweep");
            }
            Ok(_) => {}
            Err(source) => warn!(%source, "manager_heartbeat_check tick failed"),
        }

        if !sleep_or_shutdown(&server, period).await {
            break;
        }
    }
}

async fn manager_heartbeat_check_tick(server: &FractalServer) -> Result<(usize, usize)> {
    let mut backoff = Backoff::new(&BackoffConfig::default());
    backoff
        .retry_all_errors("manager_heartbeat_check", || async {
            let mut txn = server.catalog.start_transaction().await.map_err(Error::from)?;
            let now = txn.now();
            let stale_before = now - Duration::from_secs(server.config.periodics.heartbeat_stale_after_seconds());

            let deactivated = ManagerRepo::deactivate_stale(&mut *txn, stale_before)
                .await
                .map_err(Error::from)?;
            let reset = if deactivated.is_empty() {
                0
            } else {
                ClaimRepo::reset_orphaned(&mut *txn, &deactivated).await.map_err(Error::from)?
            };
            txn.commit().await.map_err(Error::from)?;
            Ok((deactivated.len(), reset))
        })
        .await
        .expect("retry_all_errors never gives up")
}

/// `service_tick` (§4.J): run [`fractal_service::engine::iterate`] on up to `max_active_services`
/// services, firing a completion notification (§4.K) for every one that reaches `complete` or
/// `error` this round.
async fn service_tick_loop(server: FractalServer) {
    let period = Duration::from_secs(server.config.periodics.service_frequency_seconds.max(1));
    let limit = server.config.periodics.max_active_services;

    loop {
        match fractal_service::run_tick(&*server.catalog, limit, &server.notifications).await {
            Ok(summary) => {
                if summary.progressed + summary.completed + summary.errored + summary.failed > 0 {
                    info!(
                        waiting = summary.waiting,
                        progressed = summary.progressed,
                        completed = summary.completed,
                        errored = summary.errored,
                        failed = summary.failed,
                        "service tick"
                    );
                }
            }
            Err(source) => warn!(%source, "service_tick failed outright"),
        }

        if !sleep_or_shutdown(&server, period).await {
            break;
        }
    }
}

/// Re-export so `main` can reach the shared server context without importing `fractal_catalog`
/// directly just to build one.
pub type SharedServer = Arc<FractalServer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_field_carries_the_record_status_type() {
        // The completion registry is keyed on the wire's record id and delivers the
        // user-visible status string (§6) to any blocked watcher; a compile-time check that
        // the type alias lines up with what `wire::return_results` notifies with.
        let _: fn(&tracker::CompletionRegistry<RecordStatus>, i64, RecordStatus) =
            |registry, id, status| registry.notify(id, status);
    }
}
