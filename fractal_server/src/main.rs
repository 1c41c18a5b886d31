//! Binary entrypoint: wires up a `Catalog` against `DATABASE_URL`, starts the periodic runner
//! (§4.J), and drains it on SIGINT/SIGTERM.
//!
//! Loading a richer configuration file/CLI (ports, auth, TLS, ...) is explicitly out of scope
//! (§1) — everything this binary needs beyond the database URL is `FractalConfig::default()`.

use std::sync::Arc;

use fractal_catalog::PostgresCatalog;
use fractal_server::FractalServer;
use fractal_time::{SystemProvider, TimeProviderRef};
use observability_deps::tracing::{error, info};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            error!("DATABASE_URL must be set");
            std::process::exit(1);
        }
    };

    let pool = match PgPoolOptions::new().max_connections(10).connect(&database_url).await {
        Ok(pool) => pool,
        Err(source) => {
            error!(%source, "failed to connect to database");
            std::process::exit(1);
        }
    };

    let metrics = Arc::new(metric::Registry::new());
    let time_provider: TimeProviderRef = Arc::new(SystemProvider::new());
    let catalog = Arc::new(PostgresCatalog::new(pool, metrics, time_provider));
    let server = FractalServer::new(catalog, fractal_types::FractalConfig::default());

    let shutdown = server.shutdown.clone();
    tokio::spawn(wait_for_shutdown_signal(shutdown));

    info!("fractal-server starting periodic runner");
    fractal_server::periodics::run(server).await;
    info!("fractal-server shut down cleanly");
}

/// Wait for either Ctrl-C or SIGTERM, then trip the shared [`tracker::ShutdownHandle`] so every
/// periodic job drains on its next `select!` instead of whenever its own interval next fires.
async fn wait_for_shutdown_signal(shutdown: tracker::ShutdownHandle) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(source) => error!(%source, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
    shutdown.shutdown();
}
