//! Shared test-only utilities: log capture and a future timeout helper.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

use observability_deps::tracing::subscriber::DefaultGuard;
use once_cell::sync::OnceCell;

#[cfg(feature = "future_timeout")]
mod timeout;
#[cfg(feature = "future_timeout")]
pub use timeout::FutureTimeout;

static LOG_SETUP: OnceCell<()> = OnceCell::new();

/// Initialize a `tracing` subscriber driven by `RUST_LOG`/`LOG_FILTER`, once per process.
///
/// Call this at the top of any test that wants to see log output on failure (`cargo test --
/// --nocapture`, or the framework's own captured-output-on-panic behavior). Safe to call from
/// every test in a module; only the first call takes effect.
pub fn maybe_start_logging() {
    LOG_SETUP.get_or_init(|| {
        let _ = dotenvy::dotenv();
        let filter = std::env::var("LOG_FILTER").unwrap_or_else(|_| "info".to_string());
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .with_test_writer()
            .finish();
        // Intentionally leaked: this is a test-only, once-per-process subscriber.
        let guard: DefaultGuard = tracing::subscriber::set_default(subscriber);
        std::mem::forget(guard);
    });
}

/// Read an environment variable required by an integration test (e.g. `DATABASE_URL`),
/// panicking with a clear message if it is unset rather than failing deep inside `sqlx`.
pub fn env_or_panic(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("environment variable {name} must be set to run this test"))
}
