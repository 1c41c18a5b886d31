//! The periodic runner (§4.J), notification wiring (§4.K), and the manager wire-protocol DTOs
//! (§6) for fractal-server.
//!
//! Every other crate in this workspace is a library with no opinion about process lifetime or
//! configuration; this one is the binary that assembles them: it owns the `FractalConfig`
//! (`fractal_types::config`) the storage layer and service engine read their tunables from,
//! holds the `metric::Registry` and `tracker::CompletionRegistry` every other crate is handed a
//! reference to, and runs the three periodic jobs a deployment needs exactly one of.
//!
//! The HTTP transport that would carry §6's wire shapes in and out of the process is explicitly
//! out of scope (§1) — `wire` defines the DTOs and the thin translation into catalog calls that a
//! transport layer would sit on top of, without binding a socket.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod error;
pub mod periodics;
pub mod wire;

pub use error::{Error, Result};

use std::sync::Arc;

use fractal_catalog::Catalog;
use fractal_types::RecordStatus;
use tracker::{CompletionRegistry, ShutdownHandle};

/// Everything the periodic runner and wire layer share: the catalog, the tunables, and the two
/// ambient collaborators (metrics, completion notifications) every other crate was handed a
/// reference to rather than constructing its own.
#[derive(Debug, Clone)]
pub struct FractalServer {
    pub catalog: Arc<dyn Catalog>,
    pub config: fractal_types::FractalConfig,
    pub notifications: Arc<CompletionRegistry<RecordStatus>>,
    pub shutdown: ShutdownHandle,
}

impl FractalServer {
    /// Assemble a server context around an already-constructed catalog. Building the catalog
    /// itself (pool, DSN, migrations) is `main`'s job, not this crate's — everything downstream
    /// of "I have a `Catalog`" lives here.
    pub fn new(catalog: Arc<dyn Catalog>, config: fractal_types::FractalConfig) -> Self {
        Self {
            catalog,
            config,
            notifications: Arc::new(CompletionRegistry::new()),
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn metrics(&self) -> Arc<metric::Registry> {
        self.catalog.metrics()
    }
}
