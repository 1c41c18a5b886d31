//! Observability ecosystem dependencies for fractal-server.
//!
//! This crate exists so every other crate depends on a single place for its tracing version,
//! rather than each pinning (and potentially drifting on) its own. Import `tracing` macros from
//! here (`observability_deps::tracing::{info, warn, error}`) instead of depending on `tracing`
//! directly.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

pub use tracing;
