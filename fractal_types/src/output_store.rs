//! Compressed blob storage for compute outputs (§4.H, §3 glossary: output store).

use crate::ids::OutputStoreId;
use serde::{Deserialize, Serialize};

/// What kind of output a stored blob represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Captured stdout.
    Stdout,
    /// Captured stderr.
    Stderr,
    /// A structured error payload (`FailedOperation.error`).
    Error,
}

/// Compression used on a stored blob's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Stored uncompressed.
    None,
    /// zstd.
    Zstd,
    /// gzip.
    Gzip,
    /// lzma.
    Lzma,
}

/// A single stored output blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputStoreEntry {
    /// Assigned on insert.
    pub id: Option<OutputStoreId>,
    /// What kind of output this is.
    pub output_type: OutputType,
    /// Compression applied to `data`.
    pub compression: CompressionAlgorithm,
    /// The compression level `data` was encoded at (algorithm-specific; meaningless for `None`).
    pub compression_level: i32,
    /// Compressed bytes, base64-encoded for JSON transport.
    pub data: Vec<u8>,
}
