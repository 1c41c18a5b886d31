//! Compressed blob storage for stdout/stderr/error payloads (§3, §9 design note).
//!
//! Appending is defined as decompress → concatenate → recompress, matching the behavior §9
//! calls out explicitly (the implementation does not attempt to chain compressed frames).

use async_trait::async_trait;
use fractal_types::{CompressionAlgorithm, OutputStoreEntry, OutputStoreId, OutputType};
use std::io::{Read, Write};

use crate::interface::PostgresTxn;
use crate::Result;

/// Blob storage keyed by id.
#[async_trait]
pub trait OutputStoreRepo: Send {
    /// Compress and store `data` at `compression_level`, returning the new entry's id.
    async fn insert(
        &mut self,
        output_type: OutputType,
        compression: CompressionAlgorithm,
        compression_level: i32,
        data: &[u8],
    ) -> Result<OutputStoreId>;

    /// Fetch a stored entry by id.
    async fn get(&mut self, id: OutputStoreId) -> Result<Option<OutputStoreEntry>>;

    /// Decompress, append `more`, and recompress with the entry's existing algorithm.
    async fn append(&mut self, id: OutputStoreId, more: &[u8]) -> Result<()>;

    /// Remove an entry. No-op if it does not exist (the return engine calls this to clean up
    /// superseded outputs and should not fail if a previous attempt already removed them).
    async fn delete(&mut self, id: OutputStoreId) -> Result<()>;
}

/// A reasonable default compression level for server-generated outputs (stdout/stderr/error),
/// matching zstd's own default level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Compress `data` with `algorithm` at `level`.
pub fn compress(algorithm: CompressionAlgorithm, level: i32, data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zstd => {
            zstd::stream::encode_all(data, level).map_err(|e| crate::Error::Unsupported {
                detail: format!("zstd compression failed: {e}"),
            })
        }
        CompressionAlgorithm::Gzip => {
            let compression = flate2::Compression::new(level.clamp(0, 9) as u32);
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), compression);
            encoder
                .write_all(data)
                .map_err(|e| crate::Error::Unsupported {
                    detail: format!("gzip compression failed: {e}"),
                })?;
            encoder.finish().map_err(|e| crate::Error::Unsupported {
                detail: format!("gzip compression failed: {e}"),
            })
        }
        CompressionAlgorithm::Lzma => Err(crate::Error::Unsupported {
            detail: "lzma compression is not implemented".to_string(),
        }),
    }
}

/// Decompress `data`, previously compressed with `algorithm`.
pub fn decompress(algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zstd => {
            zstd::stream::decode_all(data).map_err(|e| crate::Error::Unsupported {
                detail: format!("zstd decompression failed: {e}"),
            })
        }
        CompressionAlgorithm::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| crate::Error::Unsupported {
                    detail: format!("gzip decompression failed: {e}"),
                })?;
            Ok(out)
        }
        CompressionAlgorithm::Lzma => Err(crate::Error::Unsupported {
            detail: "lzma decompression is not implemented".to_string(),
        }),
    }
}

#[async_trait]
impl OutputStoreRepo for PostgresTxn {
    async fn insert(
        &mut self,
        output_type: OutputType,
        compression: CompressionAlgorithm,
        compression_level: i32,
        data: &[u8],
    ) -> Result<OutputStoreId> {
        let compressed = compress(compression, compression_level, data)?;
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO output_store (output_type, compression, compression_level, data)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(output_type_str(output_type))
        .bind(compression_str(compression))
        .bind(compression_level)
        .bind(compressed)
        .fetch_one(self.conn())
        .await?;
        Ok(OutputStoreId(row.0))
    }

    async fn get(&mut self, id: OutputStoreId) -> Result<Option<OutputStoreEntry>> {
        let row = sqlx::query_as::<_, (i64, String, String, i32, Vec<u8>)>(
            r#"SELECT id, output_type, compression, compression_level, data FROM output_store WHERE id = $1"#,
        )
        .bind(id.get())
        .fetch_optional(self.conn())
        .await?;
        Ok(row.map(|(id, output_type, compression, compression_level, data)| OutputStoreEntry {
            id: Some(OutputStoreId(id)),
            output_type: parse_output_type(&output_type),
            compression: parse_compression(&compression),
            compression_level,
            data,
        }))
    }

    async fn append(&mut self, id: OutputStoreId, more: &[u8]) -> Result<()> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| crate::Error::NotFound {
                kind: "output_store",
                id: id.to_string(),
            })?;
        let mut plain = decompress(existing.compression, &existing.data)?;
        plain.extend_from_slice(more);
        let recompressed = compress(existing.compression, existing.compression_level, &plain)?;
        sqlx::query(r#"UPDATE output_store SET data = $1 WHERE id = $2"#)
            .bind(recompressed)
            .bind(id.get())
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn delete(&mut self, id: OutputStoreId) -> Result<()> {
        sqlx::query(r#"DELETE FROM output_store WHERE id = $1"#)
            .bind(id.get())
            .execute(self.conn())
            .await?;
        Ok(())
    }
}

fn output_type_str(t: OutputType) -> &'static str {
    match t {
        OutputType::Stdout => "stdout",
        OutputType::Stderr => "stderr",
        OutputType::Error => "error",
    }
}

fn parse_output_type(s: &str) -> OutputType {
    match s {
        "stderr" => OutputType::Stderr,
        "error" => OutputType::Error,
        _ => OutputType::Stdout,
    }
}

fn compression_str(c: CompressionAlgorithm) -> &'static str {
    match c {
        CompressionAlgorithm::None => "none",
        CompressionAlgorithm::Zstd => "zstd",
        CompressionAlgorithm::Gzip => "gzip",
        CompressionAlgorithm::Lzma => "lzma",
    }
}

fn parse_compression(s: &str) -> CompressionAlgorithm {
    match s {
        "zstd" => CompressionAlgorithm::Zstd,
        "gzip" => CompressionAlgorithm::Gzip,
        "lzma" => CompressionAlgorithm::Lzma,
        _ => CompressionAlgorithm::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zstd_round_trips() {
        let data = b"hello world, this is compute output";
        let compressed = compress(CompressionAlgorithm::Zstd, DEFAULT_COMPRESSION_LEVEL, data).unwrap();
        let plain = decompress(CompressionAlgorithm::Zstd, &compressed).unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"some stderr output\nwith multiple lines\n";
        let compressed = compress(CompressionAlgorithm::Gzip, DEFAULT_COMPRESSION_LEVEL, data).unwrap();
        let plain = decompress(CompressionAlgorithm::Gzip, &compressed).unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn gzip_honors_requested_level() {
        let data = b"some stderr output\nwith multiple lines\n".repeat(64);
        let low = compress(CompressionAlgorithm::Gzip, 1, &data).unwrap();
        let high = compress(CompressionAlgorithm::Gzip, 9, &data).unwrap();
        assert_eq!(decompress(CompressionAlgorithm::Gzip, &low).unwrap(), data);
        assert_eq!(decompress(CompressionAlgorithm::Gzip, &high).unwrap(), data);
    }

    #[test]
    fn none_is_identity() {
        let data = b"raw bytes";
        let compressed = compress(CompressionAlgorithm::None, DEFAULT_COMPRESSION_LEVEL, data).unwrap();
        assert_eq!(compressed, data);
    }

    #[test]
    fn lzma_is_unsupported() {
        assert!(compress(CompressionAlgorithm::Lzma, DEFAULT_COMPRESSION_LEVEL, b"x").is_err());
    }
}
