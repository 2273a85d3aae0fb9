//! LZ4 and Zstd compression for staged content.
//!
//! Remote backends apply compression before upload and reverse it after
//! download; local backends can opt in per node via the compressed flag.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use stratafs_meta::{FsError, FsResult};

/// Compression algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    /// No compression (passthrough).
    None,
    /// LZ4 frame format — fast path for large local staging files.
    Lz4,
    /// Zstandard — higher ratio, default for remote object storage.
    Zstd {
        /// Compression level (1=fastest, 19=best ratio, 3=balanced default).
        level: i32,
    },
}

impl CompressionAlgorithm {
    /// Zstd at the default balanced level.
    pub fn zstd_default() -> Self {
        CompressionAlgorithm::Zstd { level: 3 }
    }
}

impl Default for CompressionAlgorithm {
    fn default() -> Self {
        Self::zstd_default()
    }
}

/// Compress a buffer with the given algorithm.
pub fn compress(data: &[u8], algo: CompressionAlgorithm) -> FsResult<Vec<u8>> {
    match algo {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionAlgorithm::Zstd { level } => {
            zstd::encode_all(data, level).map_err(|e| FsError::Serialization {
                reason: format!("zstd compression failed: {}", e),
            })
        }
    }
}

/// Decompress a buffer using the algorithm it was compressed with.
pub fn decompress(data: &[u8], algo: CompressionAlgorithm) -> FsResult<Vec<u8>> {
    match algo {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => {
            lz4_flex::decompress_size_prepended(data).map_err(|e| FsError::Serialization {
                reason: format!("lz4 decompression failed: {}", e),
            })
        }
        CompressionAlgorithm::Zstd { .. } => {
            zstd::decode_all(data).map_err(|e| FsError::Serialization {
                reason: format!("zstd decompression failed: {}", e),
            })
        }
    }
}

/// Compress `src` into `dst`, streaming where the format allows.
/// Returns the compressed size in bytes.
pub fn compress_file(src: &Path, dst: &Path, algo: CompressionAlgorithm) -> FsResult<u64> {
    match algo {
        CompressionAlgorithm::None => Ok(std::fs::copy(src, dst)?),
        CompressionAlgorithm::Lz4 => {
            let data = std::fs::read(src)?;
            let compressed = lz4_flex::compress_prepend_size(&data);
            std::fs::write(dst, &compressed)?;
            Ok(compressed.len() as u64)
        }
        CompressionAlgorithm::Zstd { level } => {
            let reader = BufReader::new(File::open(src)?);
            let writer = BufWriter::new(File::create(dst)?);
            let mut encoder =
                zstd::stream::write::Encoder::new(writer, level).map_err(map_zstd)?;
            let mut reader = reader;
            std::io::copy(&mut reader, &mut encoder)?;
            let mut writer = encoder.finish().map_err(map_zstd)?;
            writer.flush()?;
            Ok(std::fs::metadata(dst)?.len())
        }
    }
}

/// Decompress `src` into `dst`. Returns the decompressed size in bytes.
pub fn decompress_file(src: &Path, dst: &Path, algo: CompressionAlgorithm) -> FsResult<u64> {
    match algo {
        CompressionAlgorithm::None => Ok(std::fs::copy(src, dst)?),
        CompressionAlgorithm::Lz4 => {
            let data = std::fs::read(src)?;
            let plain = decompress(&data, algo)?;
            std::fs::write(dst, &plain)?;
            Ok(plain.len() as u64)
        }
        CompressionAlgorithm::Zstd { .. } => {
            let reader = BufReader::new(File::open(src)?);
            let mut decoder = zstd::stream::read::Decoder::new(reader).map_err(map_zstd)?;
            let mut writer = BufWriter::new(File::create(dst)?);
            let n = std::io::copy(&mut decoder, &mut writer)?;
            writer.flush()?;
            Ok(n)
        }
    }
}

fn map_zstd(e: std::io::Error) -> FsError {
    FsError::Serialization {
        reason: format!("zstd stream failure: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_lz4_roundtrip(data in prop::collection::vec(0u8..=255, 0..50_000)) {
            let c = compress(&data, CompressionAlgorithm::Lz4).unwrap();
            let d = decompress(&c, CompressionAlgorithm::Lz4).unwrap();
            prop_assert_eq!(d, data);
        }
        #[test]
        fn prop_zstd_roundtrip(data in prop::collection::vec(0u8..=255, 0..50_000)) {
            let algo = CompressionAlgorithm::Zstd { level: 3 };
            let c = compress(&data, algo).unwrap();
            let d = decompress(&c, algo).unwrap();
            prop_assert_eq!(d, data);
        }
    }

    #[test]
    fn test_empty_roundtrips() {
        for algo in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Lz4,
            CompressionAlgorithm::Zstd { level: 3 },
        ] {
            let c = compress(&[], algo).unwrap();
            let d = decompress(&c, algo).unwrap();
            assert_eq!(d, b"");
        }
    }

    #[test]
    fn test_file_roundtrip_zstd() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("plain");
        let packed = dir.path().join("packed");
        let restored = dir.path().join("restored");

        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &content).unwrap();

        let algo = CompressionAlgorithm::Zstd { level: 3 };
        let packed_len = compress_file(&src, &packed, algo).unwrap();
        assert_eq!(packed_len, std::fs::metadata(&packed).unwrap().len());
        assert!(packed_len < content.len() as u64);

        let restored_len = decompress_file(&packed, &restored, algo).unwrap();
        assert_eq!(restored_len, content.len() as u64);
        assert_eq!(std::fs::read(&restored).unwrap(), content);
    }

    #[test]
    fn test_file_roundtrip_lz4_and_none() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("plain");
        std::fs::write(&src, b"staging file content").unwrap();

        for algo in [CompressionAlgorithm::Lz4, CompressionAlgorithm::None] {
            let packed = dir.path().join(format!("packed-{:?}", algo));
            let restored = dir.path().join(format!("restored-{:?}", algo));
            compress_file(&src, &packed, algo).unwrap();
            decompress_file(&packed, &restored, algo).unwrap();
            assert_eq!(std::fs::read(&restored).unwrap(), b"staging file content");
        }
    }

    #[test]
    fn test_corrupt_input_fails_typed() {
        let err = decompress(b"definitely not zstd", CompressionAlgorithm::Zstd { level: 3 });
        assert!(err.is_err());
    }
}
