/*!
# UMICP Compression

Algorithm-indexed compression with a size-threshold policy. ZLIB and GZIP
are always available; LZ4 is behind the `lz4` feature and degrades to
`NOT_IMPLEMENTED` when compiled out, so callers can fall back.
*/

use crate::error::{Result, UmicpError};
use crate::types::CompressionAlgorithm;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::{Read, Write};

/// Compression manager bound to one algorithm
#[derive(Debug)]
pub struct CompressionManager {
    algorithm: CompressionAlgorithm,
}

impl CompressionManager {
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        CompressionManager { algorithm }
    }

    /// Currently selected algorithm
    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    /// Switch algorithm for subsequent operations
    pub fn set_algorithm(&mut self, algorithm: CompressionAlgorithm) {
        self.algorithm = algorithm;
    }

    /// Compress `data`. `level` is algorithm specific: 0-9 for ZLIB/GZIP
    /// (default 6). LZ4 as built here has a single fast mode and treats the
    /// level as advisory. For `NONE` this is the identity.
    pub fn compress(&self, data: &[u8], level: Option<u32>) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self.algorithm {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Zlib => compress_zlib(data, level),
            CompressionAlgorithm::Gzip => compress_gzip(data, level),
            CompressionAlgorithm::Lz4 => compress_lz4(data, level),
        }
    }

    /// Decompress `data`. For `NONE` this is the identity.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self.algorithm {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Zlib => decompress_zlib(data),
            CompressionAlgorithm::Gzip => decompress_gzip(data),
            CompressionAlgorithm::Lz4 => decompress_lz4(data),
        }
    }

    /// Rough output-size estimate used for buffer pre-sizing
    pub fn estimate_compressed_size(data: &[u8], algorithm: CompressionAlgorithm) -> usize {
        match algorithm {
            CompressionAlgorithm::None => data.len(),
            CompressionAlgorithm::Zlib | CompressionAlgorithm::Gzip => data.len() / 2 + 128,
            CompressionAlgorithm::Lz4 => data.len() + data.len() / 255 + 64,
        }
    }

    /// Threshold policy: compress only payloads at least `threshold` bytes
    /// long and only when an algorithm is selected
    pub fn should_compress(
        data: &[u8],
        threshold: usize,
        algorithm: CompressionAlgorithm,
    ) -> bool {
        data.len() >= threshold && algorithm != CompressionAlgorithm::None
    }
}

fn flate_level(level: Option<u32>) -> Compression {
    match level {
        Some(n) => Compression::new(n.min(9)),
        None => Compression::default(),
    }
}

fn compress_zlib(data: &[u8], level: Option<u32>) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate_level(level));
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| UmicpError::compression(format!("zlib deflate failed: {}", e)))
}

fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| UmicpError::decompression(format!("zlib inflate failed: {}", e)))?;
    Ok(out)
}

fn compress_gzip(data: &[u8], level: Option<u32>) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate_level(level));
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| UmicpError::compression(format!("gzip deflate failed: {}", e)))
}

fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| UmicpError::decompression(format!("gzip inflate failed: {}", e)))?;
    Ok(out)
}

#[cfg(feature = "lz4")]
fn compress_lz4(data: &[u8], _level: Option<u32>) -> Result<Vec<u8>> {
    Ok(lz4_flex::compress_prepend_size(data))
}

#[cfg(feature = "lz4")]
fn decompress_lz4(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| UmicpError::decompression(format!("LZ4 decompression failed: {}", e)))
}

#[cfg(not(feature = "lz4"))]
fn compress_lz4(_data: &[u8], _level: Option<u32>) -> Result<Vec<u8>> {
    Err(UmicpError::not_implemented(
        "LZ4 support is not compiled in (enable the `lz4` feature)",
    ))
}

#[cfg(not(feature = "lz4"))]
fn decompress_lz4(_data: &[u8]) -> Result<Vec<u8>> {
    Err(UmicpError::not_implemented(
        "LZ4 support is not compiled in (enable the `lz4` feature)",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> Vec<u8> {
        // Highly repetitive, so every algorithm actually shrinks it
        b"the quick brown fox jumps over the lazy dog "
            .iter()
            .copied()
            .cycle()
            .take(4096)
            .collect()
    }

    #[test]
    fn test_zlib_round_trip() {
        let manager = CompressionManager::new(CompressionAlgorithm::Zlib);
        let data = sample_payload();
        let compressed = manager.compress(&data, None).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(manager.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_gzip_round_trip() {
        let manager = CompressionManager::new(CompressionAlgorithm::Gzip);
        let data = sample_payload();
        let compressed = manager.compress(&data, Some(9)).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(manager.decompress(&compressed).unwrap(), data);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_lz4_round_trip() {
        let manager = CompressionManager::new(CompressionAlgorithm::Lz4);
        let data = sample_payload();
        let compressed = manager.compress(&data, None).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(manager.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_none_is_identity() {
        let manager = CompressionManager::new(CompressionAlgorithm::None);
        let data = sample_payload();
        assert_eq!(manager.compress(&data, None).unwrap(), data);
        assert_eq!(manager.decompress(&data).unwrap(), data);
    }

    #[test]
    fn test_empty_input_round_trips() {
        for algorithm in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Zlib,
            CompressionAlgorithm::Gzip,
        ] {
            let manager = CompressionManager::new(algorithm);
            assert!(manager.compress(&[], None).unwrap().is_empty());
            assert!(manager.decompress(&[]).unwrap().is_empty());
        }
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let manager = CompressionManager::new(CompressionAlgorithm::Zlib);
        let err = manager.decompress(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap_err();
        assert!(matches!(err, UmicpError::DecompressionFailed { .. }));
    }

    #[test]
    fn test_should_compress_policy() {
        let big = vec![0u8; 2048];
        let small = vec![0u8; 16];
        assert!(CompressionManager::should_compress(
            &big,
            1024,
            CompressionAlgorithm::Zlib
        ));
        assert!(!CompressionManager::should_compress(
            &small,
            1024,
            CompressionAlgorithm::Zlib
        ));
        assert!(!CompressionManager::should_compress(
            &big,
            1024,
            CompressionAlgorithm::None
        ));
        // Threshold is inclusive
        assert!(CompressionManager::should_compress(
            &big,
            2048,
            CompressionAlgorithm::Gzip
        ));
    }
}
