/*!
Whole-buffer compression adapters for slot files.

Slot files hold one zstd frame after the header. The streaming pipeline in
[`crate::pipeline`] produces the same frame format incrementally; this module
covers the simple case where the whole state is already in memory.
*/

use std::io::Read;

use crate::{Result, SnapshotError};

/// Compression abstraction for snapshot payloads
///
/// This trait defines the interface for all compression implementations.
/// It allows the snapshot engine to work with different compression algorithms
/// without being coupled to any specific implementation.
pub trait CompressionAdapter {
    /// Compress the input data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress the input data, failing with
    /// [`SnapshotError::SizeLimitExceeded`] once the output passes `max_size`
    fn decompress(&self, compressed_data: &[u8], max_size: usize) -> Result<Vec<u8>>;

    /// Get the name of the compression algorithm
    fn algorithm_name(&self) -> &str;
}

/// Zstandard compression adapter
///
/// # Example
/// ```rust
/// use savestate_core::compression::{CompressionAdapter, ZstdCompressor};
///
/// let compressor = ZstdCompressor::new();
/// let data = b"emulated memory, emulated memory, emulated memory";
/// let compressed = compressor.compress(data)?;
/// let decompressed = compressor.decompress(&compressed, 1024)?;
/// assert_eq!(data, &decompressed[..]);
/// # Ok::<(), savestate_core::SnapshotError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    /// Create a new compressor with the zstd default level
    pub fn new() -> Self {
        Self {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Create a new compressor with the specified level
    ///
    /// Levels outside zstd's supported range are clamped by the library.
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::bulk::compress(data, self.level)
            .map_err(|e| SnapshotError::compression(format!("Failed to compress state: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8], max_size: usize) -> Result<Vec<u8>> {
        let decoder = zstd::stream::read::Decoder::with_buffer(compressed_data).map_err(|e| {
            SnapshotError::decompression(format!("Failed to create decoder: {e}"))
        })?;

        // one byte past the limit tells an oversized state from one that fits exactly
        let mut decompressed = Vec::new();
        decoder
            .take((max_size as u64).saturating_add(1))
            .read_to_end(&mut decompressed)
            .map_err(|e| SnapshotError::decompression(format!("Failed to decompress state: {e}")))?;

        if decompressed.len() > max_size {
            return Err(SnapshotError::SizeLimitExceeded {
                size: decompressed.len(),
                limit: max_size,
            });
        }
        Ok(decompressed)
    }

    fn algorithm_name(&self) -> &str {
        "zstd"
    }
}

/// No-compression adapter for testing
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl CompressionAdapter for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8], max_size: usize) -> Result<Vec<u8>> {
        if compressed_data.len() > max_size {
            return Err(SnapshotError::SizeLimitExceeded {
                size: compressed_data.len(),
                limit: max_size,
            });
        }
        Ok(compressed_data.to_vec())
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_compression_roundtrip() {
        let compressor = ZstdCompressor::new();
        let original_data = b"VRAM tile data repeats a lot in practice. ".repeat(100);

        let compressed = compressor.compress(&original_data).unwrap();
        assert!(compressed.len() < original_data.len());

        let decompressed = compressor
            .decompress(&compressed, original_data.len())
            .unwrap();
        assert_eq!(original_data, decompressed);
    }

    #[test]
    fn test_zstd_levels_roundtrip() {
        let test_data = b"Some register file contents".repeat(50);

        for compressor in [
            ZstdCompressor::with_level(1),
            ZstdCompressor::new(),
            ZstdCompressor::with_level(19),
        ] {
            let compressed = compressor.compress(&test_data).unwrap();
            assert_eq!(
                compressor.decompress(&compressed, usize::MAX - 1).unwrap(),
                test_data
            );
        }
    }

    #[test]
    fn test_zstd_decompress_enforces_limit() {
        let compressor = ZstdCompressor::new();
        let data = vec![0u8; 4096];
        let compressed = compressor.compress(&data).unwrap();

        assert!(compressor.decompress(&compressed, 4096).is_ok());
        let err = compressor.decompress(&compressed, 4095).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::SizeLimitExceeded { limit: 4095, .. }
        ));
    }

    #[test]
    fn test_zstd_decompress_without_limit() {
        let compressor = ZstdCompressor::new();
        let data = b"vram bank".repeat(100);
        let compressed = compressor.compress(&data).unwrap();

        assert_eq!(compressor.decompress(&compressed, usize::MAX).unwrap(), data);
    }

    #[test]
    fn test_zstd_empty_data() {
        let compressor = ZstdCompressor::new();
        let compressed = compressor.compress(b"").unwrap();
        assert!(compressor.decompress(&compressed, 0).unwrap().is_empty());
    }

    #[test]
    fn test_zstd_invalid_compressed_data() {
        let compressor = ZstdCompressor::new();
        let result = compressor.decompress(b"this is not a zstd frame", 1024);
        assert!(matches!(result, Err(SnapshotError::Decompression(_))));
    }

    #[test]
    fn test_no_compression() {
        let compressor = NoCompression::new();
        let compressed = compressor.compress(b"test data").unwrap();
        assert_eq!(compressed, b"test data");
        assert_eq!(compressor.decompress(&compressed, 9).unwrap(), b"test data");
        assert!(compressor.decompress(&compressed, 8).is_err());
        assert_eq!(compressor.algorithm_name(), "none");
    }
}
