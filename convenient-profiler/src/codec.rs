//! Compression of persisted session payloads

use std::io;

/// Zstandard frame magic
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Payload compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain JSON
    None,
    /// Zstandard-compressed JSON
    #[default]
    Zstd,
}

impl Compression {
    /// Recommended compression level
    pub fn default_level(&self) -> i32 {
        match self {
            Self::None => 0,
            Self::Zstd => 3, // Balance speed/compression
        }
    }

    /// Detect compression from magic bytes
    pub fn detect(data: &[u8]) -> Self {
        if data.len() >= 4 && data[0..4] == ZSTD_MAGIC {
            Self::Zstd
        } else {
            Self::None
        }
    }
}

/// Compress a payload
pub fn compress(data: &[u8], compression: Compression) -> io::Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Zstd => zstd::encode_all(data, compression.default_level()),
    }
}

/// Decompress a payload, whatever compression it was written with
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    match Compression::detect(data) {
        Compression::None => Ok(data.to_vec()),
        Compression::Zstd => zstd::decode_all(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(Compression::detect(b"{\"version\":2}"), Compression::None);
        assert_eq!(Compression::detect(b""), Compression::None);
        let packed = compress(b"{}", Compression::Zstd).unwrap();
        assert_eq!(Compression::detect(&packed), Compression::Zstd);
    }

    #[test]
    fn test_zstd_shrinks_repetitive_payload() {
        let data = "{\"id\":\"compile\"},".repeat(500);
        let packed = compress(data.as_bytes(), Compression::Zstd).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data.as_bytes());
    }

    #[test]
    fn test_corrupt_frame_is_error() {
        let mut packed = compress(b"{\"version\":2}", Compression::Zstd).unwrap();
        packed.truncate(6);
        assert!(decompress(&packed).is_err());
    }
}
