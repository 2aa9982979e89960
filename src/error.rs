//! Error types for pkzip-core

use std::io;

/// Result type for pkzip-core operations
pub type Result<T> = std::result::Result<T, SZipError>;

/// Error types that can occur during ZIP operations
#[derive(Debug)]
pub enum SZipError {
    /// I/O error from the underlying byte source or sink
    Io(io::Error),
    /// Archive is corrupt, truncated, structurally invalid, or a spec
    /// constraint on the input was violated (oversize name, NUL in name,
    /// use of a closed reader/writer, etc.)
    FormatError(String),
    /// Entry not found in ZIP archive
    EntryNotFound(String),
    /// Compression method, open mode, or other archive feature is not
    /// supported by this implementation (encryption, BZIP2, LZMA, ...)
    UnsupportedFeature(String),
    /// Decompressed bytes' CRC-32 did not match the entry's recorded CRC-32
    CrcError {
        /// CRC-32 recorded in the central directory
        expected: u32,
        /// CRC-32 computed from the decompressed bytes
        actual: u32,
    },
    /// The deflate stream was rejected by the decompressor, or unused bytes
    /// remained after the stream ended
    CompressionError(String),
}

impl std::fmt::Display for SZipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SZipError::Io(e) => write!(f, "I/O error: {}", e),
            SZipError::FormatError(msg) => write!(f, "invalid ZIP format: {}", msg),
            SZipError::EntryNotFound(name) => write!(f, "entry not found: {}", name),
            SZipError::UnsupportedFeature(msg) => write!(f, "unsupported feature: {}", msg),
            SZipError::CrcError { expected, actual } => write!(
                f,
                "CRC-32 mismatch: expected 0x{:08x}, got 0x{:08x}",
                expected, actual
            ),
            SZipError::CompressionError(msg) => write!(f, "compression error: {}", msg),
        }
    }
}

impl std::error::Error for SZipError {}

impl From<io::Error> for SZipError {
    fn from(err: io::Error) -> Self {
        SZipError::Io(err)
    }
}
