//! Error types for decoding operations.

use std::fmt;

/// Errors that can occur while decoding metadata or particle payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input buffer is too small for the expected data.
    BufferTooSmall { expected: usize, actual: usize },
    /// Invalid data format or structure.
    InvalidFormat {
        context: &'static str,
        detail: String,
    },
    /// The stream declares a version this crate cannot read.
    UnsupportedVersion { context: &'static str, version: i32 },
    /// Bytes left over after the declared number of records.
    TrailingBytes { context: &'static str, count: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { expected, actual } => {
                write!(
                    f,
                    "buffer too small: expected {expected} bytes, got {actual}"
                )
            }
            Self::InvalidFormat { context, detail } => {
                write!(f, "invalid format in {context}: {detail}")
            }
            Self::UnsupportedVersion { context, version } => {
                write!(f, "unsupported {context} version {version}")
            }
            Self::TrailingBytes { context, count } => {
                write!(f, "{count} trailing bytes after {context}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
