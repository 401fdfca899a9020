//! Error types for the lodstar crate.

use std::fmt;
use std::path::PathBuf;

/// Result type for lodstar operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, writing or reading an octree.
#[derive(Debug)]
pub enum Error {
    /// The input catalog cannot be turned into an octree.
    Catalog {
        /// Description of the problem.
        detail: String,
    },
    /// Filesystem operation failed.
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// Persisted metadata does not describe a well-formed tree.
    Integrity {
        /// Context for where the error occurred.
        context: &'static str,
        /// Description of what was inconsistent.
        detail: String,
    },
    /// Byte-level decoding failed.
    Decode(lodstar_codec::DecodeError),
    /// An octant id derived during descent disagrees with its path.
    IdMismatch {
        /// Id computed from the descent.
        computed: u64,
        /// Id implied by the point's octant-index path.
        expected: u64,
    },
    /// Build or runtime parameters are out of range.
    InvalidParams {
        /// Description of the offending parameter.
        detail: String,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Catalog { detail } => write!(f, "invalid catalog: {detail}"),
            Error::Io { path, source } => {
                write!(f, "i/o error on {}: {source}", path.display())
            }
            Error::Integrity { context, detail } => {
                write!(f, "corrupt {context}: {detail}")
            }
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::IdMismatch { computed, expected } => {
                write!(
                    f,
                    "octant id mismatch: descent produced {computed}, path implies {expected}"
                )
            }
            Error::InvalidParams { detail } => write!(f, "invalid parameters: {detail}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<lodstar_codec::DecodeError> for Error {
    fn from(e: lodstar_codec::DecodeError) -> Self {
        Error::Decode(e)
    }
}
