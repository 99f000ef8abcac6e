//! Error types shared by every profiler component

use std::fmt;

/// Result of profiler operations
pub type ProfilerResult<T> = Result<T, ProfilerError>;

/// Errors surfaced to the immediate caller.
///
/// Bookkeeping anomalies (see [`Mismatch`]) are never returned through this
/// type; they are absorbed by the tracker and only logged.
#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    /// Empty or malformed identifier passed to a tracker operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payload bytes are not a readable session payload
    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),

    /// Payload carries a schema version this reader does not understand
    #[error("Unsupported payload version {found} (supported: 1..={supported})")]
    UnsupportedVersion {
        /// Version found in the payload
        found: u32,
        /// Highest version this build can read
        supported: u32,
    },

    /// The backing resource could not be opened, read or written
    #[error("Storage unavailable for '{resource}': {source}")]
    StorageUnavailable {
        /// Identifier of the resource
        resource: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A configuration option holds a value of the wrong type
    #[error("Invalid value '{value}' for option '{name}'")]
    Config {
        /// Option name
        name: String,
        /// Raw value as provided
        value: String,
    },

    /// An option file could not be parsed
    #[error("Invalid configuration file: {0}")]
    ConfigFile(String),
}

impl ProfilerError {
    pub(crate) fn storage(resource: impl Into<String>, source: std::io::Error) -> Self {
        Self::StorageUnavailable {
            resource: resource.into(),
            source,
        }
    }

    /// Whether the error came from a corrupt or unreadable payload
    pub fn is_serialization(&self) -> bool {
        matches!(
            self,
            Self::Serialization(_) | Self::CorruptPayload(_) | Self::UnsupportedVersion { .. }
        )
    }
}

/// Non-fatal inconsistency between begin and end notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// An end arrived for a key that was never started (late attach)
    MissingBegin,
    /// An end arrived for a key that was already closed
    DuplicateEnd,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBegin => write!(f, "end without matching begin"),
            Self::DuplicateEnd => write!(f, "duplicate end"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_message() {
        let err = ProfilerError::storage(
            "file:/tmp/session.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("file:/tmp/session.json"));
        assert!(!err.is_serialization());
    }

    #[test]
    fn test_version_error_is_serialization() {
        let err = ProfilerError::UnsupportedVersion {
            found: 9,
            supported: 2,
        };
        assert!(err.is_serialization());
        assert!(err.to_string().contains('9'));
    }
}
