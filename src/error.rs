//! Error types for stowage

use thiserror::Error;

/// Result type alias for stowage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error types that can occur while uploading, resolving or caching content
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Metadata service error: {0}")]
    Metadata(String),

    #[error("Metadata service rejected request: {message} ({code})")]
    MetadataRejected { code: String, message: String },

    #[error("Transfer failed: {message}")]
    Transport { status: Option<u16>, message: String },

    #[error("Origin request failed: {message}")]
    Origin { status: Option<u16>, message: String },

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err.to_string())
    }
}

impl StorageError {
    /// Whether this failure happened while talking to the source URL rather
    /// than to the cache backend.
    pub fn is_origin_error(&self) -> bool {
        matches!(self, StorageError::Origin { .. })
    }

    /// HTTP status returned by the origin, if the origin answered at all
    pub fn origin_status(&self) -> Option<u16> {
        match self {
            StorageError::Origin { status, .. } => *status,
            _ => None,
        }
    }

    /// Content did not match the digest the caller asked for
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, StorageError::DigestMismatch { .. })
    }

    /// Determine if repeating the whole operation may succeed
    ///
    /// Returns true for failures that are potentially transient:
    /// - 5xx, 408 and 429 answers from the origin or the object store
    /// - connection failures (no status)
    /// - metadata service calls that got no answer, IO and deadline errors
    /// - metadata rejections with a transient code (see [`is_transient_code`])
    ///
    /// Returns false for failures that will not change on retry:
    /// - malformed URLs, configuration and credential errors
    /// - other 4xx answers
    /// - digest mismatches
    pub fn should_retry(&self) -> bool {
        match self {
            StorageError::Origin { status, .. } | StorageError::Transport { status, .. } => {
                match status {
                    None => true,
                    Some(code) => is_transient_status(*code),
                }
            }

            StorageError::Metadata(_) => true,
            StorageError::MetadataRejected { code, .. } => is_transient_code(code),
            StorageError::IoError(_) => true,
            StorageError::DeadlineExceeded(_) => true,

            StorageError::InvalidUrl(_) => false,
            StorageError::ConfigError(_) => false,
            StorageError::Credentials(_) => false,
            StorageError::DigestMismatch { .. } => false,
        }
    }

    /// Create an origin error from a non-success HTTP status
    pub fn origin_status_error(status: u16, url: &str) -> Self {
        StorageError::Origin {
            status: Some(status),
            message: format!("{} returned status {}", url, status),
        }
    }

    /// Create an origin error for a failure without an HTTP answer
    pub fn origin_failure(message: impl Into<String>) -> Self {
        StorageError::Origin {
            status: None,
            message: message.into(),
        }
    }

    /// Create a transport error from a non-success HTTP status on a signed URL
    pub fn transport_status_error(operation: &str, status: u16) -> Self {
        StorageError::Transport {
            status: Some(status),
            message: format!("failed to {} artifact: status {}", operation, status),
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Connect error codes worth repeating a call for
pub fn is_transient_code(code: &str) -> bool {
    matches!(code, "unavailable" | "deadline_exceeded" | "resource_exhausted")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_status_error_carries_status() {
        let err = StorageError::origin_status_error(503, "https://example.com/a");
        assert!(err.is_origin_error());
        assert_eq!(err.origin_status(), Some(503));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_metadata_error_is_not_origin() {
        let err = StorageError::Metadata("unavailable".to_string());
        assert!(!err.is_origin_error());
        assert_eq!(err.origin_status(), None);
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(500));
        assert!(is_transient_status(503));
        assert!(is_transient_status(429));
        assert!(is_transient_status(408));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(403));
    }

    #[test]
    fn test_metadata_rejection_follows_code() {
        let rejected = |code: &str| StorageError::MetadataRejected {
            code: code.to_string(),
            message: "ListArtifacts: nope".to_string(),
        };
        assert!(rejected("unavailable").should_retry());
        assert!(rejected("deadline_exceeded").should_retry());
        assert!(rejected("resource_exhausted").should_retry());
        assert!(!rejected("not_found").should_retry());
        assert!(!rejected("permission_denied").should_retry());
        assert!(!rejected("unauthenticated").should_retry());
        assert!(!rejected("unavailable").is_origin_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: StorageError = io.into();
        assert!(matches!(err, StorageError::IoError(ref msg) if msg.contains("pipe closed")));
    }
}
