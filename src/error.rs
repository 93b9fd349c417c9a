//! Error types for the `applifecycle` library
//!
//! Capacity violations (`KeyTooLong`, `PayloadTooLarge`) are surfaced before
//! any shared-state mutation takes place. Race-lost registrations and stale
//! registry records are *not* errors: the registry returns the winning
//! instance's handle and silently reclaims stale slots instead.
//!
//! Error variants use `#[source]` to preserve error chains for better
//! observability and debugging.

use thiserror::Error;

use crate::registry::table::{MAX_INSTANCES, MAX_KEY_LEN};

/// Simple error type for wrapping string messages while implementing `std::error::Error`
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StringError(pub String);

impl StringError {
    /// Create a new `StringError` from a string message
    pub fn new(msg: impl Into<String>) -> Box<Self> {
        Box::new(Self(msg.into()))
    }
}

/// Main error type for `applifecycle` operations
#[derive(Debug, Error)]
pub enum AppLifecycleError {
    /// Instance key exceeds the fixed key buffer
    #[error("instance key is {length} bytes, exceeding the {MAX_KEY_LEN}-byte maximum")]
    KeyTooLong {
        /// Byte length of the rejected key
        length: usize,
    },

    /// Instance key is not usable for registration or lookup
    #[error("invalid instance key: {0}")]
    InvalidKey(String),

    /// Marshaled activation arguments exceed the fixed payload slot
    #[error(
        "marshaled activation arguments are {length} bytes, exceeding the {max}-byte payload capacity"
    )]
    PayloadTooLarge {
        /// Encoded message length that was rejected
        length: usize,
        /// Maximum encoded message length the payload slot can hold
        max: usize,
    },

    /// All registry slots are claimed by live processes
    #[error("instance registry is full ({MAX_INSTANCES} live instances)")]
    RegistryFull,

    /// OS synchronization/shared-memory primitive failed
    ///
    /// Fatal to the calling operation; indicates session-level resource
    /// exhaustion or misconfiguration, not transient contention. No retry
    /// is attempted. Preserves the underlying error source.
    #[error("platform IPC failure: {0}")]
    Platform(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Windows API error
    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsApiError(#[from] windows::core::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Operation is declared but intentionally not implemented
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// The current process has no package identity
    #[error("process has no package identity")]
    NoPackageIdentity,
}

/// Result type alias for `applifecycle` operations
pub type Result<T> = std::result::Result<T, AppLifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_too_long_display() {
        let error = AppLifecycleError::KeyTooLong { length: 300 };
        assert_eq!(
            error.to_string(),
            "instance key is 300 bytes, exceeding the 254-byte maximum"
        );
    }

    #[test]
    fn test_payload_too_large_display() {
        let error = AppLifecycleError::PayloadTooLarge {
            length: 2048,
            max: 1020,
        };
        assert!(error.to_string().contains("2048 bytes"));
        assert!(error.to_string().contains("1020-byte payload capacity"));
    }

    #[test]
    fn test_registry_full_display() {
        let error = AppLifecycleError::RegistryFull;
        assert_eq!(
            error.to_string(),
            "instance registry is full (64 live instances)"
        );
    }

    #[test]
    fn test_platform_error_preserves_source() {
        let error = AppLifecycleError::Platform(StringError::new("mapping failed"));
        assert_eq!(error.to_string(), "platform IPC failure: mapping failed");
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_error_from_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: AppLifecycleError = io_error.into();
        assert!(matches!(error, AppLifecycleError::IoError(_)));
    }

    #[test]
    fn test_not_implemented_display() {
        let error = AppLifecycleError::NotImplemented("context id to package full name lookup");
        assert!(error.to_string().starts_with("not implemented:"));
    }
}
