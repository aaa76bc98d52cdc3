//! Error types for smb-walker
//!
//! This module defines the error hierarchy that covers:
//! - Session and stream errors reported by the share client
//! - Configuration and CLI errors
//! - Completion errors raised while waiting for a walk to finish
//!
//! Library code uses thiserror; the binary wraps these with anyhow context.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the smb-walker application
#[derive(Error, Debug)]
pub enum WalkerError {
    /// Session-related errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Every producer went away before the expected number of signals arrived
    #[error("Walk ended after {received} of {expected} completion signals")]
    Incomplete { received: u64, expected: u64 },

    /// Waiting for completion exceeded the configured timeout
    #[error("Timed out after {:.1}s waiting for completion signals", .0.as_secs_f64())]
    Timeout(Duration),
}

/// Errors reported by a session or one of its streams
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Failed to parse a share URL
    #[error("Invalid share URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Connection failed
    #[error("Failed to connect to '{server}': {reason}")]
    ConnectionFailed { server: String, reason: String },

    /// Path not found
    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    /// Permission denied
    #[error("Permission denied: '{path}'")]
    PermissionDenied { path: String },

    /// Tried to list something that is not a directory
    #[error("Not a directory: '{path}'")]
    NotADirectory { path: String },

    /// Tried to read a directory as a file
    #[error("Is a directory: '{path}'")]
    IsADirectory { path: String },

    /// Directory listing failed partway
    #[error("Failed to read directory '{path}': {reason}")]
    ReadDirFailed { path: String, reason: String },

    /// File read failed partway
    #[error("Failed to read file '{path}': {reason}")]
    ReadFailed { path: String, reason: String },

    /// Operation on a session that was already closed
    #[error("Session {id} is closed")]
    Closed { id: usize },

    /// Generic protocol error with error code
    #[error("Protocol error {code}: {message}")]
    Protocol { code: i32, message: String },
}

impl SessionError {
    /// Check if this error only affects the branch that hit it
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::NotFound { .. }
                | SessionError::PermissionDenied { .. }
                | SessionError::NotADirectory { .. }
                | SessionError::IsADirectory { .. }
                | SessionError::ReadDirFailed { .. }
                | SessionError::ReadFailed { .. }
        )
    }

    /// Map an I/O error against `path` to the closest session error
    pub fn from_io(path: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SessionError::NotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => SessionError::PermissionDenied {
                path: path.to_string(),
            },
            _ => SessionError::Protocol {
                code: err.raw_os_error().unwrap_or(-1),
                message: format!("{}: {}", path, err),
            },
        }
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid session count
    #[error("Invalid session count {count}: must be between 1 and {max}")]
    InvalidSessionCount { count: usize, max: usize },

    /// Invalid chunk size
    #[error("Invalid chunk size {size}: must be between {min} and {max}")]
    InvalidChunkSize { size: usize, min: usize, max: usize },

    /// Invalid concurrency ceiling
    #[error("Invalid in-flight limit {limit}: must be at least 1")]
    InvalidInFlightLimit { limit: usize },

    /// Invalid share URL
    #[error("Invalid share URL: {0}")]
    InvalidUrl(#[from] SessionError),

    /// Invalid --mount mapping
    #[error("Invalid mount '{mount}': {reason}")]
    InvalidMount { mount: String, reason: String },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },
}

/// Result type alias for WalkerError
pub type Result<T> = std::result::Result<T, WalkerError>;

/// Result type alias for SessionError
pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_recoverable() {
        let denied = SessionError::PermissionDenied {
            path: "smb://host/share/secret".into(),
        };
        assert!(denied.is_recoverable());

        let closed = SessionError::Closed { id: 3 };
        assert!(!closed.is_recoverable());

        let conn_failed = SessionError::ConnectionFailed {
            server: "host".into(),
            reason: "refused".into(),
        };
        assert!(!conn_failed.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let err = SessionError::NotFound {
            path: "smb://host/share/missing".into(),
        };
        let walker_err: WalkerError = err.into();
        assert!(matches!(walker_err, WalkerError::Session(_)));
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(
            SessionError::from_io("smb://h/s/x", &io),
            SessionError::NotFound {
                path: "smb://h/s/x".into()
            }
        );

        let io = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            SessionError::from_io("p", &io),
            SessionError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn test_incomplete_message() {
        let err = WalkerError::Incomplete {
            received: 120,
            expected: 128,
        };
        assert_eq!(err.to_string(), "Walk ended after 120 of 128 completion signals");
    }
}
