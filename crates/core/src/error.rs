// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for mediagraph.
//!
//! Façade-facing operations return [`MediaGraphError`]. Failures that happen on
//! the engine actor are never returned this way; they are converted into an
//! `Error` transport state plus an [`ErrorKind`](crate::state::ErrorKind) and
//! message that callers read back from the stream snapshot.

use thiserror::Error;

/// Main error type for mediagraph operations.
#[derive(Debug, Error)]
pub enum MediaGraphError {
    /// Configuration or parameter validation error.
    ///
    /// Examples:
    /// - Unknown device index for an output
    /// - Negative capacities in the engine configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Topology change rejected by the node graph.
    ///
    /// Examples:
    /// - Connecting a sink-only node as a source
    /// - Sink input already fed by another source
    /// - Stream types of the two nodes do not intersect
    #[error("Topology error: {0}")]
    Topology(String),

    /// The native engine (or the engine actor) failed to perform an operation.
    #[error("Engine error: {0}")]
    Engine(String),

    /// I/O error (file operations, device access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource exhaustion or limit exceeded.
    ///
    /// Examples:
    /// - Control channel full
    /// - Too many terminus handles for a device
    #[error("Resource exhaustion: {0}")]
    ResourceExhausted(String),

    /// The engine actor has shut down and can no longer accept requests.
    #[error("Engine actor has shut down")]
    Shutdown,
}

/// Convenience type alias for Results using `MediaGraphError`.
pub type Result<T> = std::result::Result<T, MediaGraphError>;

impl From<MediaGraphError> for String {
    fn from(err: MediaGraphError) -> Self {
        err.to_string()
    }
}

// Bare strings are engine failures; topology and configuration errors are always
// constructed explicitly.
impl From<String> for MediaGraphError {
    fn from(s: String) -> Self {
        Self::Engine(s)
    }
}

impl From<&str> for MediaGraphError {
    fn from(s: &str) -> Self {
        Self::Engine(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MediaGraphError::Topology("sink already connected".to_string());
        assert_eq!(err.to_string(), "Topology error: sink already connected");

        assert_eq!(MediaGraphError::Shutdown.to_string(), "Engine actor has shut down");
    }

    #[test]
    fn test_string_to_error_conversion() {
        let err: MediaGraphError = "open failed".into();
        assert!(matches!(err, MediaGraphError::Engine(_)));
        assert_eq!(err.to_string(), "Engine error: open failed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: MediaGraphError = io_err.into();
        let s: String = err.into();
        assert!(s.contains("I/O error"));
        assert!(s.contains("File not found"));
    }
}
