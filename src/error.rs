//! Error types for ws-keeper.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ws_keeper::{ConnectionKey, ConnectionRegistry, Result};
//!
//! fn greet(registry: &ConnectionRegistry) -> Result<()> {
//!     registry.send(&ConnectionKey::default(), "hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`] |
//! | Connection | [`Error::NotConnected`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Transport | [`Error::Transport`], [`Error::TransportReused`], [`Error::WebSocket`] |
//! | Server | [`Error::BindConflict`] |
//! | Platform | [`Error::PermissionDenied`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ConnectionKey;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a connection config or watchdog interval is invalid.
    /// Never retried.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Server URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// No open transport for the key.
    ///
    /// Returned by send/ping/disconnect when the key is unknown or its
    /// transport is not open.
    #[error("Connection not open: {key}")]
    NotConnected {
        /// Key of the connection.
        key: ConnectionKey,
    },

    /// Connect did not complete within the configured timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The transport closed while an operation was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O failure reported by the transport.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// Connect was called on a transport that has already been used.
    ///
    /// Transports are single-use; a fresh instance must be built.
    #[error("Transport instance already used and cannot reconnect")]
    TransportReused,

    // ========================================================================
    // Server Errors
    // ========================================================================
    /// The embedded server address is already in use.
    #[error("Port {port} already in use (attempt {attempt}), next candidate port {next_port}")]
    BindConflict {
        /// Port that failed to bind.
        port: u16,
        /// Bind attempts so far.
        attempt: u32,
        /// Suggested port for the next attempt.
        next_port: u16,
    },

    // ========================================================================
    // Platform Errors
    // ========================================================================
    /// Connectivity state cannot be observed.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Description of the missing capability.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(key: &ConnectionKey) -> Self {
        Self::NotConnected { key: key.clone() }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a bind conflict error.
    #[inline]
    pub fn bind_conflict(port: u16, attempt: u32) -> Self {
        let step = u16::try_from(attempt).unwrap_or(u16::MAX);
        Self::BindConflict {
            port,
            attempt,
            next_port: port.saturating_add(step),
        }
    }

    /// Creates a permission denied error.
    #[inline]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a configuration error.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::InvalidUrl(_))
    }

    /// Returns `true` if this is a connection or transport error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Transport { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the transport must be rebuilt before connecting.
    #[inline]
    #[must_use]
    pub fn is_transport_reused(&self) -> bool {
        matches!(self, Self::TransportReused)
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Transport { .. }
                | Self::TransportReused
                | Self::WebSocket(_)
                | Self::Io(_)
                | Self::BindConflict { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::transport("connection reset");
        assert_eq!(err.to_string(), "Transport error: connection reset");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("serverUrl is required");
        assert_eq!(err.to_string(), "Configuration error: serverUrl is required");
        assert!(err.is_config_error());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_not_connected_names_key() {
        let err = Error::not_connected(&ConnectionKey::new("chat"));
        assert_eq!(err.to_string(), "Connection not open: chat");
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_bind_conflict_next_port() {
        let err = Error::bind_conflict(8800, 2);
        match err {
            Error::BindConflict {
                port,
                attempt,
                next_port,
            } => {
                assert_eq!(port, 8800);
                assert_eq!(attempt, 2);
                assert_eq!(next_port, 8802);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bind_conflict_saturates() {
        let err = Error::bind_conflict(u16::MAX, 3);
        assert!(matches!(err, Error::BindConflict { next_port, .. } if next_port == u16::MAX));
    }

    #[test]
    fn test_is_transport_reused() {
        assert!(Error::TransportReused.is_transport_reused());
        assert!(!Error::ConnectionClosed.is_transport_reused());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::AddrInUse, "address in use");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_from_url_error() {
        let parse_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = parse_err.into();
        assert!(err.is_config_error());
    }
}
