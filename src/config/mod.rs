//! Connection configuration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Immutable [`ConnectionConfig`] and [`ProtocolDraft`] |
//! | `builder` | Fluent [`ConnectionConfigBuilder`] with validation |
//! | `options` | Serde-friendly [`ConnectionOptions`] |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder with validation.
pub mod builder;

/// Immutable connection configuration.
pub mod connection;

/// Serializable options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionConfigBuilder;
pub use connection::{
    ConnectionConfig, DEFAULT_PING_INTERVAL_SECS, DEFAULT_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_INTERVAL, ProtocolDraft,
};
pub use options::ConnectionOptions;
