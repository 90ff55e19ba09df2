//! ws-keeper - Resilient keyed WebSocket connections.
//!
//! This library keeps a set of named WebSocket client connections alive
//! across network drops, server restarts and connectivity changes, and can
//! run a small embedded WebSocket server next to them.
//!
//! # Architecture
//!
//! Every connection is registered under a [`ConnectionKey`] with an
//! immutable [`ConnectionConfig`]:
//!
//! - **Registry**: [`ConnectionRegistry`] owns the keyed connections and is
//!   the only entry point
//! - **Transport**: single-use sockets built by a [`TransportFactory`]; a
//!   closed transport is always replaced, never reused
//! - **Recovery**: a per-key reconnect cycle on close, a network monitor that
//!   restarts cycles when connectivity returns, and a coarse guardian
//!   watchdog
//!
//! Key design principles:
//!
//! - At most one live transport per key
//! - Callbacks from superseded transports are ignored
//! - No lock is held across an `.await` or while calling user code
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ws_keeper::{
//!     ConnectionConfig, ConnectionKey, ConnectionListener, ConnectionRegistry, Payload, Result,
//! };
//!
//! struct Printer;
//!
//! impl ConnectionListener for Printer {
//!     fn on_message(&self, key: &ConnectionKey, payload: &Payload) {
//!         println!("[{key}] {payload:?}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = ConnectionRegistry::new()?;
//!
//!     let key = registry.init(
//!         ConnectionConfig::builder("ws://127.0.0.1:8800")
//!             .key("feed")
//!             .reconnect_attempts(5)
//!             .listener(Arc::new(Printer))
//!             .build()?,
//!     );
//!     registry.start().await;
//!
//!     registry.send(&key, "subscribe")?;
//!
//!     registry.destroy().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Connection configuration and builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`listener`] | Listener capabilities and payload types |
//! | [`logging`] | Verbose diagnostics switch |
//! | [`manager`] | Registry, reconnect cycles, guardian |
//! | [`network`] | Network observers |
//! | [`transport`] | WebSocket transport and embedded server |

// ============================================================================
// Modules
// ============================================================================

/// Connection configuration.
///
/// Use [`ConnectionConfig::builder()`] to create a validated configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for connections and server peers.
pub mod identifiers;

/// Listener capabilities.
///
/// - [`ConnectionListener`] - Events of managed client connections
/// - [`ServerListener`] - Events of the embedded server
pub mod listener;

/// Verbose diagnostics switch.
pub mod logging;

/// Connection management.
///
/// Use [`ConnectionRegistry::new()`] or [`ConnectionRegistry::builder()`].
pub mod manager;

/// Network availability observation.
pub mod network;

/// WebSocket transport layer.
///
/// Defines the transport capability, the `tokio-tungstenite` client and the
/// embedded server.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration types
pub use config::{
    ConnectionConfig, ConnectionConfigBuilder, ConnectionOptions, DEFAULT_PING_INTERVAL_SECS,
    DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL, ProtocolDraft,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionKey, PeerId};

// Listener types
pub use listener::{ConnectionListener, DisconnectReason, NoopListener, Payload, ServerListener};

// Manager types
pub use manager::{
    ConnectionInfo, ConnectionRegistry, ConnectionState, DEFAULT_GUARDIAN_INTERVAL,
    RegistryBuilder, SchedulerState, Trigger,
};

// Network types
pub use network::{
    ManualNetworkObserver, NetworkCallback, NetworkCapability, NetworkObserver, NetworkStatus,
    ProbeNetworkObserver,
};

// Transport types
pub use transport::{
    BindAttempts, EmbeddedServer, Transport, TransportFactory, TransportHandler, TransportState,
    WsTransport, WsTransportFactory,
};
