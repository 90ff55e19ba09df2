//! WebSocket transport layer.
//!
//! This module defines the transport capability the connection registry
//! drives, the default `tokio-tungstenite` implementation, and the embedded
//! server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   create(config, handler)   ┌──────────────────┐
//! │  ConnectionRegistry  │ ──────────────────────────► │ TransportFactory │
//! │                      │                             └────────┬─────────┘
//! │  ManagedConnection   │   connect / send / close             │
//! │  → Arc<dyn Transport>│ ◄────────────────────────────────────┘
//! │                      │   on_open / on_close / ...  ┌──────────────────┐
//! │  ConnectionEvents    │ ◄────────────────────────── │   WsTransport    │
//! └──────────────────────┘                             └──────────────────┘
//! ```
//!
//! # Single-use contract
//!
//! A transport moves `Fresh → Connecting → Open → Closing → Closed` exactly
//! once. Once it has left `Fresh` it never connects again; `connect` returns
//! [`Error::TransportReused`](crate::Error::TransportReused) and the owner
//! builds a replacement through the factory.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `socket` | `tokio-tungstenite` client transport and event loop |
//! | `server` | Embedded WebSocket server |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::listener::{DisconnectReason, Payload};

// ============================================================================
// Submodules
// ============================================================================

/// Client transport over `tokio-tungstenite`.
pub mod socket;

/// Embedded WebSocket server.
pub mod server;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use server::{BindAttempts, EmbeddedServer};
pub use socket::{WsTransport, WsTransportFactory};

// ============================================================================
// TransportState
// ============================================================================

/// Lifecycle of one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Never connected.
    Fresh,
    /// Handshake in progress.
    Connecting,
    /// Open for traffic.
    Open,
    /// Close requested, waiting for the peer.
    Closing,
    /// Closed. Terminal.
    Closed,
}

impl TransportState {
    /// Returns `true` for states that hold or are acquiring a socket.
    #[inline]
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Closing)
    }

    /// Returns `true` if the instance may still connect.
    #[inline]
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fresh => "fresh",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// A single-use bidirectional message socket.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Current state.
    fn state(&self) -> TransportState;

    /// Connects and resolves once the socket is open or has failed.
    ///
    /// Failures are reported to the handler (`on_error` then `on_close`)
    /// before this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportReused`] if the instance is not `Fresh`
    /// - [`Error::ConnectionTimeout`] if the handshake exceeds the timeout
    /// - [`Error::WebSocket`] / [`Error::Transport`] on I/O failure
    async fn connect(&self) -> Result<()>;

    /// Queues a message. Completion is reported through `on_sent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the transport is not open.
    fn send(&self, payload: Payload) -> Result<()>;

    /// Queues a ping frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the transport is not open.
    fn ping(&self) -> Result<()>;

    /// Requests a graceful close without waiting.
    fn close(&self);

    /// Closes and waits until the transport reaches `Closed`.
    async fn close_blocking(&self);

    /// Returns `true` if the transport is open.
    fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Returns `true` if the transport has closed.
    fn is_closed(&self) -> bool {
        self.state() == TransportState::Closed
    }
}

/// Receives events from one transport instance.
///
/// Calls for a given transport are sequential. `on_close` is delivered at
/// most once.
pub trait TransportHandler: Send + Sync {
    /// Socket opened.
    fn on_open(&self);
    /// Inbound message.
    fn on_message(&self, payload: Payload);
    /// Socket closed. Terminal.
    fn on_close(&self, reason: DisconnectReason);
    /// I/O failure.
    fn on_error(&self, error: &Error);
    /// Inbound ping.
    fn on_ping(&self, data: &[u8]);
    /// Inbound pong.
    fn on_pong(&self, data: &[u8]);
    /// Outbound message written.
    fn on_sent(&self, payload: &Payload);
}

/// Builds transport instances for a configuration.
pub trait TransportFactory: Send + Sync {
    /// Creates a fresh, unconnected transport.
    ///
    /// Must not connect or call back into the handler.
    fn create(
        &self,
        config: Arc<ConnectionConfig>,
        handler: Arc<dyn TransportHandler>,
    ) -> Arc<dyn Transport>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(TransportState::Fresh.is_fresh());
        assert!(!TransportState::Fresh.is_live());
        assert!(TransportState::Connecting.is_live());
        assert!(TransportState::Open.is_live());
        assert!(TransportState::Closing.is_live());
        assert!(!TransportState::Closed.is_live());
        assert!(!TransportState::Closed.is_fresh());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TransportState::Open.to_string(), "open");
        assert_eq!(TransportState::Closed.to_string(), "closed");
    }
}
