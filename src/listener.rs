//! Listener capabilities exposed to callers.
//!
//! [`ConnectionListener`] receives events for managed client connections,
//! [`ServerListener`] receives events from the embedded server. Every method
//! has a no-op default so callers implement only what they need.
//!
//! Listener methods are called from transport tasks. They must not block and
//! must not call back into the registry synchronously from `on_disconnected`
//! in a way that waits on the same connection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;

use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::error::Error;
use crate::identifiers::{ConnectionKey, PeerId};

// ============================================================================
// Payload
// ============================================================================

/// A message carried over a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the text content, if this is a text payload.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the payload size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts into a WebSocket message.
    pub(crate) fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.into()),
            Self::Binary(bytes) => Message::Binary(bytes.into()),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

// ============================================================================
// DisconnectReason
// ============================================================================

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// WebSocket close code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
    /// `true` if the remote peer initiated the close.
    pub remote: bool,
}

impl DisconnectReason {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Close frame carried no status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;

    /// Creates a reason.
    #[inline]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>, remote: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            remote,
        }
    }

    /// Locally initiated normal closure.
    #[inline]
    #[must_use]
    pub fn normal() -> Self {
        Self::new(Self::NORMAL, "", false)
    }

    /// Abnormal closure with a description.
    #[inline]
    #[must_use]
    pub fn abnormal(reason: impl Into<String>, remote: bool) -> Self {
        Self::new(Self::ABNORMAL, reason, remote)
    }

    /// Builds a reason from a received close frame.
    pub(crate) fn from_frame(frame: Option<CloseFrame>, remote: bool) -> Self {
        match frame {
            Some(frame) => Self::new(u16::from(frame.code), frame.reason.as_str(), remote),
            None => Self::new(Self::NO_STATUS, "", remote),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.remote { "remote" } else { "local" };
        if self.reason.is_empty() {
            write!(f, "{} ({side})", self.code)
        } else {
            write!(f, "{} {} ({side})", self.code, self.reason)
        }
    }
}

// ============================================================================
// ConnectionListener
// ============================================================================

/// Events for a managed client connection.
pub trait ConnectionListener: Send + Sync {
    /// The transport opened.
    fn on_connected(&self, _key: &ConnectionKey) {}

    /// A graceful close was requested via `disconnect`.
    fn on_closing(&self, _key: &ConnectionKey) {}

    /// The transport closed.
    fn on_disconnected(&self, _key: &ConnectionKey, _reason: &DisconnectReason) {}

    /// The transport reported a failure.
    ///
    /// Connect failures are followed by `on_disconnected`.
    fn on_error(&self, _key: &ConnectionKey, _error: &Error) {}

    /// A message arrived.
    fn on_message(&self, _key: &ConnectionKey, _payload: &Payload) {}

    /// The peer sent a ping. The pong reply is automatic.
    fn on_ping(&self, _key: &ConnectionKey, _data: &[u8]) {}

    /// The peer answered a ping.
    fn on_pong(&self, _key: &ConnectionKey, _data: &[u8]) {}

    /// A message was written to the socket.
    fn on_send_succeeded(&self, _key: &ConnectionKey, _payload: &Payload) {}
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl ConnectionListener for NoopListener {}

impl ServerListener for NoopListener {}

// ============================================================================
// ServerListener
// ============================================================================

/// Events from the embedded server.
pub trait ServerListener: Send + Sync {
    /// The server is bound and accepting.
    fn on_start(&self, _addr: SocketAddr) {}

    /// A peer completed the WebSocket handshake.
    fn on_open(&self, _peer: PeerId, _addr: SocketAddr) {}

    /// A peer sent a message.
    fn on_message(&self, _peer: PeerId, _payload: &Payload) {}

    /// A peer connection closed.
    fn on_close(&self, _peer: PeerId, _reason: &DisconnectReason) {}

    /// A peer failed, or the server failed when `peer` is `None`.
    ///
    /// Bind conflicts arrive here as [`Error::BindConflict`].
    fn on_error(&self, _peer: Option<PeerId>, _error: &Error) {}
}

// ============================================================================
// Tests
// ============================================================================
