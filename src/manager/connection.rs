//! Per-key connection record and transport event routing.
//!
//! A [`ManagedConnection`] owns the current transport for a key. Each
//! transport is created with a [`ConnectionEvents`] handler stamped with the
//! transport's generation; events from superseded generations are dropped so
//! a late callback from a replaced socket cannot corrupt the current state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::config::ConnectionConfig;
use crate::error::Error;
use crate::identifiers::ConnectionKey;
use crate::listener::{ConnectionListener, DisconnectReason, Payload};
use crate::logging::verbose;
use crate::transport::{Transport, TransportHandler, TransportState};

use super::registry::RegistryInner;
use super::scheduler::{ReconnectScheduler, SchedulerState, Trigger};

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle of a managed connection as tracked by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No live transport.
    #[default]
    Disconnected,
    /// A connect is in flight.
    Connecting,
    /// Open for traffic.
    Open,
    /// Close requested.
    Closing,
}

impl ConnectionState {
    /// Returns `true` if a transport is live for the key.
    #[inline]
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ConnectionInfo
// ============================================================================

/// Point-in-time snapshot of a managed connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Connection key.
    pub key: ConnectionKey,
    /// Remote address.
    pub server_url: Url,
    /// Registry-tracked state.
    pub state: ConnectionState,
    /// State reported by the current transport.
    #[serde(skip)]
    pub transport_state: TransportState,
    /// Generation of the current transport.
    pub generation: u64,
    /// Reconnect scheduler state.
    #[serde(skip)]
    pub scheduler: SchedulerState,
    /// Attempts made by the current or last reconnect cycle.
    pub attempt: u32,
    /// `true` if the last cycle ran out of attempts.
    pub exhausted: bool,
}

// ============================================================================
// ManagedConnection
// ============================================================================

/// Registry record for one key.
pub(crate) struct ManagedConnection {
    pub(crate) config: Arc<ConnectionConfig>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) generation: u64,
    /// Set once `transport` has been handed to a connect call.
    pub(crate) used: bool,
    pub(crate) state: ConnectionState,
    pub(crate) scheduler: ReconnectScheduler,
}

impl ManagedConnection {
    pub(crate) fn new(
        config: Arc<ConnectionConfig>,
        transport: Arc<dyn Transport>,
        generation: u64,
    ) -> Self {
        Self {
            config,
            transport,
            generation,
            used: false,
            state: ConnectionState::Disconnected,
            scheduler: ReconnectScheduler::default(),
        }
    }

    /// Installs a replacement transport built from the same configuration.
    pub(crate) fn replace_transport(&mut self, transport: Arc<dyn Transport>, generation: u64) {
        self.transport = transport;
        self.generation = generation;
        self.used = false;
    }

    /// Builds a snapshot. `transport_state` is read by the caller outside
    /// the registry lock.
    pub(crate) fn info(&self, transport_state: TransportState) -> ConnectionInfo {
        ConnectionInfo {
            key: self.config.key().clone(),
            server_url: self.config.server_url().clone(),
            state: self.state,
            transport_state,
            generation: self.generation,
            scheduler: self.scheduler.state(),
            attempt: self.scheduler.attempt(),
            exhausted: self.scheduler.is_exhausted(),
        }
    }
}

// ============================================================================
// ConnectionEvents
// ============================================================================

/// Transport handler bound to one key and one transport generation.
pub(crate) struct ConnectionEvents {
    registry: Weak<RegistryInner>,
    key: ConnectionKey,
    generation: u64,
    listener: Arc<dyn ConnectionListener>,
}

impl ConnectionEvents {
    pub(crate) fn new(
        registry: Weak<RegistryInner>,
        config: &ConnectionConfig,
        generation: u64,
    ) -> Self {
        Self {
            registry,
            key: config.key().clone(),
            generation,
            listener: Arc::clone(config.listener()),
        }
    }

    /// Returns `true` if this handler belongs to the key's current transport.
    fn is_current(&self) -> bool {
        let Some(inner) = self.registry.upgrade() else {
            return false;
        };
        let connections = inner.connections.lock();
        connections
            .get(&self.key)
            .is_some_and(|conn| conn.generation == self.generation)
    }
}

impl TransportHandler for ConnectionEvents {
    fn on_open(&self) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };

        let current = {
            let mut connections = inner.connections.lock();
            match connections.get_mut(&self.key) {
                Some(conn) if conn.generation == self.generation => {
                    conn.state = ConnectionState::Open;
                    conn.scheduler.succeed();
                    true
                }
                _ => false,
            }
        };

        if !current {
            verbose!(key = %self.key, generation = self.generation, "Stale open ignored");
            return;
        }

        info!(key = %self.key, generation = self.generation, "Connected");
        self.listener.on_connected(&self.key);
    }

    fn on_message(&self, payload: Payload) {
        if self.is_current() {
            self.listener.on_message(&self.key, &payload);
        }
    }

    fn on_close(&self, reason: DisconnectReason) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };

        let current = {
            let mut connections = inner.connections.lock();
            match connections.get_mut(&self.key) {
                Some(conn) if conn.generation == self.generation => {
                    conn.state = ConnectionState::Disconnected;
                    true
                }
                _ => false,
            }
        };

        if !current {
            verbose!(key = %self.key, generation = self.generation, "Stale close ignored");
            return;
        }

        info!(key = %self.key, reason = %reason, "Disconnected");
        self.listener.on_disconnected(&self.key, &reason);
        inner.execute_reconnect(&self.key, Trigger::TransportClosed);
    }

    fn on_error(&self, error: &Error) {
        if self.is_current() {
            warn!(key = %self.key, error = %error, "Transport error");
            self.listener.on_error(&self.key, error);
        }
    }

    fn on_ping(&self, data: &[u8]) {
        if self.is_current() {
            self.listener.on_ping(&self.key, data);
        }
    }

    fn on_pong(&self, data: &[u8]) {
        if self.is_current() {
            self.listener.on_pong(&self.key, data);
        }
    }

    fn on_sent(&self, payload: &Payload) {
        if self.is_current() {
            self.listener.on_send_succeeded(&self.key, payload);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_liveness() {
        assert!(!ConnectionState::Disconnected.is_live());
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Open.is_live());
        assert!(ConnectionState::Closing.is_live());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }

    #[test]
    fn test_info_serializes_without_runtime_fields() {
        let info = ConnectionInfo {
            key: ConnectionKey::new("chat"),
            server_url: Url::parse("ws://127.0.0.1:1/").unwrap(),
            state: ConnectionState::Open,
            transport_state: TransportState::Open,
            generation: 4,
            scheduler: SchedulerState::Idle,
            attempt: 0,
            exhausted: false,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["key"], "chat");
        assert_eq!(json["state"], "open");
        assert!(json.get("transport_state").is_none());
    }
}
