//! Immutable connection configuration.
//!
//! A [`ConnectionConfig`] is built and validated once through
//! [`ConnectionConfigBuilder`](super::ConnectionConfigBuilder) and then shared
//! read-only between the registry, the reconnect scheduler and every transport
//! instance built for the key.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::identifiers::ConnectionKey;
use crate::listener::ConnectionListener;

use super::builder::ConnectionConfigBuilder;

// ============================================================================
// Constants
// ============================================================================

/// Default heartbeat period in seconds.
pub const DEFAULT_PING_INTERVAL_SECS: i64 = 60;

/// Default number of attempts per reconnect cycle.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);

// ============================================================================
// ProtocolDraft
// ============================================================================

/// WebSocket protocol draft spoken by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolDraft {
    /// RFC 6455, protocol version 13.
    #[default]
    #[serde(alias = "v13", alias = "6455")]
    Rfc6455,
}

impl ProtocolDraft {
    /// Value sent in the `Sec-WebSocket-Version` header.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> u8 {
        match self {
            Self::Rfc6455 => 13,
        }
    }
}

impl FromStr for ProtocolDraft {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rfc6455" | "6455" | "v13" | "13" => Ok(Self::Rfc6455),
            other => Err(Error::config(format!("unsupported protocol draft: {other}"))),
        }
    }
}

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Validated, immutable configuration of one managed connection.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub(super) key: ConnectionKey,
    pub(super) server_url: Url,
    pub(super) protocol_draft: ProtocolDraft,
    pub(super) http_headers: BTreeMap<String, String>,
    pub(super) connect_timeout: Option<Duration>,
    pub(super) ping_interval: Option<Duration>,
    pub(super) reconnect_attempts: u32,
    pub(super) reconnect_interval: Duration,
    pub(super) reconnect_on_network_available: bool,
    pub(super) listener: Arc<dyn ConnectionListener>,
}

impl ConnectionConfig {
    /// Creates a configuration builder for `server_url`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let config = ConnectionConfig::builder("ws://127.0.0.1:8800")
    ///     .key("chat")
    ///     .reconnect_attempts(5)
    ///     .listener(Arc::new(MyListener))
    ///     .build()?;
    /// ```
    #[inline]
    #[must_use]
    pub fn builder(server_url: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new().server_url(server_url)
    }

    /// Returns the connection key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Returns the remote address.
    #[inline]
    #[must_use]
    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    /// Returns the protocol draft.
    #[inline]
    #[must_use]
    pub fn protocol_draft(&self) -> ProtocolDraft {
        self.protocol_draft
    }

    /// Returns the extra handshake headers.
    #[inline]
    #[must_use]
    pub fn http_headers(&self) -> &BTreeMap<String, String> {
        &self.http_headers
    }

    /// Returns the connect timeout, `None` for no limit.
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Returns the heartbeat period, `None` when heartbeats are disabled.
    #[inline]
    #[must_use]
    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval
    }

    /// Returns how long the transport waits for any inbound frame before
    /// force-closing: 1.5 times the heartbeat period.
    #[inline]
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.ping_interval.map(|period| period.saturating_add(period / 2))
    }

    /// Returns the attempts per reconnect cycle. Zero disables reconnection.
    #[inline]
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Returns `true` if automatic reconnection is enabled.
    #[inline]
    #[must_use]
    pub fn reconnect_enabled(&self) -> bool {
        self.reconnect_attempts > 0
    }

    /// Returns the delay between reconnect attempts.
    #[inline]
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    /// Returns `true` if the connection reconnects when the network returns.
    #[inline]
    #[must_use]
    pub fn reconnect_on_network_available(&self) -> bool {
        self.reconnect_on_network_available
    }

    /// Returns the listener receiving this connection's events.
    #[inline]
    #[must_use]
    pub fn listener(&self) -> &Arc<dyn ConnectionListener> {
        &self.listener
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("key", &self.key)
            .field("server_url", &self.server_url.as_str())
            .field("protocol_draft", &self.protocol_draft)
            .field("http_headers", &self.http_headers.len())
            .field("connect_timeout", &self.connect_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("reconnect_interval", &self.reconnect_interval)
            .field(
                "reconnect_on_network_available",
                &self.reconnect_on_network_available,
            )
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
