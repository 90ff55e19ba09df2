//! Serializable connection options.
//!
//! [`ConnectionOptions`] mirrors the recognized configuration keys in
//! camelCase so connections can be declared in JSON and turned into a
//! validated [`ConnectionConfig`].
//!
//! ```ignore
//! let options = ConnectionOptions::from_json(r#"{
//!     "key": "chat",
//!     "serverUrl": "ws://10.0.0.2:8800",
//!     "reconnectAttempts": 3
//! }"#)?;
//! let config = options.into_config(Arc::new(MyListener))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::listener::ConnectionListener;

use super::builder::ConnectionConfigBuilder;
use super::connection::{
    ConnectionConfig, DEFAULT_PING_INTERVAL_SECS, DEFAULT_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_INTERVAL, ProtocolDraft,
};
use crate::identifiers::ConnectionKey;

/// Plain-data connection options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ConnectionOptions {
    /// Connection key.
    pub key: ConnectionKey,
    /// Remote address. Required.
    pub server_url: Option<String>,
    /// Protocol draft.
    pub protocol_draft: ProtocolDraft,
    /// Extra handshake headers.
    pub http_headers: BTreeMap<String, String>,
    /// Connect timeout in milliseconds, 0 for none.
    pub connect_timeout: u64,
    /// Heartbeat period in seconds, 0 or less disables it.
    pub ping_interval: i64,
    /// Attempts per reconnect cycle, 0 disables reconnection.
    pub reconnect_attempts: u32,
    /// Delay between reconnect attempts in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Reconnect when the network becomes available.
    pub reconnect_on_network_available: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            key: ConnectionKey::default(),
            server_url: None,
            protocol_draft: ProtocolDraft::default(),
            http_headers: BTreeMap::new(),
            connect_timeout: 0,
            ping_interval: DEFAULT_PING_INTERVAL_SECS,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL.as_millis() as u64,
            reconnect_on_network_available: true,
        }
    }
}

impl ConnectionOptions {
    /// Parses options from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) on malformed input or
    /// unknown keys.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Converts into a builder preloaded with these options.
    #[must_use]
    pub fn into_builder(self) -> ConnectionConfigBuilder {
        let builder = ConnectionConfigBuilder::new()
            .key(self.key)
            .protocol_draft(self.protocol_draft)
            .headers(self.http_headers)
            .connect_timeout(Duration::from_millis(self.connect_timeout))
            .ping_interval_secs(self.ping_interval)
            .reconnect_attempts(self.reconnect_attempts)
            .reconnect_interval(Duration::from_millis(self.reconnect_interval_ms))
            .reconnect_on_network_available(self.reconnect_on_network_available);

        match self.server_url {
            Some(url) => builder.server_url(url),
            None => builder,
        }
    }

    /// Validates the options into a [`ConnectionConfig`].
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionConfigBuilder::build`].
    pub fn into_config(self, listener: Arc<dyn ConnectionListener>) -> Result<ConnectionConfig> {
        self.into_builder().listener(listener).build()
    }
}
