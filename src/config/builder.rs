//! Builder pattern for connection configuration.
//!
//! Provides a fluent API for assembling a [`ConnectionConfig`]. All validation
//! happens once, in [`ConnectionConfigBuilder::build`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//! use ws_keeper::{ConnectionConfig, NoopListener};
//!
//! # fn example() -> ws_keeper::Result<()> {
//! let config = ConnectionConfig::builder("ws://10.0.0.2:8800")
//!     .key("telemetry")
//!     .header("Authorization", "Bearer token")
//!     .reconnect_attempts(5)
//!     .reconnect_interval(Duration::from_secs(2))
//!     .listener(Arc::new(NoopListener))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionKey;
use crate::listener::ConnectionListener;

use super::connection::{
    ConnectionConfig, DEFAULT_PING_INTERVAL_SECS, DEFAULT_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_INTERVAL, ProtocolDraft,
};

// ============================================================================
// ConnectionConfigBuilder
// ============================================================================

/// Builder for a [`ConnectionConfig`].
///
/// Use [`ConnectionConfig::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ConnectionConfigBuilder {
    key: ConnectionKey,
    server_url: Option<String>,
    protocol_draft: ProtocolDraft,
    http_headers: BTreeMap<String, String>,
    connect_timeout: Duration,
    ping_interval_secs: i64,
    reconnect_attempts: u32,
    reconnect_interval: Duration,
    reconnect_on_network_available: bool,
    listener: Option<Arc<dyn ConnectionListener>>,
}

impl Default for ConnectionConfigBuilder {
    fn default() -> Self {
        Self {
            key: ConnectionKey::default(),
            server_url: None,
            protocol_draft: ProtocolDraft::default(),
            http_headers: BTreeMap::new(),
            connect_timeout: Duration::ZERO,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            reconnect_on_network_available: true,
            listener: None,
        }
    }
}

impl fmt::Debug for ConnectionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfigBuilder")
            .field("key", &self.key)
            .field("server_url", &self.server_url)
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionConfigBuilder Implementation
// ============================================================================

impl ConnectionConfigBuilder {
    /// Creates a builder with default settings and no server URL.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection key. Defaults to `"default"`.
    #[inline]
    #[must_use]
    pub fn key(mut self, key: impl Into<ConnectionKey>) -> Self {
        self.key = key.into();
        self
    }

    /// Sets the remote `ws://` or `wss://` address. Required.
    #[inline]
    #[must_use]
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Sets the protocol draft.
    #[inline]
    #[must_use]
    pub fn protocol_draft(mut self, draft: ProtocolDraft) -> Self {
        self.protocol_draft = draft;
        self
    }

    /// Adds one handshake header.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.insert(name.into(), value.into());
        self
    }

    /// Replaces all handshake headers.
    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.http_headers = headers
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        self
    }

    /// Sets the connect timeout. Zero means no timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the heartbeat period in seconds. Zero or negative disables it.
    #[inline]
    #[must_use]
    pub fn ping_interval_secs(mut self, secs: i64) -> Self {
        self.ping_interval_secs = secs;
        self
    }

    /// Sets the attempts per reconnect cycle. Zero disables reconnection.
    #[inline]
    #[must_use]
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// Sets the delay between reconnect attempts.
    #[inline]
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Sets whether the connection reconnects when the network returns.
    #[inline]
    #[must_use]
    pub fn reconnect_on_network_available(mut self, enabled: bool) -> Self {
        self.reconnect_on_network_available = enabled;
        self
    }

    /// Sets the event listener. Required.
    #[inline]
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the server URL or listener is missing, the
    ///   scheme is not `ws`/`wss`, a header is malformed, or reconnection is
    ///   enabled with a zero interval
    /// - [`Error::InvalidUrl`] if the URL does not parse
    pub fn build(self) -> Result<ConnectionConfig> {
        let server_url = self.validate_url()?;
        self.validate_headers()?;
        self.validate_reconnect()?;

        let listener = self.listener.ok_or_else(|| {
            Error::config("listener is required. Use .listener() to set it.")
        })?;

        let connect_timeout = (!self.connect_timeout.is_zero()).then_some(self.connect_timeout);
        let ping_interval = u64::try_from(self.ping_interval_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(ConnectionConfig {
            key: self.key,
            server_url,
            protocol_draft: self.protocol_draft,
            http_headers: self.http_headers,
            connect_timeout,
            ping_interval,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_interval: self.reconnect_interval,
            reconnect_on_network_available: self.reconnect_on_network_available,
            listener,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConnectionConfigBuilder {
    /// Validates the server URL.
    fn validate_url(&self) -> Result<Url> {
        let raw = self.server_url.as_deref().ok_or_else(|| {
            Error::config(
                "serverUrl is required. Use .server_url() to set it.\n\
                 Example: ConnectionConfig::builder(\"ws://127.0.0.1:8800\")",
            )
        })?;

        let url = Url::parse(raw)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::config(format!(
                    "serverUrl must use ws:// or wss://, got {other}://"
                )));
            }
        }

        if url.host_str().is_none() {
            return Err(Error::config(format!("serverUrl has no host: {raw}")));
        }

        Ok(url)
    }

    /// Validates handshake header names and values.
    fn validate_headers(&self) -> Result<()> {
        for (name, value) in &self.http_headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config(format!("invalid header name {name:?}: {e}")))?;
            HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("invalid value for header {name}: {e}")))?;
        }
        Ok(())
    }

    /// Validates the reconnect policy.
    fn validate_reconnect(&self) -> Result<()> {
        if self.reconnect_attempts > 0 && self.reconnect_interval.is_zero() {
            return Err(Error::config(
                "reconnect interval must be greater than zero when reconnection is enabled",
            ));
        }
        if self.reconnect_attempts > 0
            && Instant::now().checked_add(self.reconnect_interval).is_none()
        {
            return Err(Error::config(format!(
                "reconnect interval {}ms is too large to schedule",
                self.reconnect_interval.as_millis()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::listener::NoopListener;

    fn builder() -> ConnectionConfigBuilder {
        ConnectionConfig::builder("ws://127.0.0.1:8800").listener(Arc::new(NoopListener))
    }

    #[test]
    fn test_missing_url_is_config_error() {
        let err = ConnectionConfigBuilder::new()
            .listener(Arc::new(NoopListener))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_missing_listener_is_config_error() {
        let err = ConnectionConfig::builder("ws://127.0.0.1:8800")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("listener"));
    }

    #[test]
    fn test_rejects_http_scheme() {
        let err = builder().server_url("http://example.com").build().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let err = builder().server_url("::::").build().unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[test]
    fn test_rejects_bad_header() {
        let err = builder().header("bad header", "x").build().unwrap_err();
        assert!(err.to_string().contains("header"));
    }

    #[test]
    fn test_rejects_zero_interval_with_reconnect() {
        let err = builder()
            .reconnect_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.is_config_error());

        let ok = builder()
            .reconnect_attempts(0)
            .reconnect_interval(Duration::ZERO)
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_rejects_unschedulable_reconnect_interval() {
        let err = builder()
            .reconnect_interval(Duration::MAX)
            .build()
            .unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("too large"));

        // Without reconnection the interval is never scheduled.
        let ok = builder()
            .reconnect_attempts(0)
            .reconnect_interval(Duration::MAX)
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_huge_ping_interval_is_accepted() {
        let config = builder().ping_interval_secs(i64::MAX).build().unwrap();
        let period = Duration::from_secs(i64::MAX as u64);
        assert_eq!(config.ping_interval(), Some(period));
        assert!(config.heartbeat_timeout().is_some_and(|limit| limit > period));
    }

    #[test]
    fn test_non_positive_ping_disables_heartbeat() {
        let config = builder().ping_interval_secs(0).build().unwrap();
        assert_eq!(config.ping_interval(), None);
        assert_eq!(config.heartbeat_timeout(), None);

        let config = builder().ping_interval_secs(-5).build().unwrap();
        assert_eq!(config.ping_interval(), None);
    }

    #[test]
    fn test_zero_connect_timeout_means_none() {
        let config = builder().connect_timeout(Duration::ZERO).build().unwrap();
        assert_eq!(config.connect_timeout(), None);

        let config = builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_headers_and_key() {
        let config = builder()
            .key("orders")
            .headers([("X-Client", "desk"), ("X-Region", "eu")])
            .build()
            .unwrap();
        assert_eq!(config.key().as_str(), "orders");
        assert_eq!(config.http_headers().len(), 2);
        assert_eq!(config.http_headers()["X-Region"], "eu");
    }
}
