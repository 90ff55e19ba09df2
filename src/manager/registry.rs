//! Keyed registry of managed connections.
//!
//! The [`ConnectionRegistry`] is the entry point of the crate. It owns one
//! [`ManagedConnection`] per key, the network monitor, the guardian watchdog
//! and the optional embedded server.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ws_keeper::{ConnectionConfig, ConnectionRegistry, NoopListener};
//!
//! # async fn example() -> ws_keeper::Result<()> {
//! let registry = ConnectionRegistry::new()?;
//!
//! let key = registry.init(
//!     ConnectionConfig::builder("ws://127.0.0.1:8800")
//!         .key("chat")
//!         .listener(Arc::new(NoopListener))
//!         .build()?,
//! );
//! registry.start().await;
//!
//! registry.send(&key, "hello")?;
//! registry.destroy().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Locking
//!
//! All registry state sits behind one `parking_lot::Mutex`. The lock is never
//! held across an `.await`, and transport or listener methods are only
//! called after it has been released.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionKey, PeerId};
use crate::listener::{Payload, ServerListener};
use crate::logging::verbose;
use crate::network::NetworkObserver;
use crate::network::monitor::NetworkMonitor;
use crate::transport::server::BindAttempts;
use crate::transport::{EmbeddedServer, Transport, TransportFactory, TransportState};

use super::builder::RegistryBuilder;
use super::connection::{ConnectionEvents, ConnectionInfo, ConnectionState, ManagedConnection};
use super::guardian::GuardianWatchdog;
use super::scheduler::Trigger;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the registry.
pub(crate) struct RegistryInner {
    /// Managed connections by key.
    pub(crate) connections: Mutex<FxHashMap<ConnectionKey, ManagedConnection>>,

    /// Builds transports.
    pub(crate) factory: Arc<dyn TransportFactory>,

    /// Global network availability.
    pub(crate) monitor: NetworkMonitor,

    /// Running watchdog, if any.
    pub(crate) guardian: Mutex<Option<GuardianWatchdog>>,

    /// Running embedded server, if any.
    pub(crate) server: Mutex<Option<Arc<EmbeddedServer>>>,

    /// Bind conflicts since the last reset.
    pub(crate) bind_attempts: BindAttempts,

    /// Runtime used for work started from foreign threads.
    pub(crate) runtime: Handle,

    /// Source of transport generations.
    generation: AtomicU64,
}

/// Transport claimed for one connect call.
struct Claim {
    transport: Arc<dyn Transport>,
    generation: u64,
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Registry of resilient, keyed WebSocket connections.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ConnectionRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connection_count())
            .field("network_available", &self.is_network_available())
            .field("guardian", &self.is_guardian_running())
            .field("server", &self.server_addr())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionRegistry - Constructor
// ============================================================================

impl ConnectionRegistry {
    /// Creates a registry with the default transport and no network observer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if called outside a tokio runtime.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Creates a builder for a registry with custom collaborators.
    #[inline]
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub(crate) fn from_parts(
        factory: Arc<dyn TransportFactory>,
        observer: Option<Arc<dyn NetworkObserver>>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: Mutex::new(FxHashMap::default()),
                factory,
                monitor: NetworkMonitor::new(observer),
                guardian: Mutex::new(None),
                server: Mutex::new(None),
                bind_attempts: BindAttempts::default(),
                runtime,
                generation: AtomicU64::new(0),
            }),
        }
    }
}

// ============================================================================
// ConnectionRegistry - Lifecycle
// ============================================================================

impl ConnectionRegistry {
    /// Registers `config` under its key with a fresh transport.
    ///
    /// Does not connect. If the key already exists its reconnect cycle is
    /// cancelled and its transport is closed in the background; events from
    /// the old transport are no longer delivered.
    pub fn init(&self, config: ConnectionConfig) -> ConnectionKey {
        let config = Arc::new(config);
        let key = config.key().clone();
        let (transport, generation) = self.inner.build_transport(&config);

        let previous = self.inner.connections.lock().insert(
            key.clone(),
            ManagedConnection::new(Arc::clone(&config), transport, generation),
        );

        match previous {
            Some(mut old) => {
                old.scheduler.cancel();
                let transport = old.transport;
                self.inner.runtime.spawn(async move {
                    transport.close_blocking().await;
                });
                info!(key = %key, url = %config.server_url(), "Connection replaced");
            }
            None => info!(key = %key, url = %config.server_url(), "Connection registered"),
        }

        key
    }

    /// Connects every connection that is not live.
    ///
    /// Arms the network monitor on first use. Never-used transports are
    /// connected and awaited; closed ones are replaced and connected in the
    /// background. Connections with a running reconnect cycle are left to it.
    /// Clears every exhaustion latch.
    pub async fn start(&self) {
        self.inner.start_all(Trigger::Manual).await;
    }

    /// Forces a reconnect cycle for `key`.
    ///
    /// Returns `true` if a cycle started; see the module docs of
    /// [`scheduler`](super::scheduler) for the gates.
    pub fn reconnect(&self, key: &ConnectionKey) -> bool {
        self.inner.execute_reconnect(key, Trigger::Manual)
    }

    /// Requests a graceful close of `key`.
    ///
    /// The listener gets `on_closing` first. The resulting close is evaluated
    /// for reconnection like any other.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if nothing is live for `key`.
    pub fn disconnect(&self, key: &ConnectionKey) -> Result<()> {
        let (transport, listener) = {
            let mut connections = self.inner.connections.lock();
            let conn = connections
                .get_mut(key)
                .filter(|conn| {
                    matches!(
                        conn.state,
                        ConnectionState::Open | ConnectionState::Connecting
                    )
                })
                .ok_or_else(|| Error::not_connected(key))?;
            conn.state = ConnectionState::Closing;
            (Arc::clone(&conn.transport), Arc::clone(conn.config.listener()))
        };

        debug!(key = %key, "Disconnect requested");
        listener.on_closing(key);
        transport.close();
        Ok(())
    }

    /// Tears everything down.
    ///
    /// Unregisters the network monitor, stops the guardian and the embedded
    /// server, cancels every reconnect cycle, empties the registry and waits
    /// for every transport to close. Listeners are not notified of these
    /// closes.
    pub async fn destroy(&self) {
        info!("Registry shutting down");

        self.inner.monitor.unregister();
        self.stop_guardian();
        self.stop_server().await;

        let drained: Vec<ManagedConnection> = {
            let mut connections = self.inner.connections.lock();
            connections.drain().map(|(_, conn)| conn).collect()
        };

        let mut transports = Vec::with_capacity(drained.len());
        for mut conn in drained {
            conn.scheduler.cancel();
            transports.push(conn.transport);
        }

        join_all(transports.iter().map(|transport| transport.close_blocking())).await;

        info!(closed = transports.len(), "Registry shutdown complete");
    }
}

// ============================================================================
// ConnectionRegistry - Messaging
// ============================================================================

impl ConnectionRegistry {
    /// Sends a message on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if `key` is unknown or not open.
    pub fn send(&self, key: &ConnectionKey, payload: impl Into<Payload>) -> Result<()> {
        let transport = self.inner.open_transport(key)?;
        transport
            .send(payload.into())
            .map_err(|e| not_connected_on_close(key, e))
    }

    /// Sends a ping frame on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if `key` is unknown or not open.
    pub fn send_ping(&self, key: &ConnectionKey) -> Result<()> {
        let transport = self.inner.open_transport(key)?;
        transport.ping().map_err(|e| not_connected_on_close(key, e))
    }
}

// ============================================================================
// ConnectionRegistry - Queries
// ============================================================================

impl ConnectionRegistry {
    /// Returns `true` if `key` is open.
    #[must_use]
    pub fn is_connected(&self, key: &ConnectionKey) -> bool {
        self.inner
            .connections
            .lock()
            .get(key)
            .is_some_and(|conn| conn.state == ConnectionState::Open)
    }

    /// Returns a snapshot of `key`, or `None` if unknown.
    #[must_use]
    pub fn get_connection(&self, key: &ConnectionKey) -> Option<ConnectionInfo> {
        let (info, transport) = {
            let connections = self.inner.connections.lock();
            let conn = connections.get(key)?;
            (conn.info(TransportState::Fresh), Arc::clone(&conn.transport))
        };

        Some(ConnectionInfo {
            transport_state: transport.state(),
            ..info
        })
    }

    /// Returns every registered key, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<ConnectionKey> {
        let mut keys: Vec<_> = self.inner.connections.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the number of registered connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Returns the global network availability.
    #[inline]
    #[must_use]
    pub fn is_network_available(&self) -> bool {
        self.inner.monitor.is_available()
    }

    /// Clears every attempt counter and exhaustion latch, and the server
    /// bind-attempt counter.
    pub fn reset_attempts(&self) {
        for conn in self.inner.connections.lock().values_mut() {
            conn.scheduler.reset();
        }
        self.inner.bind_attempts.reset();
        verbose!("Attempt counters reset");
    }
}

// ============================================================================
// ConnectionRegistry - Guardian
// ============================================================================

impl ConnectionRegistry {
    /// Starts (or replaces) the watchdog that calls [`start`](Self::start)
    /// every `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `interval` is zero or not greater than
    /// `2 × max(reconnect_attempts) × max(reconnect_interval)` over all
    /// registered connections, or too large to schedule. Nothing starts in
    /// that case.
    pub fn start_guardian(&self, interval: Duration) -> Result<()> {
        let configs: Vec<Arc<ConnectionConfig>> = self
            .inner
            .connections
            .lock()
            .values()
            .map(|conn| Arc::clone(&conn.config))
            .collect();

        GuardianWatchdog::validate(interval, configs.iter().map(|config| &**config))?;

        let guardian =
            GuardianWatchdog::spawn(&self.inner.runtime, interval, Arc::downgrade(&self.inner))?;
        if let Some(previous) = self.inner.guardian.lock().replace(guardian) {
            previous.stop();
        }
        Ok(())
    }

    /// Stops the watchdog. Safe when not running.
    pub fn stop_guardian(&self) {
        if let Some(guardian) = self.inner.guardian.lock().take() {
            guardian.stop();
        }
    }

    /// Returns `true` while the watchdog runs.
    #[must_use]
    pub fn is_guardian_running(&self) -> bool {
        self.inner.guardian.lock().is_some()
    }

    /// Returns the watchdog interval, if running.
    #[must_use]
    pub fn guardian_interval(&self) -> Option<Duration> {
        self.inner
            .guardian
            .lock()
            .as_ref()
            .map(GuardianWatchdog::interval)
    }
}

// ============================================================================
// ConnectionRegistry - Embedded Server
// ============================================================================

impl ConnectionRegistry {
    /// Binds the embedded server on `addr`, stopping any running one first.
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// - [`Error::BindConflict`] if the address is in use; the bind-attempt
    ///   counter is incremented and the listener has seen the error
    /// - [`Error::Io`] for other bind failures
    pub async fn start_server(
        &self,
        addr: SocketAddr,
        listener: Arc<dyn ServerListener>,
    ) -> Result<SocketAddr> {
        self.stop_server().await;

        let server = EmbeddedServer::bind(addr, listener, &self.inner.bind_attempts).await?;
        let local_addr = server.local_addr();

        let previous = self.inner.server.lock().replace(Arc::new(server));
        if let Some(previous) = previous {
            previous.stop().await;
        }
        Ok(local_addr)
    }

    /// Stops the embedded server. Idempotent, safe when never started.
    pub async fn stop_server(&self) {
        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            server.stop().await;
        }
    }

    /// Returns the embedded server address, if running.
    #[must_use]
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.inner
            .server
            .lock()
            .as_ref()
            .map(|server| server.local_addr())
    }

    /// Returns the bind conflicts recorded since the last reset.
    #[inline]
    #[must_use]
    pub fn server_bind_attempts(&self) -> u32 {
        self.inner.bind_attempts.count()
    }

    /// Returns the number of peers connected to the embedded server.
    #[must_use]
    pub fn server_peer_count(&self) -> usize {
        self.server().map_or(0, |server| server.peer_count())
    }

    /// Sends a message to one server peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the server is not running or the peer
    /// is unknown.
    pub fn server_send(&self, peer: PeerId, payload: impl Into<Payload>) -> Result<()> {
        let server = self
            .server()
            .ok_or_else(|| Error::transport("embedded server not running"))?;
        server.send(peer, payload.into())
    }

    /// Sends a message to every server peer. Returns the number of peers.
    pub fn server_broadcast(&self, payload: impl Into<Payload>) -> usize {
        self.server()
            .map_or(0, |server| server.broadcast(payload.into()))
    }

    fn server(&self) -> Option<Arc<EmbeddedServer>> {
        self.inner.server.lock().clone()
    }
}

// ============================================================================
// RegistryInner - Connect Path
// ============================================================================

impl RegistryInner {
    /// Builds a fresh transport for `config` with the next generation.
    pub(crate) fn build_transport(
        self: &Arc<Self>,
        config: &Arc<ConnectionConfig>,
    ) -> (Arc<dyn Transport>, u64) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handler = Arc::new(ConnectionEvents::new(
            Arc::downgrade(self),
            config,
            generation,
        ));
        (
            self.factory.create(Arc::clone(config), handler),
            generation,
        )
    }

    /// Returns the transport of `key` if the registry considers it open.
    fn open_transport(&self, key: &ConnectionKey) -> Result<Arc<dyn Transport>> {
        let connections = self.connections.lock();
        connections
            .get(key)
            .filter(|conn| conn.state == ConnectionState::Open)
            .map(|conn| Arc::clone(&conn.transport))
            .ok_or_else(|| Error::not_connected(key))
    }

    /// Connects `key` unless something is already live for it.
    ///
    /// Used transports are replaced before connecting. If the transport
    /// still reports it cannot be reused, it is rebuilt once more.
    pub(crate) async fn safe_connect(self: &Arc<Self>, key: &ConnectionKey) -> Result<()> {
        let mut rebuild = false;

        loop {
            let Some(claim) = self.claim(key, rebuild)? else {
                return Ok(());
            };

            match claim.transport.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transport_reused() && !rebuild => {
                    debug!(key = %key, "Transport not reusable, rebuilding");
                    self.settle_failure(key, claim.generation);
                    rebuild = true;
                }
                Err(e) => {
                    self.settle_failure(key, claim.generation);
                    return Err(e);
                }
            }
        }
    }

    /// Marks `key` connecting and hands out its transport.
    ///
    /// Returns `None` if a transport is already live.
    fn claim(self: &Arc<Self>, key: &ConnectionKey, rebuild: bool) -> Result<Option<Claim>> {
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(key)
            .ok_or_else(|| Error::not_connected(key))?;

        if conn.state.is_live() {
            verbose!(key = %key, state = %conn.state, "Connect skipped: transport live");
            return Ok(None);
        }

        if conn.used || rebuild {
            let (transport, generation) = self.build_transport(&conn.config);
            conn.replace_transport(transport, generation);
            debug!(key = %key, generation, "Transport replaced");
        }

        conn.used = true;
        conn.state = ConnectionState::Connecting;

        Ok(Some(Claim {
            transport: Arc::clone(&conn.transport),
            generation: conn.generation,
        }))
    }

    /// Returns a connection stuck in `Connecting` to `Disconnected` after a
    /// failed connect whose transport did not report a close.
    fn settle_failure(&self, key: &ConnectionKey, generation: u64) {
        if let Some(conn) = self.connections.lock().get_mut(key)
            && conn.generation == generation
            && conn.state == ConnectionState::Connecting
        {
            conn.state = ConnectionState::Disconnected;
        }
    }

    /// Connects every connection that is not live.
    pub(crate) async fn start_all(self: &Arc<Self>, trigger: Trigger) {
        self.register_monitor();

        let mut fresh = Vec::new();
        let mut used = Vec::new();
        {
            let mut connections = self.connections.lock();
            for (key, conn) in connections.iter_mut() {
                conn.scheduler.clear_latch();

                if conn.state.is_live() {
                    verbose!(key = %key, state = %conn.state, %trigger, "Start skipped: live");
                } else if conn.scheduler.is_running() {
                    verbose!(key = %key, %trigger, "Start skipped: reconnect cycle running");
                } else if conn.used {
                    used.push(key.clone());
                } else {
                    fresh.push(key.clone());
                }
            }
        }

        debug!(%trigger, fresh = fresh.len(), replaced = used.len(), "Starting connections");

        for key in used {
            let inner = Arc::clone(self);
            self.runtime.spawn(async move {
                if let Err(e) = inner.safe_connect(&key).await {
                    debug!(key = %key, error = %e, "Background connect failed");
                }
            });
        }

        let results = join_all(fresh.iter().map(|key| self.safe_connect(key))).await;
        for (key, result) in fresh.iter().zip(results) {
            if let Err(e) = result {
                warn!(key = %key, error = %e, "Connect failed");
            }
        }
    }

    /// Arms the network monitor. Idempotent.
    fn register_monitor(self: &Arc<Self>) {
        let registry = Arc::downgrade(self);
        self.monitor.register(Arc::new(move || {
            if let Some(inner) = registry.upgrade() {
                inner.on_network_available();
            }
        }));
    }

    /// Starts a cycle for every eligible connection.
    fn on_network_available(self: &Arc<Self>) {
        let keys: Vec<ConnectionKey> = self
            .connections
            .lock()
            .iter()
            .filter(|(_, conn)| {
                conn.config.reconnect_on_network_available() && conn.state != ConnectionState::Open
            })
            .map(|(key, _)| key.clone())
            .collect();

        info!(candidates = keys.len(), "Network available, reconnecting");
        for key in keys {
            self.execute_reconnect(&key, Trigger::NetworkAvailable);
        }
    }
}

/// Maps a transport-side "closed" to the registry's "not connected".
fn not_connected_on_close(key: &ConnectionKey, error: Error) -> Error {
    match error {
        Error::ConnectionClosed => Error::not_connected(key),
        other => other,
    }
}

// ============================================================================
// Tests
// ============================================================================
