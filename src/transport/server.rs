//! Embedded WebSocket server.
//!
//! Accepts inbound peers on one port and multiplexes their events into a
//! single [`ServerListener`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            EmbeddedServer               │
//! │            (single port)                │
//! │  ┌─────────────────────────────────┐    │
//! │  │ peer-1 → peer task 1            │    │
//! │  │ peer-2 → peer task 2            │    │
//! │  │ peer-3 → peer task 3            │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Bind conflicts
//!
//! Address-in-use is reported as [`Error::BindConflict`] carrying the running
//! attempt count and the next candidate port. The caller decides whether to
//! retry there.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::PeerId;
use crate::listener::{DisconnectReason, Payload, ServerListener};

// ============================================================================
// Constants
// ============================================================================

/// How long `stop` waits for peer tasks to finish.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Close reason sent to peers on shutdown.
const STOPPING_REASON: &str = "server stopping";

/// Pause after a failed `accept`, so a persistent error (EMFILE) cannot spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// BindAttempts
// ============================================================================

/// Counts bind conflicts across server start attempts.
///
/// Owned by the registry so the count survives failed binds.
#[derive(Debug, Default)]
pub struct BindAttempts(AtomicU32);

impl BindAttempts {
    /// Returns the number of conflicts recorded since the last reset.
    #[inline]
    #[must_use]
    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the counter.
    #[inline]
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    /// Records a conflict on `port` and builds the matching error.
    fn record_conflict(&self, port: u16) -> Error {
        let attempt = self.0.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        Error::bind_conflict(port, attempt)
    }
}

// ============================================================================
// Types
// ============================================================================

/// Commands routed to one peer task.
enum PeerCommand {
    Send(Payload),
    Close,
}

/// State shared between the server handle and its tasks.
struct ServerInner {
    listener: Arc<dyn ServerListener>,
    peers: RwLock<FxHashMap<PeerId, mpsc::UnboundedSender<PeerCommand>>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

// ============================================================================
// EmbeddedServer
// ============================================================================

/// A running WebSocket server.
///
/// Dropping the server cancels the accept loop and every peer task.
///
/// # Example
///
/// ```ignore
/// let server = EmbeddedServer::bind(addr, Arc::new(MyListener), &attempts).await?;
/// println!("listening on {}", server.ws_url());
/// server.broadcast("hello".into());
/// server.stop().await;
/// ```
pub struct EmbeddedServer {
    /// Bound address.
    local_addr: SocketAddr,
    /// Shared state.
    inner: Arc<ServerInner>,
    /// Set once `stop` ran.
    stopped: AtomicBool,
}

// ============================================================================
// EmbeddedServer - Constructor
// ============================================================================

impl EmbeddedServer {
    /// Binds `addr` and starts accepting peers.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to bind (port 0 for random)
    /// * `listener` - Receives server and peer events
    /// * `attempts` - Bind-conflict counter, incremented on address-in-use
    ///
    /// # Errors
    ///
    /// - [`Error::BindConflict`] if the address is in use
    /// - [`Error::Io`] for any other bind failure
    ///
    /// Both are also reported to `listener.on_error(None, ..)`.
    pub async fn bind(
        addr: SocketAddr,
        listener: Arc<dyn ServerListener>,
        attempts: &BindAttempts,
    ) -> Result<Self> {
        let tcp = match TcpListener::bind(addr).await {
            Ok(tcp) => tcp,
            Err(e) => {
                let err = if e.kind() == ErrorKind::AddrInUse {
                    attempts.record_conflict(addr.port())
                } else {
                    Error::Io(e)
                };
                warn!(%addr, error = %err, "Server bind failed");
                listener.on_error(None, &err);
                return Err(err);
            }
        };
        let local_addr = tcp.local_addr()?;

        let inner = Arc::new(ServerInner {
            listener,
            peers: RwLock::new(FxHashMap::default()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        inner
            .tracker
            .spawn(Arc::clone(&inner).accept_loop(tcp));

        info!(addr = %local_addr, "Embedded server started");
        inner.listener.on_start(local_addr);

        Ok(Self {
            local_addr,
            inner,
            stopped: AtomicBool::new(false),
        })
    }
}

// ============================================================================
// EmbeddedServer - Public API
// ============================================================================

impl EmbeddedServer {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the number of connected peers.
    #[inline]
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inner.peers.read().len()
    }

    /// Queues a message for one peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the peer is unknown or gone.
    pub fn send(&self, peer: PeerId, payload: Payload) -> Result<()> {
        let peers = self.inner.peers.read();
        let tx = peers
            .get(&peer)
            .ok_or_else(|| Error::transport(format!("unknown peer {peer}")))?;
        tx.send(PeerCommand::Send(payload))
            .map_err(|_| Error::transport(format!("peer {peer} closed")))
    }

    /// Queues a message for every connected peer.
    ///
    /// Returns the number of peers the message was queued for.
    pub fn broadcast(&self, payload: Payload) -> usize {
        let peers = self.inner.peers.read();
        peers
            .values()
            .filter(|tx| tx.send(PeerCommand::Send(payload.clone())).is_ok())
            .count()
    }

    /// Closes one peer gracefully.
    ///
    /// Returns `false` if the peer is unknown.
    pub fn disconnect(&self, peer: PeerId) -> bool {
        self.inner
            .peers
            .read()
            .get(&peer)
            .is_some_and(|tx| tx.send(PeerCommand::Close).is_ok())
    }

    /// Stops accepting, closes every peer and waits for their tasks.
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(addr = %self.local_addr, "Embedded server stopping");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();

        if timeout(STOP_TIMEOUT, self.inner.tracker.wait()).await.is_err() {
            warn!(addr = %self.local_addr, "Peer tasks did not finish in time");
        }

        info!(addr = %self.local_addr, "Embedded server stopped");
    }
}

impl Drop for EmbeddedServer {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl fmt::Debug for EmbeddedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedServer")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.peer_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ServerInner - Accept Loop
// ============================================================================

impl ServerInner {
    /// Background task that accepts new peers.
    async fn accept_loop(self: Arc<Self>, tcp: TcpListener) {
        debug!("Accept loop started");

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,

                accepted = tcp.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let inner = Arc::clone(&self);
                        self.tracker.spawn(inner.serve_peer(stream, addr));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        self.listener.on_error(None, &Error::Io(e));
                        if !self.back_off().await {
                            break;
                        }
                    }
                },
            }
        }

        debug!("Accept loop terminated");
    }

    /// Waits out [`ACCEPT_BACKOFF`]. Returns `false` if shutdown began first.
    async fn back_off(&self) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(ACCEPT_BACKOFF) => true,
        }
    }

    /// Upgrades one TCP stream and runs its peer loop.
    async fn serve_peer(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let peer = PeerId::next();

        let handshake = tokio::select! {
            () = self.shutdown.cancelled() => return,
            result = accept_async(stream) => result,
        };

        let ws_stream = match handshake {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                debug!(%peer, ?addr, error = %e, "WebSocket upgrade failed");
                self.listener.on_error(Some(peer), &Error::from(e));
                return;
            }
        };

        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        self.peers.write().insert(peer, command_tx);

        debug!(%peer, ?addr, "Peer connected");
        self.listener.on_open(peer, addr);

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let reason = loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Away,
                        reason: STOPPING_REASON.into(),
                    };
                    let _ = ws_write.send(Message::Close(Some(frame))).await;
                    break DisconnectReason::new(1001, STOPPING_REASON, false);
                }

                message = ws_read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.listener
                            .on_message(peer, &Payload::Text(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        self.listener.on_message(peer, &Payload::Binary(bytes.to_vec()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let _ = ws_write.flush().await;
                        break DisconnectReason::from_frame(frame, true);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let err = Error::from(e);
                        self.listener.on_error(Some(peer), &err);
                        break DisconnectReason::abnormal(err.to_string(), true);
                    }
                    None => break DisconnectReason::abnormal("stream ended", true),
                },

                command = command_rx.recv() => match command {
                    Some(PeerCommand::Send(payload)) => {
                        if let Err(e) = ws_write.send(payload.into_message()).await {
                            let err = Error::from(e);
                            self.listener.on_error(Some(peer), &err);
                            break DisconnectReason::abnormal(err.to_string(), false);
                        }
                    }
                    Some(PeerCommand::Close) | None => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        let _ = ws_write.send(Message::Close(Some(frame))).await;
                        break DisconnectReason::normal();
                    }
                },
            }
        };

        self.peers.write().remove(&peer);
        debug!(%peer, reason = %reason, "Peer disconnected");
        self.listener.on_close(peer, &reason);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};

    use parking_lot::Mutex;
    use tokio_tungstenite::connect_async;

    #[derive(Default)]
    struct Recorder {
        started: Mutex<Option<SocketAddr>>,
        opened: Mutex<Vec<PeerId>>,
        messages: Mutex<Vec<Payload>>,
        closed: Mutex<Vec<DisconnectReason>>,
        errors: Mutex<Vec<String>>,
    }

    impl ServerListener for Recorder {
        fn on_start(&self, addr: SocketAddr) {
            *self.started.lock() = Some(addr);
        }
        fn on_open(&self, peer: PeerId, _addr: SocketAddr) {
            self.opened.lock().push(peer);
        }
        fn on_message(&self, _peer: PeerId, payload: &Payload) {
            self.messages.lock().push(payload.clone());
        }
        fn on_close(&self, _peer: PeerId, reason: &DisconnectReason) {
            self.closed.lock().push(reason.clone());
        }
        fn on_error(&self, peer: Option<PeerId>, error: &Error) {
            if peer.is_none() {
                self.errors.lock().push(error.to_string());
            }
        }
    }

    fn localhost(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_error_backs_off_until_shutdown() {
        let inner = ServerInner {
            listener: Arc::new(crate::listener::NoopListener),
            peers: RwLock::default(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };

        let started = tokio::time::Instant::now();
        assert!(inner.back_off().await);
        assert!(started.elapsed() >= ACCEPT_BACKOFF);

        inner.shutdown.cancel();
        let started = tokio::time::Instant::now();
        assert!(!inner.back_off().await);
        assert!(started.elapsed() < ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_bind_reports_start() {
        let recorder = Arc::new(Recorder::default());
        let server = EmbeddedServer::bind(localhost(0), recorder.clone(), &BindAttempts::default())
            .await
            .expect("bind");

        assert!(server.local_addr().port() > 0);
        assert_eq!(*recorder.started.lock(), Some(server.local_addr()));
        assert_eq!(server.ws_url(), format!("ws://127.0.0.1:{}", server.local_addr().port()));
        assert_eq!(server.peer_count(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_counts_attempts() {
        let attempts = BindAttempts::default();
        let recorder = Arc::new(Recorder::default());
        let first = EmbeddedServer::bind(localhost(0), recorder.clone(), &attempts)
            .await
            .expect("bind");
        let taken = first.local_addr().port();

        let err = EmbeddedServer::bind(localhost(taken), recorder.clone(), &attempts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::BindConflict { port, attempt: 1, next_port }
                if port == taken && next_port == taken.saturating_add(1)
        ));
        assert_eq!(attempts.count(), 1);
        assert_eq!(recorder.errors.lock().len(), 1);

        let err = EmbeddedServer::bind(localhost(taken), recorder.clone(), &attempts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BindConflict { attempt: 2, .. }));

        attempts.reset();
        assert_eq!(attempts.count(), 0);
        first.stop().await;
    }

    #[tokio::test]
    async fn test_peer_message_and_broadcast() {
        let recorder = Arc::new(Recorder::default());
        let server = EmbeddedServer::bind(localhost(0), recorder.clone(), &BindAttempts::default())
            .await
            .expect("bind");

        let (mut client, _) = connect_async(server.ws_url()).await.expect("client connect");
        eventually(|| server.peer_count() == 1).await;

        client.send(Message::Text("ping".into())).await.expect("client send");
        eventually(|| !recorder.messages.lock().is_empty()).await;
        assert_eq!(recorder.messages.lock()[0], Payload::from("ping"));

        assert_eq!(server.broadcast("all".into()), 1);
        let reply = client.next().await.expect("frame").expect("ok");
        assert_eq!(reply.into_text().expect("text").as_str(), "all");

        client.close(None).await.expect("client close");
        eventually(|| !recorder.closed.lock().is_empty()).await;
        assert_eq!(server.peer_count(), 0);
        assert!(recorder.closed.lock()[0].remote);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_peers_with_going_away() {
        let recorder = Arc::new(Recorder::default());
        let server = EmbeddedServer::bind(localhost(0), recorder.clone(), &BindAttempts::default())
            .await
            .expect("bind");

        let (mut client, _) = connect_async(server.ws_url()).await.expect("client connect");
        eventually(|| server.peer_count() == 1).await;

        server.stop().await;
        server.stop().await;

        let frame = client.next().await.expect("frame").expect("ok");
        match frame {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1001),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(recorder.closed.lock()[0].code, 1001);
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let server = EmbeddedServer::bind(
            localhost(0),
            Arc::new(Recorder::default()),
            &BindAttempts::default(),
        )
        .await
        .expect("bind");

        assert!(server.send(PeerId::next(), "x".into()).is_err());
        assert!(!server.disconnect(PeerId::next()));
        server.stop().await;
    }
}
