//! Client transport over `tokio-tungstenite`.
//!
//! [`WsTransport`] is the default [`Transport`]: one instance performs one
//! handshake and owns one socket for its whole life.
//!
//! # Event Loop
//!
//! After the handshake the transport spawns a tokio task that handles:
//!
//! - Incoming frames (text, binary, ping, pong, close)
//! - Outgoing commands from the registry (send, ping, close)
//! - Heartbeat pings, and a forced close when nothing arrives for 1.5x the
//!   ping interval
//! - Cancellation on abort

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, interval_at, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::listener::{DisconnectReason, Payload};

use super::{Transport, TransportFactory, TransportHandler, TransportState};

// ============================================================================
// Constants
// ============================================================================

/// How long a graceful close waits for the peer's close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Internal commands for the event loop.
enum TransportCommand {
    /// Write a message.
    Send(Payload),
    /// Write a ping frame.
    Ping,
    /// Start the close handshake.
    Close,
}

// ============================================================================
// WsTransport
// ============================================================================

/// Single-use WebSocket client transport.
///
/// # Thread Safety
///
/// `WsTransport` is `Send + Sync`. Sends are non-blocking: they enqueue a
/// command for the event loop and completion is reported via `on_sent`.
pub struct WsTransport {
    /// Shared configuration.
    config: Arc<ConnectionConfig>,
    /// Event sink.
    handler: Arc<dyn TransportHandler>,
    /// Lifecycle, observable for `close_blocking`.
    state: Arc<watch::Sender<TransportState>>,
    /// Channel to the event loop, set once open.
    command_tx: Mutex<Option<mpsc::UnboundedSender<TransportCommand>>>,
    /// Aborts the handshake or the event loop.
    cancel: CancellationToken,
}

impl WsTransport {
    /// Creates a fresh, unconnected transport.
    #[must_use]
    pub fn new(config: Arc<ConnectionConfig>, handler: Arc<dyn TransportHandler>) -> Self {
        let (state, _) = watch::channel(TransportState::Fresh);
        Self {
            config,
            handler,
            state: Arc::new(state),
            command_tx: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Builds the handshake request with the configured headers.
    fn build_request(&self) -> Result<Request> {
        let mut request = self.config.server_url().as_str().into_client_request()?;

        for (name, value) in self.config.http_headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        Ok(request)
    }

    /// Performs the handshake, honoring the connect timeout.
    async fn handshake(&self) -> Result<WsStream> {
        let request = self.build_request()?;
        let connect = connect_async(request);

        let (ws_stream, _response) = match self.config.connect_timeout() {
            Some(limit) => timeout(limit, connect)
                .await
                .map_err(|_| Error::connection_timeout(limit.as_millis() as u64))??,
            None => connect.await?,
        };

        Ok(ws_stream)
    }

    /// Publishes the open state and spawns the event loop.
    fn start_event_loop(&self, ws_stream: WsStream) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.command_tx.lock() = Some(command_tx);
        self.state.send_replace(TransportState::Open);

        debug!(
            key = %self.config.key(),
            draft = self.config.protocol_draft().version(),
            "WebSocket connection established"
        );
        self.handler.on_open();

        let event_loop = EventLoop {
            handler: Arc::clone(&self.handler),
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
            ping_interval: self.config.ping_interval(),
            heartbeat_timeout: self.config.heartbeat_timeout(),
        };
        tokio::spawn(event_loop.run(ws_stream, command_rx));
    }

    /// Enqueues a command for the event loop.
    fn enqueue(&self, command: TransportCommand) -> Result<()> {
        if *self.state.borrow() != TransportState::Open {
            return Err(Error::ConnectionClosed);
        }

        let guard = self.command_tx.lock();
        let tx = guard.as_ref().ok_or(Error::ConnectionClosed)?;
        tx.send(command).map_err(|_| Error::ConnectionClosed)
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    async fn connect(&self) -> Result<()> {
        let claimed = self.state.send_if_modified(|state| {
            if state.is_fresh() {
                *state = TransportState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(Error::TransportReused);
        }

        debug!(key = %self.config.key(), url = %self.config.server_url(), "Connecting");

        let outcome = tokio::select! {
            () = self.cancel.cancelled() => Err(Error::ConnectionClosed),
            result = self.handshake() => result,
        };

        match outcome {
            Ok(ws_stream) => {
                self.start_event_loop(ws_stream);
                Ok(())
            }
            Err(e) => {
                debug!(key = %self.config.key(), error = %e, "Connect failed");
                self.handler.on_error(&e);
                finish(
                    &self.state,
                    &*self.handler,
                    DisconnectReason::abnormal(e.to_string(), false),
                );
                Err(e)
            }
        }
    }

    fn send(&self, payload: Payload) -> Result<()> {
        self.enqueue(TransportCommand::Send(payload))
    }

    fn ping(&self) -> Result<()> {
        self.enqueue(TransportCommand::Ping)
    }

    fn close(&self) {
        let mut request_close = false;
        let mut abort = false;

        self.state.send_if_modified(|state| match *state {
            TransportState::Fresh => {
                *state = TransportState::Closed;
                true
            }
            TransportState::Open => {
                *state = TransportState::Closing;
                request_close = true;
                true
            }
            TransportState::Connecting => {
                abort = true;
                false
            }
            TransportState::Closing | TransportState::Closed => false,
        });

        if request_close {
            let sent = self
                .command_tx
                .lock()
                .as_ref()
                .is_some_and(|tx| tx.send(TransportCommand::Close).is_ok());
            if !sent {
                self.cancel.cancel();
            }
        } else if abort {
            self.cancel.cancel();
        }
    }

    async fn close_blocking(&self) {
        self.close();

        let mut state_rx = self.state.subscribe();
        let graceful = matches!(
            timeout(
                CLOSE_TIMEOUT,
                state_rx.wait_for(|state| *state == TransportState::Closed)
            )
            .await,
            Ok(Ok(_))
        );

        if !graceful {
            warn!(key = %self.config.key(), "Graceful close timed out, aborting");
            self.cancel.cancel();
            let _ = timeout(
                CLOSE_TIMEOUT,
                state_rx.wait_for(|state| *state == TransportState::Closed),
            )
            .await;
        }
    }
}

impl fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransport")
            .field("key", self.config.key())
            .field("url", &self.config.server_url().as_str())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WsTransportFactory
// ============================================================================

/// Factory producing [`WsTransport`] instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransportFactory;

impl TransportFactory for WsTransportFactory {
    fn create(
        &self,
        config: Arc<ConnectionConfig>,
        handler: Arc<dyn TransportHandler>,
    ) -> Arc<dyn Transport> {
        Arc::new(WsTransport::new(config, handler))
    }
}

// ============================================================================
// EventLoop
// ============================================================================

/// Task state for one open socket.
struct EventLoop {
    handler: Arc<dyn TransportHandler>,
    state: Arc<watch::Sender<TransportState>>,
    cancel: CancellationToken,
    ping_interval: Option<Duration>,
    heartbeat_timeout: Option<Duration>,
}

impl EventLoop {
    /// Event loop that handles WebSocket I/O.
    async fn run(
        self,
        ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        // A period too large to schedule behaves as heartbeats off.
        let mut heartbeat = self.ping_interval.and_then(|period| {
            Instant::now()
                .checked_add(period)
                .map(|start| interval_at(start, period))
        });
        let mut last_seen = Instant::now();

        let reason = loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("Transport aborted");
                    break DisconnectReason::abnormal("connection aborted", false);
                }

                // Incoming frames from the peer
                message = ws_read.next() => {
                    last_seen = Instant::now();
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.handler.on_message(Payload::Text(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Binary(bytes))) => {
                            self.handler.on_message(Payload::Binary(bytes.to_vec()));
                        }

                        Some(Ok(Message::Ping(data))) => {
                            trace!("Ping received");
                            self.handler.on_ping(&data);
                        }

                        Some(Ok(Message::Pong(data))) => {
                            trace!("Pong received");
                            self.handler.on_pong(&data);
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!("WebSocket closed by remote");
                            let _ = ws_write.flush().await;
                            break DisconnectReason::from_frame(frame, true);
                        }

                        Some(Ok(Message::Frame(_))) => {}

                        Some(Err(e)) => {
                            let error = Error::from(e);
                            warn!(error = %error, "WebSocket error");
                            self.handler.on_error(&error);
                            break DisconnectReason::abnormal(error.to_string(), false);
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break DisconnectReason::abnormal("stream ended", true);
                        }
                    }
                }

                // Commands from the registry
                command = command_rx.recv() => {
                    match command {
                        Some(TransportCommand::Send(payload)) => {
                            match ws_write.send(payload.clone().into_message()).await {
                                Ok(()) => {
                                    trace!(bytes = payload.len(), "Message sent");
                                    self.handler.on_sent(&payload);
                                }
                                Err(e) => {
                                    let error = Error::from(e);
                                    self.handler.on_error(&error);
                                    break DisconnectReason::abnormal(error.to_string(), false);
                                }
                            }
                        }

                        Some(TransportCommand::Ping) => {
                            if let Err(e) = ws_write.send(Message::Ping(Vec::new().into())).await {
                                let error = Error::from(e);
                                self.handler.on_error(&error);
                                break DisconnectReason::abnormal(error.to_string(), false);
                            }
                        }

                        Some(TransportCommand::Close) | None => {
                            break close_gracefully(&mut ws_write, &mut ws_read).await;
                        }
                    }
                }

                () = next_heartbeat(&mut heartbeat) => {
                    if let Some(limit) = self.heartbeat_timeout
                        && last_seen.elapsed() > limit
                    {
                        warn!(timeout_ms = limit.as_millis() as u64, "Heartbeat lost, closing");
                        break DisconnectReason::abnormal(
                            format!("no heartbeat response within {}ms", limit.as_millis()),
                            false,
                        );
                    }

                    if let Err(e) = ws_write.send(Message::Ping(Vec::new().into())).await {
                        let error = Error::from(e);
                        self.handler.on_error(&error);
                        break DisconnectReason::abnormal(error.to_string(), false);
                    }
                }
            }
        };

        finish(&self.state, &*self.handler, reason);
        debug!("Event loop terminated");
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Waits for the next heartbeat tick, or forever when heartbeats are off.
async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

/// Sends a close frame and waits briefly for the peer's reply.
async fn close_gracefully(ws_write: &mut WsSink, ws_read: &mut WsSource) -> DisconnectReason {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };

    if let Err(e) = ws_write.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Close frame not delivered");
        return DisconnectReason::normal();
    }

    let drain = async {
        while let Some(Ok(message)) = ws_read.next().await {
            if message.is_close() {
                break;
            }
        }
    };

    if timeout(CLOSE_TIMEOUT, drain).await.is_err() {
        debug!("Close handshake timed out");
    }

    DisconnectReason::normal()
}

/// Moves to `Closed` and reports `on_close` once.
fn finish(
    state: &watch::Sender<TransportState>,
    handler: &dyn TransportHandler,
    reason: DisconnectReason,
) {
    let previous = state.send_replace(TransportState::Closed);
    if previous != TransportState::Closed {
        handler.on_close(reason);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use tokio::net::TcpListener;

    use crate::identifiers::PeerId;
    use crate::listener::{NoopListener, ServerListener};
    use crate::transport::server::{BindAttempts, EmbeddedServer};

    /// Event observed by [`RecordingHandler`].
    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Open,
        Message(Payload),
        Close(DisconnectReason),
        Error,
        Sent(Payload),
    }

    struct RecordingHandler(mpsc::UnboundedSender<Seen>);

    impl TransportHandler for RecordingHandler {
        fn on_open(&self) {
            let _ = self.0.send(Seen::Open);
        }
        fn on_message(&self, payload: Payload) {
            let _ = self.0.send(Seen::Message(payload));
        }
        fn on_close(&self, reason: DisconnectReason) {
            let _ = self.0.send(Seen::Close(reason));
        }
        fn on_error(&self, _error: &Error) {
            let _ = self.0.send(Seen::Error);
        }
        fn on_ping(&self, _data: &[u8]) {}
        fn on_pong(&self, _data: &[u8]) {}
        fn on_sent(&self, payload: &Payload) {
            let _ = self.0.send(Seen::Sent(payload.clone()));
        }
    }

    #[derive(Default)]
    struct PeerRecorder {
        peers: Mutex<Vec<PeerId>>,
        messages: Mutex<Vec<Payload>>,
    }

    impl ServerListener for PeerRecorder {
        fn on_open(&self, peer: PeerId, _addr: SocketAddr) {
            self.peers.lock().push(peer);
        }
        fn on_message(&self, _peer: PeerId, payload: &Payload) {
            self.messages.lock().push(payload.clone());
        }
    }

    fn transport(url: &str) -> (WsTransport, mpsc::UnboundedReceiver<Seen>) {
        transport_with_ping(url, 0)
    }

    fn transport_with_ping(
        url: &str,
        ping_interval_secs: i64,
    ) -> (WsTransport, mpsc::UnboundedReceiver<Seen>) {
        let config = ConnectionConfig::builder(url)
            .ping_interval_secs(ping_interval_secs)
            .listener(Arc::new(NoopListener))
            .build()
            .expect("config");
        let (tx, rx) = mpsc::unbounded_channel();
        (
            WsTransport::new(Arc::new(config), Arc::new(RecordingHandler(tx))),
            rx,
        )
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr").port()
    }

    async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_new_transport_is_fresh() {
        let (transport, _rx) = transport("ws://127.0.0.1:1");
        assert_eq!(transport.state(), TransportState::Fresh);
        assert!(!transport.is_open());
        assert!(matches!(transport.send("x".into()), Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_failed_connect_reports_error_then_close() {
        let port = unused_port().await;
        let (transport, mut rx) = transport(&format!("ws://127.0.0.1:{port}"));

        assert!(transport.connect().await.is_err());
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(next_seen(&mut rx).await, Seen::Error);
        assert!(matches!(next_seen(&mut rx).await, Seen::Close(r) if r.code == 1006 && !r.remote));
    }

    #[tokio::test]
    async fn test_used_transport_refuses_reconnect() {
        let port = unused_port().await;
        let (transport, _rx) = transport(&format!("ws://127.0.0.1:{port}"));

        let _ = transport.connect().await;
        let err = transport.connect().await.unwrap_err();
        assert!(err.is_transport_reused());
    }

    #[tokio::test]
    async fn test_closed_before_use_refuses_connect() {
        let (transport, _rx) = transport("ws://127.0.0.1:1");
        transport.close();
        assert!(transport.is_closed());
        assert!(matches!(transport.connect().await, Err(Error::TransportReused)));
    }

    #[tokio::test]
    async fn test_round_trip_with_embedded_server() -> anyhow::Result<()> {
        use anyhow::Context;

        let recorder = Arc::new(PeerRecorder::default());
        let server = EmbeddedServer::bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            Arc::clone(&recorder) as Arc<dyn ServerListener>,
            &BindAttempts::default(),
        )
        .await
        .context("server bind")?;

        let (transport, mut rx) = transport(&server.ws_url());
        transport.connect().await.context("connect")?;
        assert!(transport.is_open());
        assert_eq!(next_seen(&mut rx).await, Seen::Open);

        transport.send("hello".into())?;
        assert_eq!(next_seen(&mut rx).await, Seen::Sent("hello".into()));

        // Wait for the server side to register the peer and message.
        let mut peer = None;
        for _ in 0..50 {
            if !recorder.messages.lock().is_empty() {
                peer = recorder.peers.lock().first().copied();
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let peer = peer.context("peer registered")?;
        assert_eq!(recorder.messages.lock()[0], Payload::from("hello"));

        server.send(peer, "world".into())?;
        assert_eq!(next_seen(&mut rx).await, Seen::Message("world".into()));

        transport.close_blocking().await;
        assert!(transport.is_closed());
        assert!(matches!(next_seen(&mut rx).await, Seen::Close(r) if r.code == 1000 && !r.remote));

        server.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_silent_peer_is_force_closed_after_heartbeat_timeout() {
        // Completes the handshake, then never reads, so pings go unanswered.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let _ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let (transport, mut rx) = transport_with_ping(&format!("ws://127.0.0.1:{port}"), 1);
        transport.connect().await.expect("connect");
        assert_eq!(next_seen(&mut rx).await, Seen::Open);

        // Timeout is 1.5s; the second tick at 2s closes the socket.
        let started = Instant::now();
        match next_seen(&mut rx).await {
            Seen::Close(reason) => {
                assert_eq!(reason.code, DisconnectReason::ABNORMAL);
                assert!(!reason.remote);
                assert!(reason.reason.contains("heartbeat"));
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(transport.is_closed());

        peer.abort();
    }

    #[tokio::test]
    async fn test_huge_ping_interval_still_reports_close() {
        let server = EmbeddedServer::bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            Arc::new(NoopListener),
            &BindAttempts::default(),
        )
        .await
        .expect("server bind");

        let (transport, mut rx) = transport_with_ping(&server.ws_url(), i64::MAX);
        transport.connect().await.expect("connect");
        assert_eq!(next_seen(&mut rx).await, Seen::Open);

        server.stop().await;
        assert!(matches!(next_seen(&mut rx).await, Seen::Close(r) if r.remote));
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // A listener that never completes the handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let config = ConnectionConfig::builder(format!("ws://127.0.0.1:{port}"))
            .connect_timeout(Duration::from_millis(200))
            .listener(Arc::new(NoopListener))
            .build()
            .expect("config");
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = WsTransport::new(Arc::new(config), Arc::new(RecordingHandler(tx)));

        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 200 }));
        assert!(transport.is_closed());
        drop(listener);
    }
}
