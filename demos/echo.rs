//! Embedded echo server with a managed client connection.
//!
//! Demonstrates:
//! - Starting the embedded server and echoing peer messages
//! - A keyed client connection with reconnect and heartbeat
//! - Restarting the server and watching the client recover
//!
//! Usage:
//!   cargo run --example echo
//!   cargo run --example echo -- --debug --port 8800

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{Args, init_logging, wait_for_exit};
use ws_keeper::{
    ConnectionConfig, ConnectionKey, ConnectionListener, ConnectionRegistry, DisconnectReason,
    Payload, PeerId, Result, ServerListener,
};

// ============================================================================
// Listeners
// ============================================================================

/// Echoes every peer message back through the registry.
struct Echo {
    registry: ConnectionRegistry,
}

impl ServerListener for Echo {
    fn on_start(&self, addr: SocketAddr) {
        println!("[server] listening on {addr}");
    }

    fn on_open(&self, peer: PeerId, addr: SocketAddr) {
        println!("[server] {peer} joined from {addr}");
    }

    fn on_message(&self, peer: PeerId, payload: &Payload) {
        if let Err(e) = self.registry.server_send(peer, payload.clone()) {
            println!("[server] echo to {peer} failed: {e}");
        }
    }

    fn on_close(&self, peer: PeerId, reason: &DisconnectReason) {
        println!("[server] {peer} left: {reason}");
    }
}

/// Prints client events.
struct Printer;

impl ConnectionListener for Printer {
    fn on_connected(&self, key: &ConnectionKey) {
        println!("[{key}] connected");
    }

    fn on_disconnected(&self, key: &ConnectionKey, reason: &DisconnectReason) {
        println!("[{key}] disconnected: {reason}");
    }

    fn on_message(&self, key: &ConnectionKey, payload: &Payload) {
        match payload.as_text() {
            Some(text) => println!("[{key}] echo: {text}"),
            None => println!("[{key}] echo: {} bytes", payload.len()),
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let registry = ConnectionRegistry::new()?;

    let addr: SocketAddr = ([127, 0, 0, 1], args.port).into();
    let echo = Arc::new(Echo {
        registry: registry.clone(),
    });
    let bound = registry.start_server(addr, echo.clone()).await?;

    let key = registry.init(
        ConnectionConfig::builder(format!("ws://{bound}"))
            .key("echo")
            .ping_interval_secs(5)
            .reconnect_attempts(20)
            .reconnect_interval(Duration::from_millis(500))
            .listener(Arc::new(Printer))
            .build()?,
    );
    registry.start().await;
    registry.start_guardian(Duration::from_secs(60))?;

    wait_until_connected(&registry, &key).await;
    for i in 1..=3 {
        registry.send(&key, format!("hello #{i}"))?;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // ========================================================================
    // Server Restart
    // ========================================================================

    println!("[demo] restarting server on {bound}");
    registry.stop_server().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    registry.start_server(bound, echo).await?;

    wait_until_connected(&registry, &key).await;
    registry.send(&key, "back again")?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Some(info) = registry.get_connection(&key) {
        println!("[demo] {info:?}");
    }

    wait_for_exit(args.no_wait).await;

    registry.destroy().await;
    Ok(())
}

async fn wait_until_connected(registry: &ConnectionRegistry, key: &ConnectionKey) {
    while !registry.is_connected(key) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
