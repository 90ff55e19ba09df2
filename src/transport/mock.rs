//! In-memory transport for registry tests.
//!
//! [`MockFactory`] records every transport it creates. [`MockBehavior`]
//! scripts connect failures and delays, and counts how many instances are
//! live at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::listener::{DisconnectReason, Payload};

use super::{Transport, TransportFactory, TransportHandler, TransportState};

// ============================================================================
// MockBehavior
// ============================================================================

/// Scripted behavior shared by every transport of a factory.
#[derive(Debug, Default)]
pub(crate) struct MockBehavior {
    /// Connects left to fail. `usize::MAX` fails forever.
    pub fail_connects: AtomicUsize,
    /// Delay before a connect resolves.
    pub connect_delay: Mutex<Option<Duration>>,
    /// Connect calls that claimed a fresh transport.
    pub connects: AtomicUsize,
    /// Transports currently connecting or open.
    pub live: AtomicUsize,
    /// Highest value `live` reached.
    pub max_live: AtomicUsize,
}

impl MockBehavior {
    /// Fails every connect from now on.
    pub fn fail_forever(&self) {
        self.fail_connects.store(usize::MAX, Ordering::SeqCst);
    }

    /// Lets connects succeed again.
    pub fn succeed(&self) {
        self.fail_connects.store(0, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        self.fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }

    fn enter_live(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
    }

    fn leave_live(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// MockTransport
// ============================================================================

pub(crate) struct MockTransport {
    pub config: Arc<ConnectionConfig>,
    handler: Arc<dyn TransportHandler>,
    behavior: Arc<MockBehavior>,
    state: Mutex<TransportState>,
    pub sent: Mutex<Vec<Payload>>,
}

impl MockTransport {
    /// Simulates the peer dropping the connection.
    pub fn drop_remote(&self) {
        self.finish(DisconnectReason::abnormal("peer vanished", true));
    }

    /// Delivers an inbound message.
    pub fn deliver(&self, payload: Payload) {
        self.handler.on_message(payload);
    }

    fn finish(&self, reason: DisconnectReason) {
        let previous = std::mem::replace(&mut *self.state.lock(), TransportState::Closed);
        if previous == TransportState::Closed {
            return;
        }
        if previous.is_live() {
            self.behavior.leave_live();
        }
        self.handler.on_close(reason);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !state.is_fresh() {
                return Err(Error::TransportReused);
            }
            *state = TransportState::Connecting;
        }
        self.behavior.connects.fetch_add(1, Ordering::SeqCst);
        self.behavior.enter_live();

        let delay = *self.behavior.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.state.lock() != TransportState::Connecting {
            return Err(Error::ConnectionClosed);
        }

        if self.behavior.should_fail() {
            let err = Error::transport("connection refused");
            self.handler.on_error(&err);
            self.finish(DisconnectReason::abnormal("connection refused", false));
            return Err(err);
        }

        *self.state.lock() = TransportState::Open;
        self.handler.on_open();
        Ok(())
    }

    fn send(&self, payload: Payload) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }
        self.sent.lock().push(payload.clone());
        self.handler.on_sent(&payload);
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    fn close(&self) {
        let state = self.state();
        match state {
            TransportState::Fresh => *self.state.lock() = TransportState::Closed,
            TransportState::Closed => {}
            _ => self.finish(DisconnectReason::normal()),
        }
    }

    async fn close_blocking(&self) {
        self.close();
    }
}

// ============================================================================
// MockFactory
// ============================================================================

#[derive(Default)]
pub(crate) struct MockFactory {
    pub behavior: Arc<MockBehavior>,
    pub created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the most recently created transport.
    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.created.lock().last().cloned()
    }

    /// Returns how many transports were created.
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Returns how many connect calls claimed a transport.
    pub fn connects(&self) -> usize {
        self.behavior.connects.load(Ordering::SeqCst)
    }
}

impl TransportFactory for MockFactory {
    fn create(
        &self,
        config: Arc<ConnectionConfig>,
        handler: Arc<dyn TransportHandler>,
    ) -> Arc<dyn Transport> {
        let transport = Arc::new(MockTransport {
            config,
            handler,
            behavior: Arc::clone(&self.behavior),
            state: Mutex::new(TransportState::Fresh),
            sent: Mutex::new(Vec::new()),
        });
        self.created.lock().push(Arc::clone(&transport));
        transport
    }
}
