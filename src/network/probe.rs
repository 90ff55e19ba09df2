//! TCP reachability probe.
//!
//! [`ProbeNetworkObserver`] periodically opens a TCP connection to a known
//! address and reports the network as online while that succeeds. Only
//! changes are reported, plus the first result after `start`.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

use super::{NetworkCallback, NetworkObserver, NetworkStatus};

// ============================================================================
// Constants
// ============================================================================

/// Default time between probes.
pub const DEFAULT_PROBE_PERIOD: Duration = Duration::from_secs(10);

/// Default limit for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// ProbeNetworkObserver
// ============================================================================

/// Observer that infers connectivity from TCP reachability.
#[derive(Debug)]
pub struct ProbeNetworkObserver {
    target: SocketAddr,
    period: Duration,
    probe_timeout: Duration,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ProbeNetworkObserver {
    /// Creates a probe against `target` with default timings.
    #[must_use]
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            period: DEFAULT_PROBE_PERIOD,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            cancel: Mutex::new(None),
        }
    }

    /// Sets the time between probes.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Sets the limit for a single probe.
    #[must_use]
    pub fn with_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Returns the probed address.
    #[inline]
    #[must_use]
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl NetworkObserver for ProbeNetworkObserver {
    fn start(&self, on_change: NetworkCallback) -> Result<()> {
        if self.period.is_zero() {
            return Err(Error::config("probe period must be greater than zero"));
        }
        let handle = Handle::try_current()
            .map_err(|_| Error::config("network probe requires a tokio runtime"))?;

        let token = CancellationToken::new();
        if let Some(previous) = self.cancel.lock().replace(token.clone()) {
            previous.cancel();
        }

        handle.spawn(probe_loop(
            self.target,
            self.period,
            self.probe_timeout,
            token,
            on_change,
        ));
        Ok(())
    }

    fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }
}

impl Drop for ProbeNetworkObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Probe Loop
// ============================================================================

async fn probe_loop(
    target: SocketAddr,
    period: Duration,
    probe_timeout: Duration,
    cancel: CancellationToken,
    on_change: NetworkCallback,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<bool> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let reachable = matches!(
            timeout(probe_timeout, TcpStream::connect(target)).await,
            Ok(Ok(_))
        );

        if last != Some(reachable) {
            debug!(%target, reachable, "Network probe changed");
            last = Some(reachable);
            on_change(reachable.then(NetworkStatus::online));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
