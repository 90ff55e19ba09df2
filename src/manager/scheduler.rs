//! Per-connection reconnect scheduling.
//!
//! Each managed connection carries a [`ReconnectScheduler`] that moves
//! `Idle → Running → Idle`. A running cycle fires every reconnect interval
//! and tries to connect through the registry until the connection opens,
//! the network goes away, or the attempt budget runs out.
//!
//! # Gates
//!
//! `execute` starts a cycle only if, in order:
//!
//! 1. reconnection is enabled (`reconnect_attempts > 0`)
//! 2. the connection is not open
//! 3. the network is available
//! 4. no cycle is running for this key
//! 5. for [`Trigger::TransportClosed`] only, the last cycle did not exhaust
//!    its attempts
//!
//! A refused trigger is a no-op.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::identifiers::ConnectionKey;
use crate::logging::verbose;

use super::connection::ConnectionState;
use super::registry::RegistryInner;

// ============================================================================
// Trigger
// ============================================================================

/// What asked for a reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Explicit `reconnect(key)` call.
    Manual,
    /// The transport closed or failed to connect.
    TransportClosed,
    /// The network became available.
    NetworkAvailable,
    /// Periodic watchdog sweep.
    Guardian,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manual => "manual",
            Self::TransportClosed => "transport_closed",
            Self::NetworkAvailable => "network_available",
            Self::Guardian => "guardian",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SchedulerState
// ============================================================================

/// Whether a reconnect cycle is in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    /// No cycle.
    #[default]
    Idle,
    /// A cycle is firing.
    Running,
}

// ============================================================================
// ReconnectScheduler
// ============================================================================

/// Handle to the running cycle.
#[derive(Debug)]
struct ReconnectJob {
    cycle: u64,
    token: CancellationToken,
}

/// Reconnect bookkeeping for one key.
#[derive(Debug, Default)]
pub(crate) struct ReconnectScheduler {
    job: Option<ReconnectJob>,
    /// Cycles started so far, used to tell cycles apart.
    cycles: u64,
    /// Attempts made by the current or last cycle.
    attempt: u32,
    /// Latched when a cycle ends with its attempts used up.
    exhausted: bool,
}

impl ReconnectScheduler {
    #[inline]
    pub(crate) fn state(&self) -> SchedulerState {
        if self.job.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.job.is_some()
    }

    #[inline]
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    #[inline]
    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Returns why `trigger` may not start a cycle, if anything.
    pub(crate) fn refusal(
        &self,
        trigger: Trigger,
        enabled: bool,
        open: bool,
        network_available: bool,
    ) -> Option<&'static str> {
        if !enabled {
            Some("reconnection disabled")
        } else if open {
            Some("connection already open")
        } else if !network_available {
            Some("network unavailable")
        } else if self.is_running() {
            Some("cycle already running")
        } else if trigger == Trigger::TransportClosed && self.exhausted {
            Some("attempts exhausted")
        } else {
            None
        }
    }

    /// Enters `Running` and returns the new cycle's id and token.
    pub(crate) fn begin(&mut self) -> (u64, CancellationToken) {
        self.cycles += 1;
        self.attempt = 0;
        self.exhausted = false;

        let token = CancellationToken::new();
        self.job = Some(ReconnectJob {
            cycle: self.cycles,
            token: token.clone(),
        });
        (self.cycles, token)
    }

    /// Returns `true` if `cycle` is the running one.
    #[inline]
    pub(crate) fn is_current(&self, cycle: u64) -> bool {
        self.job.as_ref().is_some_and(|job| job.cycle == cycle)
    }

    /// Counts one attempt and returns its 1-based number.
    pub(crate) fn record_attempt(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// Ends `cycle` if it is still the running one.
    pub(crate) fn finish(&mut self, cycle: u64, exhausted: bool) -> bool {
        if !self.is_current(cycle) {
            return false;
        }
        self.job = None;
        self.exhausted = exhausted;
        true
    }

    /// The connection opened: stop the cycle and clear the latch.
    pub(crate) fn succeed(&mut self) {
        self.cancel();
        self.exhausted = false;
    }

    /// Cancels the running cycle, if any.
    pub(crate) fn cancel(&mut self) {
        if let Some(job) = self.job.take() {
            job.token.cancel();
        }
    }

    /// Clears the exhaustion latch.
    #[inline]
    pub(crate) fn clear_latch(&mut self) {
        self.exhausted = false;
    }

    /// Clears the attempt counter and the exhaustion latch.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
        self.exhausted = false;
    }
}

// ============================================================================
// RegistryInner - Reconnect
// ============================================================================

/// Outcome of one cycle firing.
enum Firing {
    /// A connect attempt was made.
    Attempted,
    /// The connection is open.
    Connected,
    /// The network went away.
    NetworkLost,
    /// The key or the cycle is gone.
    Superseded,
}

impl RegistryInner {
    /// Starts a reconnect cycle for `key` if every gate passes.
    ///
    /// Returns `true` if a cycle was started.
    pub(crate) fn execute_reconnect(
        self: &Arc<Self>,
        key: &ConnectionKey,
        trigger: Trigger,
    ) -> bool {
        let network_available = self.monitor.is_available();

        let (cycle, token, first_firing, period, attempts) = {
            let mut connections = self.connections.lock();
            let Some(conn) = connections.get_mut(key) else {
                verbose!(key = %key, %trigger, "Reconnect skipped: unknown key");
                return false;
            };

            let open = conn.state == ConnectionState::Open;
            if let Some(reason) = conn.scheduler.refusal(
                trigger,
                conn.config.reconnect_enabled(),
                open,
                network_available,
            ) {
                verbose!(key = %key, %trigger, reason, "Reconnect skipped");
                return false;
            }

            let period = conn.config.reconnect_interval();
            let Some(first_firing) = Instant::now().checked_add(period) else {
                warn!(key = %key, %trigger, "Reconnect skipped: interval too large to schedule");
                return false;
            };

            let (cycle, token) = conn.scheduler.begin();
            (
                cycle,
                token,
                first_firing,
                period,
                conn.config.reconnect_attempts(),
            )
        };

        info!(key = %key, %trigger, cycle, attempts, "Reconnect cycle started");

        self.runtime.spawn(run_cycle(
            Arc::downgrade(self),
            key.clone(),
            cycle,
            token,
            first_firing,
            period,
            attempts,
        ));
        true
    }

    /// Runs one firing of `cycle`.
    async fn fire(self: &Arc<Self>, key: &ConnectionKey, cycle: u64, attempts: u32) -> Firing {
        let attempt = {
            let mut connections = self.connections.lock();
            let Some(conn) = connections.get_mut(key) else {
                return Firing::Superseded;
            };
            if !conn.scheduler.is_current(cycle) {
                return Firing::Superseded;
            }
            if conn.state == ConnectionState::Open {
                return Firing::Connected;
            }
            if !self.monitor.is_available() {
                return Firing::NetworkLost;
            }
            conn.scheduler.record_attempt()
        };

        info!(key = %key, attempt, attempts, "Reconnect attempt");

        if let Err(e) = self.safe_connect(key).await {
            debug!(key = %key, attempt, error = %e, "Reconnect attempt failed");
        }
        Firing::Attempted
    }

    /// Ends `cycle`, latching exhaustion if requested.
    fn finish_cycle(&self, key: &ConnectionKey, cycle: u64, exhausted: bool) {
        let finished = self
            .connections
            .lock()
            .get_mut(key)
            .is_some_and(|conn| conn.scheduler.finish(cycle, exhausted));

        if finished && exhausted {
            warn!(key = %key, cycle, "Reconnect attempts exhausted");
        }
    }
}

/// Fires every `period` until the cycle ends or is cancelled.
///
/// A cancelled cycle stops before its next firing. A firing in progress
/// runs to completion.
async fn run_cycle(
    registry: Weak<RegistryInner>,
    key: ConnectionKey,
    cycle: u64,
    token: CancellationToken,
    first_firing: Instant,
    period: Duration,
    attempts: u32,
) {
    let mut ticker = interval_at(first_firing, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut remaining = attempts;

    let exhausted = loop {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                verbose!(key = %key, cycle, "Reconnect cycle cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let Some(inner) = registry.upgrade() else {
            return;
        };

        match inner.fire(&key, cycle, attempts).await {
            Firing::Attempted => {}
            Firing::Connected => break false,
            Firing::NetworkLost => {
                info!(key = %key, cycle, "Network lost, reconnect cycle ended");
                break false;
            }
            Firing::Superseded => return,
        }

        remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            break true;
        }
    };

    if let Some(inner) = registry.upgrade() {
        inner.finish_cycle(&key, cycle, exhausted);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_order() {
        let scheduler = ReconnectScheduler::default();
        let manual = Trigger::Manual;

        assert_eq!(
            scheduler.refusal(manual, false, true, false),
            Some("reconnection disabled")
        );
        assert_eq!(
            scheduler.refusal(manual, true, true, false),
            Some("connection already open")
        );
        assert_eq!(
            scheduler.refusal(manual, true, false, false),
            Some("network unavailable")
        );
        assert_eq!(scheduler.refusal(manual, true, false, true), None);
    }

    #[test]
    fn test_running_refuses_every_trigger() {
        let mut scheduler = ReconnectScheduler::default();
        let _ = scheduler.begin();
        assert_eq!(scheduler.state(), SchedulerState::Running);

        for trigger in [
            Trigger::Manual,
            Trigger::TransportClosed,
            Trigger::NetworkAvailable,
            Trigger::Guardian,
        ] {
            assert_eq!(
                scheduler.refusal(trigger, true, false, true),
                Some("cycle already running")
            );
        }
    }

    #[test]
    fn test_exhaustion_latch_blocks_only_transport_close() {
        let mut scheduler = ReconnectScheduler::default();
        let (cycle, _token) = scheduler.begin();
        assert!(scheduler.finish(cycle, true));
        assert!(scheduler.is_exhausted());

        assert_eq!(
            scheduler.refusal(Trigger::TransportClosed, true, false, true),
            Some("attempts exhausted")
        );
        assert_eq!(scheduler.refusal(Trigger::NetworkAvailable, true, false, true), None);
        assert_eq!(scheduler.refusal(Trigger::Manual, true, false, true), None);

        scheduler.clear_latch();
        assert_eq!(scheduler.refusal(Trigger::TransportClosed, true, false, true), None);
    }

    #[test]
    fn test_success_cancels_job() {
        let mut scheduler = ReconnectScheduler::default();
        let (cycle, token) = scheduler.begin();
        scheduler.record_attempt();

        scheduler.succeed();
        assert!(token.is_cancelled());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(!scheduler.finish(cycle, true));
        assert!(!scheduler.is_exhausted());
    }

    #[test]
    fn test_stale_cycle_cannot_finish_new_one() {
        let mut scheduler = ReconnectScheduler::default();
        let (first, _) = scheduler.begin();
        scheduler.cancel();
        let (second, _) = scheduler.begin();

        assert_ne!(first, second);
        assert!(!scheduler.finish(first, true));
        assert!(scheduler.is_running());
        assert!(scheduler.finish(second, false));
    }

    #[test]
    fn test_attempts_count_per_cycle() {
        let mut scheduler = ReconnectScheduler::default();
        let (cycle, _) = scheduler.begin();
        assert_eq!(scheduler.record_attempt(), 1);
        assert_eq!(scheduler.record_attempt(), 2);
        scheduler.finish(cycle, false);

        let _ = scheduler.begin();
        assert_eq!(scheduler.attempt(), 0);

        scheduler.record_attempt();
        scheduler.reset();
        assert_eq!(scheduler.attempt(), 0);
    }
}
