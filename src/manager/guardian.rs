//! Periodic watchdog that re-drives `start`.
//!
//! The guardian is the coarse recovery path: whatever the reconnect cycles
//! and the network monitor missed, it retries once per interval. To avoid
//! racing a full reconnect cycle, its interval must be strictly longer than
//! `2 × max(reconnect_attempts) × max(reconnect_interval)` across all
//! registered connections.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};

use super::registry::RegistryInner;
use super::scheduler::Trigger;

// ============================================================================
// Constants
// ============================================================================

/// Default watchdog period.
pub const DEFAULT_GUARDIAN_INTERVAL: Duration = Duration::from_secs(30 * 60);

// ============================================================================
// GuardianWatchdog
// ============================================================================

/// Handle to a running watchdog task. Dropping it stops the task.
#[derive(Debug)]
pub(crate) struct GuardianWatchdog {
    interval: Duration,
    token: CancellationToken,
}

impl GuardianWatchdog {
    /// Returns the smallest interval the guardian must exceed.
    pub(crate) fn lower_bound<'a>(
        configs: impl IntoIterator<Item = &'a ConnectionConfig>,
    ) -> Duration {
        let (max_attempts, max_interval) = configs.into_iter().fold(
            (0u32, Duration::ZERO),
            |(attempts, interval), config| {
                (
                    attempts.max(config.reconnect_attempts()),
                    interval.max(config.reconnect_interval()),
                )
            },
        );
        max_interval.saturating_mul(max_attempts.saturating_mul(2))
    }

    /// Checks `interval` against the registered configurations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `interval` is zero or not greater than
    /// [`lower_bound`](Self::lower_bound).
    pub(crate) fn validate<'a>(
        interval: Duration,
        configs: impl IntoIterator<Item = &'a ConnectionConfig>,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::config("guardian interval must be greater than zero"));
        }

        let bound = Self::lower_bound(configs);
        if interval <= bound {
            return Err(Error::config(format!(
                "guardian interval {}ms must exceed 2 x attempts x reconnect interval ({}ms)",
                interval.as_millis(),
                bound.as_millis()
            )));
        }
        Ok(())
    }

    /// Spawns the watchdog. The first sweep runs one interval from now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `interval` is too large to schedule.
    pub(crate) fn spawn(
        handle: &Handle,
        interval: Duration,
        registry: Weak<RegistryInner>,
    ) -> Result<Self> {
        let first_sweep = Instant::now().checked_add(interval).ok_or_else(|| {
            Error::config(format!(
                "guardian interval {}ms is too large to schedule",
                interval.as_millis()
            ))
        })?;

        let token = CancellationToken::new();
        handle.spawn(watch(registry, first_sweep, interval, token.clone()));
        info!(interval_ms = interval.as_millis() as u64, "Guardian started");
        Ok(Self { interval, token })
    }

    #[inline]
    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn stop(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
            info!("Guardian stopped");
        }
    }
}

impl Drop for GuardianWatchdog {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn watch(
    registry: Weak<RegistryInner>,
    first_sweep: Instant,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval_at(first_sweep, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = registry.upgrade() else {
            break;
        };
        debug!("Guardian sweep");
        inner.start_all(Trigger::Guardian).await;
    }

    debug!("Guardian task terminated");
}

// ============================================================================
// Tests
// ============================================================================
