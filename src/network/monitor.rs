//! Network availability flag and edge detection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Error;
use crate::logging::verbose;

use super::{NetworkCallback, NetworkObserver, NetworkStatus};

/// Registration with the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Unregistered,
    Registered,
    /// The observer refused. Not retried until `unregister`.
    Denied,
}

/// Availability shared with the observer callback.
#[derive(Debug)]
struct MonitorState {
    available: AtomicBool,
    /// Set once the first callback after registration arrived.
    primed: AtomicBool,
}

impl MonitorState {
    /// Records `status` and returns `true` on an unavailable to available
    /// edge. The first report after registration only records.
    fn observe(&self, status: Option<&NetworkStatus>) -> bool {
        let now = status.is_some_and(NetworkStatus::is_internet_capable);
        let previous = self.available.swap(now, Ordering::SeqCst);
        let first = !self.primed.swap(true, Ordering::SeqCst);

        if previous != now {
            info!(available = now, "Network availability changed");
        }

        !first && !previous && now
    }
}

/// Owns the global availability flag.
pub(crate) struct NetworkMonitor {
    observer: Option<Arc<dyn NetworkObserver>>,
    registration: Mutex<Registration>,
    state: Arc<MonitorState>,
}

impl NetworkMonitor {
    /// Creates a monitor. Without an observer the network is always
    /// considered available.
    pub(crate) fn new(observer: Option<Arc<dyn NetworkObserver>>) -> Self {
        Self {
            observer,
            registration: Mutex::new(Registration::Unregistered),
            state: Arc::new(MonitorState {
                available: AtomicBool::new(true),
                primed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the current availability.
    #[inline]
    pub(crate) fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    /// Registers with the observer once. `on_available` runs on every
    /// unavailable to available edge.
    pub(crate) fn register(&self, on_available: Arc<dyn Fn() + Send + Sync>) {
        let Some(observer) = &self.observer else {
            return;
        };

        {
            let mut registration = self.registration.lock();
            if *registration != Registration::Unregistered {
                verbose!(state = ?*registration, "Network monitor already registered");
                return;
            }
            *registration = Registration::Registered;
        }

        self.state.primed.store(false, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        let callback: NetworkCallback = Arc::new(move |status: Option<NetworkStatus>| {
            if state.observe(status.as_ref()) {
                on_available();
            }
        });

        match observer.start(callback) {
            Ok(()) => verbose!("Network monitor registered"),
            Err(e) => {
                let denied = matches!(e, Error::PermissionDenied { .. });
                if denied {
                    warn!(error = %e, "Network observation denied, relying on watchdog");
                    *self.registration.lock() = Registration::Denied;
                } else {
                    warn!(error = %e, "Network monitor registration failed");
                    *self.registration.lock() = Registration::Unregistered;
                }
            }
        }
    }

    /// Stops observing. Idempotent.
    pub(crate) fn unregister(&self) {
        let previous =
            std::mem::replace(&mut *self.registration.lock(), Registration::Unregistered);
        if previous == Registration::Registered
            && let Some(observer) = &self.observer
        {
            observer.stop();
            verbose!("Network monitor unregistered");
        }
    }
}
