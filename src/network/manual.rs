//! Push-driven network observer.
//!
//! Platform glue (or a test) calls [`ManualNetworkObserver::set_status`]
//! whenever connectivity changes.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{Error, Result};

use super::{NetworkCallback, NetworkObserver, NetworkStatus};

/// Observer fed by explicit status updates.
///
/// # Example
///
/// ```ignore
/// let observer = Arc::new(ManualNetworkObserver::new(Some(NetworkStatus::online())));
/// let registry = ConnectionRegistry::builder()
///     .network_observer(observer.clone())
///     .build()?;
///
/// observer.set_status(None); // offline
/// ```
pub struct ManualNetworkObserver {
    status: Mutex<Option<NetworkStatus>>,
    callback: Mutex<Option<NetworkCallback>>,
    denied: bool,
}

impl ManualNetworkObserver {
    /// Creates an observer reporting `initial` on start.
    #[must_use]
    pub fn new(initial: Option<NetworkStatus>) -> Self {
        Self {
            status: Mutex::new(initial),
            callback: Mutex::new(None),
            denied: false,
        }
    }

    /// Creates an observer whose `start` fails with `PermissionDenied`.
    #[must_use]
    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::new(None)
        }
    }

    /// Returns the last reported status.
    #[must_use]
    pub fn status(&self) -> Option<NetworkStatus> {
        self.status.lock().clone()
    }

    /// Records a new status and reports it if started.
    pub fn set_status(&self, status: Option<NetworkStatus>) {
        *self.status.lock() = status.clone();
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(status);
        }
    }

    /// Returns `true` while a callback is registered.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.callback.lock().is_some()
    }
}

impl Default for ManualNetworkObserver {
    fn default() -> Self {
        Self::new(Some(NetworkStatus::online()))
    }
}

impl NetworkObserver for ManualNetworkObserver {
    fn start(&self, on_change: NetworkCallback) -> Result<()> {
        if self.denied {
            return Err(Error::permission_denied("network state access not granted"));
        }

        *self.callback.lock() = Some(on_change.clone());
        on_change(self.status());
        Ok(())
    }

    fn stop(&self) {
        self.callback.lock().take();
    }
}

impl fmt::Debug for ManualNetworkObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualNetworkObserver")
            .field("status", &*self.status.lock())
            .field("started", &self.is_started())
            .field("denied", &self.denied)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[test]
    fn test_start_reports_current_status() {
        let observer = ManualNetworkObserver::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        observer
            .start(Arc::new(move |status: Option<NetworkStatus>| sink.lock().push(status)))
            .unwrap();
        observer.set_status(None);
        observer.stop();
        observer.set_status(Some(NetworkStatus::online()));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_some());
        assert!(seen[1].is_none());
    }

    #[test]
    fn test_denied() {
        let observer = ManualNetworkObserver::denied();
        let err = observer.start(Arc::new(|_: Option<NetworkStatus>| {})).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert!(!observer.is_started());
    }
}
