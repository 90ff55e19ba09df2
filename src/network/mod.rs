//! Network availability observation.
//!
//! The registry never talks to a platform connectivity API directly. It is
//! handed an [`NetworkObserver`] that reports [`NetworkStatus`] snapshots,
//! and the internal monitor turns those into "became available" edges.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `manual` | Push-driven observer for platform glue and tests |
//! | `probe` | Periodic TCP reachability probe |
//! | `monitor` | Availability flag and edge detection |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Push-driven observer.
pub mod manual;

/// TCP reachability probe.
pub mod probe;

pub(crate) mod monitor;

// ============================================================================
// Re-exports
// ============================================================================

pub use manual::ManualNetworkObserver;
pub use probe::ProbeNetworkObserver;

// ============================================================================
// NetworkCapability
// ============================================================================

/// Capability advertised by the active network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkCapability {
    /// Network is meant to reach the internet.
    Internet,
    /// Internet reachability was validated.
    Validated,
    /// Traffic is not metered.
    NotMetered,
    /// Wi-Fi transport.
    Wifi,
    /// Cellular transport.
    Cellular,
    /// Wired transport.
    Ethernet,
    /// VPN transport.
    Vpn,
}

// ============================================================================
// NetworkStatus
// ============================================================================

/// Snapshot of the active network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Capabilities of the active network.
    pub capabilities: BTreeSet<NetworkCapability>,
}

impl NetworkStatus {
    /// An active network with the internet capability.
    #[must_use]
    pub fn online() -> Self {
        Self::with_capabilities([NetworkCapability::Internet])
    }

    /// An active network with the given capabilities.
    #[must_use]
    pub fn with_capabilities(capabilities: impl IntoIterator<Item = NetworkCapability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// Returns `true` if the network has `capability`.
    #[inline]
    #[must_use]
    pub fn has(&self, capability: NetworkCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Returns `true` if the network can carry internet traffic.
    #[inline]
    #[must_use]
    pub fn is_internet_capable(&self) -> bool {
        self.has(NetworkCapability::Internet)
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.capabilities.iter()).finish()
    }
}

// ============================================================================
// NetworkObserver
// ============================================================================

/// Callback receiving the active network, `None` when there is none.
pub type NetworkCallback = Arc<dyn Fn(Option<NetworkStatus>) + Send + Sync>;

/// Source of connectivity changes.
///
/// Implementations may call the callback from any thread.
pub trait NetworkObserver: Send + Sync {
    /// Starts reporting changes to `on_change`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`](crate::Error::PermissionDenied)
    /// if connectivity cannot be observed.
    fn start(&self, on_change: NetworkCallback) -> Result<()>;

    /// Stops reporting. Safe to call when not started.
    fn stop(&self);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internet_capability() {
        assert!(NetworkStatus::online().is_internet_capable());
        assert!(!NetworkStatus::default().is_internet_capable());

        let wifi = NetworkStatus::with_capabilities([NetworkCapability::Wifi]);
        assert!(wifi.has(NetworkCapability::Wifi));
        assert!(!wifi.is_internet_capable());
    }

    #[test]
    fn test_status_serde() {
        let status = NetworkStatus::with_capabilities([
            NetworkCapability::Internet,
            NetworkCapability::NotMetered,
        ]);
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"capabilities":["internet","not_metered"]}"#);
        assert_eq!(serde_json::from_str::<NetworkStatus>(&json).unwrap(), status);
    }
}
