//! Connection management.
//!
//! The registry owns keyed connections and keeps them alive: a reconnect
//! cycle per connection, a network monitor that restarts cycles when
//! connectivity returns, and a coarse guardian watchdog.
//!
//! # Architecture
//!
//! ```text
//! ConnectionRegistry::start()
//!        │
//!        ▼
//! ManagedConnection ──connect──► Transport
//!        ▲                          │ on_close
//!        │                          ▼
//!        │                 ReconnectScheduler::execute(TransportClosed)
//!        │                          │ gated by network + running flag
//!        └────── safe_connect ◄─────┘ every reconnect_interval
//!
//! NetworkMonitor ── became available ──► execute(NetworkAvailable)
//! GuardianWatchdog ── every interval ──► start()
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `registry` | [`ConnectionRegistry`] and the connect path |
//! | `connection` | Per-key record and transport event routing |
//! | `scheduler` | Reconnect cycles |
//! | `guardian` | Periodic watchdog |
//! | `builder` | [`RegistryBuilder`] |

// ============================================================================
// Submodules
// ============================================================================

/// Registry builder.
pub mod builder;

/// Per-key connection record.
pub mod connection;

/// Periodic watchdog.
pub mod guardian;

/// Keyed registry.
pub mod registry;

/// Reconnect cycles.
pub mod scheduler;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::RegistryBuilder;
pub use connection::{ConnectionInfo, ConnectionState};
pub use guardian::DEFAULT_GUARDIAN_INTERVAL;
pub use registry::ConnectionRegistry;
pub use scheduler::{SchedulerState, Trigger};
