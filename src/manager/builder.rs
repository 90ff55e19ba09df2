//! Builder for [`ConnectionRegistry`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ws_keeper::{ConnectionRegistry, ManualNetworkObserver};
//!
//! # async fn example() -> ws_keeper::Result<()> {
//! let observer = Arc::new(ManualNetworkObserver::default());
//! let registry = ConnectionRegistry::builder()
//!     .network_observer(observer)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::error::{Error, Result};
use crate::network::NetworkObserver;
use crate::transport::{TransportFactory, WsTransportFactory};

use super::registry::ConnectionRegistry;

// ============================================================================
// RegistryBuilder
// ============================================================================

/// Builder for a [`ConnectionRegistry`] with injected collaborators.
///
/// Use [`ConnectionRegistry::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct RegistryBuilder {
    /// Transport factory, `tokio-tungstenite` when unset.
    factory: Option<Arc<dyn TransportFactory>>,
    /// Connectivity source, none when unset.
    observer: Option<Arc<dyn NetworkObserver>>,
    /// Runtime for background work, the current one when unset.
    runtime: Option<Handle>,
}

// ============================================================================
// RegistryBuilder Implementation
// ============================================================================

impl RegistryBuilder {
    /// Creates a builder with defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transport factory.
    ///
    /// # Arguments
    ///
    /// * `factory` - Builds one transport per connect attempt
    #[inline]
    #[must_use]
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Sets the connectivity source.
    ///
    /// Without one the network is always considered available and only the
    /// reconnect cycles and the guardian drive recovery.
    ///
    /// # Arguments
    ///
    /// * `observer` - Reports network changes
    #[inline]
    #[must_use]
    pub fn network_observer(mut self, observer: Arc<dyn NetworkObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Sets the runtime used for background tasks.
    ///
    /// # Arguments
    ///
    /// * `runtime` - Handle to a multi-threaded or current-thread runtime
    #[inline]
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no runtime was given and none is current.
    pub fn build(self) -> Result<ConnectionRegistry> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                Error::config(
                    "ConnectionRegistry needs a tokio runtime.\n\
                     Build it inside one or pass .runtime(handle)",
                )
            })?,
        };

        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(WsTransportFactory));

        Ok(ConnectionRegistry::from_parts(factory, self.observer, runtime))
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("custom_factory", &self.factory.is_some())
            .field("observer", &self.observer.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
