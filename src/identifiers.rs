//! Type-safe identifiers for connections and peers.
//!
//! Newtype wrappers keep connection keys and server peer IDs from being
//! mixed up at compile time.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// ConnectionKey
// ============================================================================

/// Stable key naming one managed connection.
///
/// Cheap to clone. Defaults to [`ConnectionKey::DEFAULT`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionKey(Arc<str>);

impl ConnectionKey {
    /// Key used when none is configured.
    pub const DEFAULT: &'static str = "default";

    /// Creates a key from any string.
    #[inline]
    #[must_use]
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Returns the key as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is the default key.
    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        &*self.0 == Self::DEFAULT
    }
}

impl Default for ConnectionKey {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionKey({})", self.0)
    }
}

impl From<&str> for ConnectionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ConnectionKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl AsRef<str> for ConnectionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// PeerId
// ============================================================================

/// Global counter for peer IDs.
static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one inbound peer on the embedded server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Allocates the next process-unique peer ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key() {
        let key = ConnectionKey::default();
        assert_eq!(key.as_str(), "default");
        assert!(key.is_default());
        assert!(!ConnectionKey::new("chat").is_default());
    }

    #[test]
    fn test_key_equality_across_constructors() {
        let a = ConnectionKey::from("feed");
        let b = ConnectionKey::from(String::from("feed"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "feed");
    }

    #[test]
    fn test_key_serde_transparent() {
        let key: ConnectionKey = serde_json::from_str("\"quotes\"").expect("deserialize");
        assert_eq!(key, ConnectionKey::new("quotes"));
        assert_eq!(serde_json::to_string(&key).expect("serialize"), "\"quotes\"");
    }

    #[test]
    fn test_peer_ids_are_unique() {
        let a = PeerId::next();
        let b = PeerId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }
}
