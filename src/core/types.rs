use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identity of an uploader: the textual form of the peer address observed
/// when the connection was accepted. Immutable for the session lifetime and
/// used as the first path segment of permanent storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublisherId(String);

impl PublisherId {
    /// Capture the publisher identity from the accepted socket address.
    /// Only the IP is recorded; the ephemeral port is not part of identity.
    pub fn from_peer(addr: SocketAddr) -> Self {
        Self(addr.ip().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublisherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
impl From<&str> for PublisherId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque identifier minted per upload (UUIDv4, canonical hyphenated form).
/// Carries no ordering; uniqueness makes every upload's on-disk paths
/// disjoint from every other upload's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioId(Uuid);

impl AudioId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for AudioId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AudioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_id_strips_port() {
        let addr: SocketAddr = "192.168.1.10:54321".parse().unwrap();
        assert_eq!(PublisherId::from_peer(addr).as_str(), "192.168.1.10");
    }

    #[test]
    fn publisher_id_v6() {
        let addr: SocketAddr = "[::1]:443".parse().unwrap();
        assert_eq!(PublisherId::from_peer(addr).as_str(), "::1");
    }

    #[test]
    fn audio_ids_are_distinct() {
        assert_ne!(AudioId::new(), AudioId::new());
    }

    #[test]
    fn audio_id_is_canonical_hyphenated() {
        let id = AudioId::new().to_string();
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
    }
}
