//! Snapshot Hashing
//!
//! Deterministic SHA-256 digests over canonical snapshot bytes.
//! The host seals every full-state snapshot with a digest and clients
//! refuse to install a snapshot whose digest does not match its content.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Domain separator for full-state snapshots.
pub const SNAPSHOT_DOMAIN: &[u8] = b"BOARDLINK_SNAPSHOT_V1";

/// Deterministic hasher with a domain separator.
///
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for snapshots.
    pub fn for_snapshot() -> Self {
        Self::new(SNAPSHOT_DOMAIN)
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Digest of canonical snapshot bytes at a given state version, hex encoded.
pub fn snapshot_digest(state_version: u64, canonical: &[u8]) -> String {
    let mut hasher = StateHasher::for_snapshot();
    hasher.update_u64(state_version);
    hasher.update_bytes(canonical);
    hex::encode(hasher.finalize())
}

/// Short hex prefix of a digest for log lines.
pub fn short_digest(digest: &str) -> &str {
    digest.get(..8).unwrap_or(digest)
}

// =============================================================================
// TESTS
// =============================================================================
