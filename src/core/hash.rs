//! State Hashing
//!
//! Deterministic SHA-256 digests of grid state, used to detect
//! corrupted or mismatched recovery snapshots.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for game state.
///
/// Order of updates is significant.
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

    /// Create hasher for grid snapshots.
    pub fn for_grid() -> Self {
        Self::new(b"NEON_GRID_STATE_V1")
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with an optional string, distinguishing `None` from `""`.
    pub fn update_opt_str(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.update_u8(1);
                self.update_u32(s.len() as u32);
                self.hasher.update(s.as_bytes());
            }
            None => self.update_u8(0),
        }
    }

    /// Update with a UUID (16 bytes).
    #[inline]
    pub fn update_uuid(&mut self, uuid: &[u8; 16]) {
        self.hasher.update(uuid);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_hasher_determinism() {
        let make_hash = || {
            let mut hasher = StateHasher::for_grid();
            hasher.update_u32(100);
            hasher.update_u64(12345);
            hasher.update_bool(true);
            hasher.update_opt_str(Some("#ff00ff"));
            hasher.finalize()
        };

        assert_eq!(make_hash(), make_hash());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(1);
            h.update_u32(2);
            h.finalize()
        };

        let hash2 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(2);
            h.update_u32(1);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_none_differs_from_empty() {
        let none = {
            let mut h = StateHasher::for_grid();
            h.update_opt_str(None);
            h.finalize()
        };
        let empty = {
            let mut h = StateHasher::for_grid();
            h.update_opt_str(Some(""));
            h.finalize()
        };
        assert_ne!(none, empty);
    }

    #[test]
    fn test_domain_separation() {
        let a = {
            let mut h = StateHasher::new(b"DOMAIN_A");
            h.update_u32(7);
            h.finalize()
        };
        let b = {
            let mut h = StateHasher::new(b"DOMAIN_B");
            h.update_u32(7);
            h.finalize()
        };
        assert_ne!(a, b);
    }
}
