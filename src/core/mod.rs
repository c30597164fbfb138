//! Core primitives.
//!
//! Deterministic randomness, state hashing and time helpers shared by the
//! game and network layers.

pub mod rng;
pub mod hash;
pub mod time;

// Re-export core types
pub use rng::DeterministicRng;
pub use hash::{StateHash, StateHasher};
pub use time::{Millis, now_ms};
