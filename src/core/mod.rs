//! Core deterministic primitives.
//!
//! Dice and shuffles come from a seeded PRNG so a game can be replayed
//! from its seed; snapshot digests let clients verify full-state syncs.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::DeterministicRng;
pub use hash::{snapshot_digest, StateHash};
