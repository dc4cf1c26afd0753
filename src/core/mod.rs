//! Core primitives.
//!
//! Deterministic randomness, vector math and the wall-clock abstraction
//! used for round-trip timing.

pub mod clock;
pub mod rng;
pub mod vec2;

// Re-export core types
pub use clock::{Clock, ManualClock, SystemClock};
pub use rng::{DeterministicRng, SeedBundle};
pub use vec2::Vec2;
