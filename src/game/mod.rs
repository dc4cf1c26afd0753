//! Game Side
//!
//! What the network layer needs from a simulation, plus a small
//! reference world that provides it.
//!
//! ## Module Structure
//!
//! - `input`: Per-player input delay rings
//! - `entity`: Entities and spawn-state derivation
//! - `world`: Reference simulation implementing the host traits

pub mod entity;
pub mod input;
pub mod world;

// Re-export key types
pub use entity::{derive_spawn_state, Controller, Entity, EntityState, LaunchSpec};
pub use input::{InputDelayBuffer, InputSample, LocalInputs};
pub use world::SimWorld;
