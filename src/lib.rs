//! # Peer Lockstep
//!
//! Network synchronization for a two-player real-time game in which each
//! peer runs the full simulation and only inputs, orders and spawns cross
//! the wire.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PEER LOCKSTEP                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG and seed bundles │
//! │  ├── vec2.rs     - 2D vector                                 │
//! │  └── clock.rs    - Wall clock (system and manual)            │
//! │                                                              │
//! │  game/           - Simulation side                           │
//! │  ├── input.rs    - Input delay rings                         │
//! │  ├── entity.rs   - Entities, spawn state                     │
//! │  └── world.rs    - Reference simulation                      │
//! │                                                              │
//! │  network/        - Synchronization (non-deterministic)       │
//! │  ├── protocol.rs - Envelope and message kinds                │
//! │  ├── rtt.rs      - Round-trip window, frame lag              │
//! │  ├── handshake.rs- Clock-sync handshake                      │
//! │  ├── queue.rs    - Tick-gated receive queue                  │
//! │  ├── reconcile.rs- Spawn fast-forward                        │
//! │  ├── host.rs     - Simulation-facing traits                  │
//! │  ├── transport.rs- Channel abstraction                       │
//! │  └── session.rs  - Peer session                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timeline Model
//!
//! A message stamped with tick `t` is applied once the local tick plus
//! the frame lag reaches `t`. Local input is delayed by the same frame
//! lag, so both peers apply it at the same tick. Spawns that arrive late
//! are stepped forward to catch up.
//!
//! Handshake, ping and pong bypass the queue.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::rng::{DeterministicRng, SeedBundle};
pub use crate::core::vec2::Vec2;
pub use crate::game::world::SimWorld;
pub use crate::network::config::SessionConfig;
pub use crate::network::handshake::Role;
pub use crate::network::host::SimulationHost;
pub use crate::network::protocol::{Envelope, Message};
pub use crate::network::session::{PeerSession, SessionError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Length of one tick (ms)
pub const TICK_DURATION_MS: f64 = 1000.0 / TICK_RATE as f64;
