//! Simulation Collaborators
//!
//! The network layer never touches the simulation directly. It goes
//! through these traits: a registry to resolve ids, a factory to create
//! and step entities, and a host receiving the per-kind message effects.

use crate::core::rng::SeedBundle;
use crate::game::entity::EntityState;
use crate::network::protocol::{GameEvent, Notification, RawCoords, RemoteOrder, SpawnParams};

/// Lookup of live objects by id.
pub trait ObjectRegistry {
    /// Current kinematic state of a live object.
    fn resolve(&self, id: &str) -> Option<EntityState>;
}

/// Creation and stepping of entities.
pub trait EntityFactory {
    /// Create an entity hidden from rendering and collision; returns its id.
    fn create(
        &mut self,
        object_type: &str,
        state: EntityState,
        params: &SpawnParams,
    ) -> Result<String, DispatchError>;

    /// Run the ordinary per-tick update on one entity.
    fn step(&mut self, id: &str) -> Result<(), DispatchError>;

    /// Make a created entity visible and collidable.
    fn reveal(&mut self, id: &str) -> Result<(), DispatchError>;
}

/// Everything the session needs from the running simulation.
pub trait SimulationHost: ObjectRegistry + EntityFactory {
    /// Local simulation tick.
    fn local_tick(&self) -> u64;

    /// Install the seeds received in a `Syn`.
    fn install_seeds(&mut self, seeds: &SeedBundle);

    /// Start the simulation.
    fn start(&mut self);

    /// The transport closed or the handshake failed.
    fn connection_lost(&mut self);

    /// Apply remote coordinates.
    fn apply_coords(&mut self, coords: &RawCoords) -> Result<(), DispatchError>;

    /// Apply a remote order.
    fn apply_order(&mut self, order: &RemoteOrder) -> Result<(), DispatchError>;

    /// Apply a method call on an entity.
    fn apply_event(&mut self, event: &GameEvent) -> Result<(), DispatchError>;

    /// Show a notification. Fire and forget.
    fn notify(&mut self, notification: &Notification);

    /// Show a chat line. Fire and forget.
    fn chat(&mut self, text: &str);
}

/// Failure to apply one message. The message is dropped, the session
/// carries on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// An id named by the message has no live object.
    #[error("Dangling {role} reference: {id}")]
    DanglingReference {
        /// Which field held the id (`"parent"`, `"target"`, `"event target"`).
        role: &'static str,
        /// The unresolved id.
        id: String,
    },

    /// The factory does not know the object type.
    #[error("Unknown object type: {0}")]
    UnknownObjectType(String),

    /// The host refused the message.
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl DispatchError {
    /// Shorthand for a dangling reference.
    pub fn dangling(role: &'static str, id: impl Into<String>) -> Self {
        DispatchError::DanglingReference { role, id: id.into() }
    }
}
