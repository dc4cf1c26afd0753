//! Entities
//!
//! Kinematic state and the ordinary per-tick update shared by live
//! stepping and fast-forward reconciliation. Both paths go through
//! [`EntityState::step`], so a fast-forwarded entity ends up exactly
//! where a locally spawned one would after the same number of ticks.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;

/// Who drives an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Controller {
    /// Driven by the local player's input.
    Local,
    /// Driven by messages from the remote peer.
    Remote,
    /// Driven by the simulation itself (AI, projectiles).
    Cpu,
}

/// Position and velocity, in world units and world units per tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Position.
    pub position: Vec2,
    /// Velocity per tick.
    pub velocity: Vec2,
}

impl EntityState {
    /// Create a state.
    pub const fn new(position: Vec2, velocity: Vec2) -> Self {
        Self { position, velocity }
    }

    /// Advance one simulation tick.
    #[inline]
    pub fn step(&mut self) {
        self.position = self.position + self.velocity;
    }
}

/// A simulated object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Id shared by both peers.
    pub id: String,
    /// Object type name as used by the factory (`"ship"`, `"missile"`).
    pub kind: String,
    /// Kinematic state.
    pub state: EntityState,
    /// Driver.
    pub controller: Controller,
    /// Hit points.
    pub health: f64,
    /// Hidden from rendering and collision until reconciled.
    pub visible: bool,
    /// Id of the entity that created this one.
    pub parent: Option<String>,
    /// Id of the entity this one is homing on.
    pub target: Option<String>,
}

impl Entity {
    /// New visible entity with full health.
    pub fn new(id: impl Into<String>, kind: impl Into<String>, state: EntityState, controller: Controller) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            state,
            controller,
            health: 100.0,
            visible: true,
            parent: None,
            target: None,
        }
    }

    /// Ordinary per-tick update.
    pub fn update(&mut self) {
        self.state.step();
    }
}

/// Launch parameters for a child entity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LaunchSpec {
    /// Offset from the parent's position.
    pub offset: Vec2,
    /// Extra velocity added to the inherited one when there is no target.
    pub impulse: Vec2,
    /// Speed towards the target, if homing.
    pub speed: Option<f64>,
}

/// Initial state of a child spawned by `parent`.
///
/// Uses the parent's *current* state. With a target and a speed the child
/// heads straight at the target's current position; otherwise it inherits
/// the parent's velocity plus the launch impulse.
pub fn derive_spawn_state(
    parent: &EntityState,
    target: Option<&EntityState>,
    launch: &LaunchSpec,
) -> EntityState {
    let position = parent.position + launch.offset;

    let velocity = match (target, launch.speed) {
        (Some(target), Some(speed)) => {
            let heading = (target.position - position).normalize();
            if heading == Vec2::ZERO {
                parent.velocity + launch.impulse
            } else {
                heading * speed
            }
        }
        _ => parent.velocity + launch.impulse,
    };

    EntityState { position, velocity }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_is_linear() {
        let state = EntityState::new(Vec2::new(1.0, 1.0), Vec2::new(2.0, -1.0));
        let mut after = state;
        for _ in 0..3 {
            after.step();
        }
        assert_eq!(after.position, Vec2::new(7.0, -2.0));
        assert_eq!(after.velocity, state.velocity);
    }

    #[test]
    fn test_spawn_inherits_parent_velocity() {
        let parent = EntityState::new(Vec2::new(10.0, 0.0), Vec2::new(1.0, 0.0));
        let launch = LaunchSpec {
            offset: Vec2::new(0.0, 2.0),
            impulse: Vec2::new(0.0, 3.0),
            speed: None,
        };

        let spawned = derive_spawn_state(&parent, None, &launch);
        assert_eq!(spawned.position, Vec2::new(10.0, 2.0));
        assert_eq!(spawned.velocity, Vec2::new(1.0, 3.0));
    }

    #[test]
    fn test_spawn_homes_on_target() {
        let parent = EntityState::new(Vec2::ZERO, Vec2::new(5.0, 5.0));
        let target = EntityState::new(Vec2::new(0.0, 10.0), Vec2::ZERO);
        let launch = LaunchSpec {
            speed: Some(2.0),
            ..Default::default()
        };

        let spawned = derive_spawn_state(&parent, Some(&target), &launch);
        assert_eq!(spawned.velocity, Vec2::new(0.0, 2.0));
    }

    #[test]
    fn test_spawn_on_top_of_target_falls_back() {
        let parent = EntityState::new(Vec2::ZERO, Vec2::new(1.0, 0.0));
        let target = EntityState::new(Vec2::ZERO, Vec2::ZERO);
        let launch = LaunchSpec {
            speed: Some(2.0),
            ..Default::default()
        };

        let spawned = derive_spawn_state(&parent, Some(&target), &launch);
        assert_eq!(spawned.velocity, Vec2::new(1.0, 0.0));
    }
}
