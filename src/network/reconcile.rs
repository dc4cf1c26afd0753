//! Fast-Forward Reconciliation
//!
//! A remote `AddObject` describes an entity the peer created one transit
//! delay ago. Spawning it as sent would place it where it *was*; instead
//! the receiver re-derives its initial state from the parent's current
//! live state and steps it forward through the ticks it missed before
//! making it visible.

use tracing::debug;

use crate::core::vec2::Vec2;
use crate::game::entity::{derive_spawn_state, EntityState, LaunchSpec};
use crate::network::host::{DispatchError, EntityFactory, ObjectRegistry};
use crate::network::protocol::{AddObject, SpawnParams};

/// Ticks to fast-forward: `clamp(local_tick - sent_tick, 0, frame_lag)`.
pub fn fast_forward_ticks(local_tick: u64, sent_tick: u64, frame_lag: u64) -> u64 {
    local_tick.saturating_sub(sent_tick).min(frame_lag)
}

/// Launch parameters carried by the spawn params.
pub fn launch_spec(params: &SpawnParams) -> LaunchSpec {
    LaunchSpec {
        offset: Vec2::new(params.offset_x.unwrap_or(0.0), params.offset_y.unwrap_or(0.0)),
        impulse: Vec2::new(params.v_x.unwrap_or(0.0), params.v_y.unwrap_or(0.0)),
        speed: params.speed,
    }
}

/// Initial state for an object without a parent: exactly as declared.
pub fn declared_state(params: &SpawnParams) -> EntityState {
    EntityState::new(
        Vec2::new(params.x.unwrap_or(0.0), params.y.unwrap_or(0.0)),
        Vec2::new(params.v_x.unwrap_or(0.0), params.v_y.unwrap_or(0.0)),
    )
}

/// Resolve the initial state of a remotely spawned object.
///
/// Fails with [`DispatchError::DanglingReference`] when `parent` or
/// `target` names an object that no longer exists here (it may already
/// have died locally through simulation skew).
pub fn resolve_spawn_state<R>(registry: &R, params: &SpawnParams) -> Result<EntityState, DispatchError>
where
    R: ObjectRegistry + ?Sized,
{
    let target = match params.target.as_deref() {
        Some(id) => Some(
            registry
                .resolve(id)
                .ok_or_else(|| DispatchError::dangling("target", id))?,
        ),
        None => None,
    };

    match params.parent.as_deref() {
        Some(id) => {
            let parent = registry
                .resolve(id)
                .ok_or_else(|| DispatchError::dangling("parent", id))?;
            Ok(derive_spawn_state(&parent, target.as_ref(), &launch_spec(params)))
        }
        None => Ok(declared_state(params)),
    }
}

/// Create a remote object and fast-forward it to the local timeline.
///
/// Returns the new entity's id and the number of ticks it was stepped.
pub fn spawn_remote<W>(
    world: &mut W,
    add: &AddObject,
    sent_tick: u64,
    local_tick: u64,
    frame_lag: u64,
) -> Result<(String, u64), DispatchError>
where
    W: ObjectRegistry + EntityFactory + ?Sized,
{
    let state = resolve_spawn_state(&*world, &add.params)?;
    let id = world.create(&add.object_type, state, &add.params)?;

    let lag = fast_forward_ticks(local_tick, sent_tick, frame_lag);
    for _ in 0..lag {
        world.step(&id)?;
    }
    world.reveal(&id)?;

    debug!(
        "Spawned remote {} {} (sent tick {}, local tick {}, fast-forward {})",
        add.object_type, id, sent_tick, local_tick, lag
    );

    Ok((id, lag))
}
