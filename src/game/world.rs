//! Reference Simulation World
//!
//! A small, deterministic two-player simulation that implements every
//! collaborator trait the network layer consumes. The demo binary and
//! the session tests drive two of these against each other.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::core::rng::{DeterministicRng, SeedBundle};
use crate::core::vec2::Vec2;
use crate::game::entity::{Entity, EntityState, Controller};
use crate::game::input::{InputSample, LocalInputs};
use crate::network::host::{DispatchError, EntityFactory, ObjectRegistry, SimulationHost};
use crate::network::protocol::{EventArgs, GameEvent, Notification, RawCoords, RemoteOrder, SpawnParams};

/// Object types the factory can build.
pub const DEFAULT_OBJECT_TYPES: [&str; 4] = ["ship", "missile", "asteroid", "drone"];

/// Simulation state for one peer.
#[derive(Debug, Clone)]
pub struct SimWorld {
    tick: u64,
    running: bool,
    entities: BTreeMap<String, Entity>,
    object_types: BTreeSet<String>,
    rng: DeterministicRng,
    streams: Vec<DeterministicRng>,
    seeds: Option<SeedBundle>,
    inputs: LocalInputs,
    next_spawn: u64,
    /// Orders received from the peer, in application order.
    pub orders: Vec<RemoteOrder>,
    /// Events applied, in application order.
    pub events: Vec<GameEvent>,
    /// Notifications shown.
    pub notifications: Vec<Notification>,
    /// Chat lines shown.
    pub chat_log: Vec<String>,
    /// Times the connection was reported lost.
    pub connection_losses: u32,
}

impl SimWorld {
    /// Empty world; `input_capacity` sizes the per-player delay rings.
    pub fn new(input_capacity: usize) -> Self {
        Self {
            tick: 0,
            running: false,
            entities: BTreeMap::new(),
            object_types: DEFAULT_OBJECT_TYPES.iter().map(|s| s.to_string()).collect(),
            rng: DeterministicRng::default(),
            streams: Vec::new(),
            seeds: None,
            inputs: LocalInputs::new(input_capacity),
            next_spawn: 0,
            orders: Vec::new(),
            events: Vec::new(),
            notifications: Vec::new(),
            chat_log: Vec::new(),
            connection_losses: 0,
        }
    }

    /// Add or replace an entity.
    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Entity by id.
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Mutable entity by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    /// Remove an entity.
    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        self.entities.remove(id)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Current tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Whether the simulation has been started.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Seeds installed, if any.
    pub fn seeds(&self) -> Option<&SeedBundle> {
        self.seeds.as_ref()
    }

    /// Main simulation RNG.
    pub fn rng_mut(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    /// RNG for one independent stream.
    pub fn stream_mut(&mut self, index: usize) -> Option<&mut DeterministicRng> {
        self.streams.get_mut(index)
    }

    /// Record this tick's raw pointer sample for a local player.
    pub fn record_input(&mut self, player_id: &str, sample: InputSample) {
        self.inputs.record(player_id, sample);
    }

    /// Move a local player's entity to its delayed pointer sample.
    ///
    /// `frame_lag` is `None` without a network session (no delay).
    /// Returns the sample applied, which is also the one to transmit.
    pub fn apply_local_input(&mut self, player_id: &str, frame_lag: Option<u64>) -> Option<InputSample> {
        let sample = self.inputs.select(player_id, frame_lag)?;
        let entity = self.entities.get_mut(player_id)?;
        let target = Vec2::new(sample.x, sample.y);
        entity.state.velocity = target - entity.state.position;
        entity.state.position = target;
        Some(sample)
    }

    /// Advance one tick: update every CPU entity. No-op until started.
    pub fn advance(&mut self) {
        if !self.running {
            return;
        }
        self.tick += 1;
        for entity in self.entities.values_mut() {
            if entity.controller == Controller::Cpu {
                entity.update();
            }
        }
    }

    fn entity_for(&mut self, role: &'static str, id: &str) -> Result<&mut Entity, DispatchError> {
        self.entities
            .get_mut(id)
            .ok_or_else(|| DispatchError::dangling(role, id))
    }
}

impl ObjectRegistry for SimWorld {
    fn resolve(&self, id: &str) -> Option<EntityState> {
        self.entities.get(id).map(|e| e.state)
    }
}

impl EntityFactory for SimWorld {
    fn create(
        &mut self,
        object_type: &str,
        state: EntityState,
        params: &SpawnParams,
    ) -> Result<String, DispatchError> {
        if !self.object_types.contains(object_type) {
            return Err(DispatchError::UnknownObjectType(object_type.to_string()));
        }

        let id = match &params.id {
            Some(id) if self.entities.contains_key(id) => {
                return Err(DispatchError::Rejected(format!("{} already exists", id)));
            }
            Some(id) => id.clone(),
            None => {
                self.next_spawn += 1;
                format!("{}-r{}", object_type, self.next_spawn)
            }
        };

        let mut entity = Entity::new(id.clone(), object_type, state, Controller::Cpu);
        entity.visible = false;
        entity.parent = params.parent.clone();
        entity.target = params.target.clone();
        self.insert(entity);
        Ok(id)
    }

    fn step(&mut self, id: &str) -> Result<(), DispatchError> {
        self.entity_for("spawned", id)?.update();
        Ok(())
    }

    fn reveal(&mut self, id: &str) -> Result<(), DispatchError> {
        self.entity_for("spawned", id)?.visible = true;
        Ok(())
    }
}

impl SimulationHost for SimWorld {
    fn local_tick(&self) -> u64 {
        self.tick
    }

    fn install_seeds(&mut self, seeds: &SeedBundle) {
        self.rng = seeds.main_rng();
        self.streams = seeds.stream_rngs();
        self.seeds = Some(seeds.clone());
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn connection_lost(&mut self) {
        self.connection_losses += 1;
    }

    fn apply_coords(&mut self, coords: &RawCoords) -> Result<(), DispatchError> {
        let entity = self.entity_for("coords", &coords.id)?;
        if let (Some(x), Some(y)) = (coords.x, coords.y) {
            entity.state.position = Vec2::new(x, y);
        }
        if let (Some(vx), Some(vy)) = (coords.v_x, coords.v_y) {
            entity.state.velocity = Vec2::new(vx, vy);
        }
        Ok(())
    }

    fn apply_order(&mut self, order: &RemoteOrder) -> Result<(), DispatchError> {
        self.entity_for("order target", &order.id)?;
        self.orders.push(order.clone());
        Ok(())
    }

    fn apply_event(&mut self, event: &GameEvent) -> Result<(), DispatchError> {
        let entity = self.entity_for("event target", &event.id)?;
        match (event.method.as_str(), &event.args) {
            ("damage", EventArgs::Scalar(amount)) => {
                let amount = amount
                    .as_f64()
                    .ok_or_else(|| DispatchError::Rejected("damage needs a number".to_string()))?;
                entity.health -= amount;
            }
            ("destroy", _) => {
                self.entities.remove(&event.id);
            }
            (method, _) => debug!("Event {} on {} recorded only", method, event.id),
        }
        self.events.push(event.clone());
        Ok(())
    }

    fn notify(&mut self, notification: &Notification) {
        self.notifications.push(notification.clone());
    }

    fn chat(&mut self, text: &str) {
        self.chat_log.push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::Scalar;

    fn world() -> SimWorld {
        let mut world = SimWorld::new(8);
        world.insert(Entity::new("p1", "ship", EntityState::default(), Controller::Local));
        world.insert(Entity::new(
            "drone-1",
            "drone",
            EntityState::new(Vec2::ZERO, Vec2::new(1.0, 0.0)),
            Controller::Cpu,
        ));
        world
    }

    #[test]
    fn test_step_requires_start() {
        let mut world = world();
        world.advance();
        assert_eq!(world.tick(), 0);

        world.start();
        world.advance();
        world.advance();
        assert_eq!(world.tick(), 2);
        assert_eq!(world.get("drone-1").unwrap().state.position, Vec2::new(2.0, 0.0));
    }

    #[test]
    fn test_seeds_drive_rng() {
        let seeds = SeedBundle::derive(42, 2);
        let mut a = world();
        let mut b = world();
        a.install_seeds(&seeds);
        b.install_seeds(&seeds);

        for _ in 0..20 {
            assert_eq!(a.rng_mut().next_u64(), b.rng_mut().next_u64());
        }
        assert_eq!(
            a.stream_mut(1).unwrap().next_u64(),
            b.stream_mut(1).unwrap().next_u64()
        );
        assert!(a.stream_mut(2).is_none());
    }

    #[test]
    fn test_apply_local_input_with_delay() {
        let mut world = world();
        for i in 0..5 {
            world.record_input("p1", InputSample::new(i as f64, 0.0));
        }

        let applied = world.apply_local_input("p1", Some(2)).unwrap();
        assert_eq!(applied.x, 2.0);
        assert_eq!(world.get("p1").unwrap().state.position, Vec2::new(2.0, 0.0));

        let undelayed = world.apply_local_input("p1", None).unwrap();
        assert_eq!(undelayed.x, 4.0);
    }

    #[test]
    fn test_event_on_missing_entity() {
        let mut world = world();
        let event = GameEvent::new("ghost", "damage", EventArgs::Scalar(Scalar::Number(5.0)));
        assert_eq!(
            world.apply_event(&event),
            Err(DispatchError::dangling("event target", "ghost"))
        );
        assert!(world.events.is_empty());
    }

    #[test]
    fn test_damage_and_destroy() {
        let mut world = world();
        world
            .apply_event(&GameEvent::new("drone-1", "damage", EventArgs::Scalar(Scalar::Number(30.0))))
            .unwrap();
        assert_eq!(world.get("drone-1").unwrap().health, 70.0);

        world
            .apply_event(&GameEvent::new("drone-1", "destroy", EventArgs::Unit))
            .unwrap();
        assert!(world.get("drone-1").is_none());
        assert_eq!(world.events.len(), 2);
    }

    #[test]
    fn test_factory_rejects_unknown_type() {
        let mut world = world();
        let result = world.create("dragon", EntityState::default(), &SpawnParams::default());
        assert_eq!(result, Err(DispatchError::UnknownObjectType("dragon".to_string())));
    }

    #[test]
    fn test_create_rejects_live_id() {
        let mut world = world();
        world.get_mut("drone-1").unwrap().state.position = Vec2::new(9.0, 9.0);
        let params = SpawnParams {
            id: Some("drone-1".to_string()),
            ..Default::default()
        };

        let result = world.create("drone", EntityState::default(), &params);
        assert!(matches!(result, Err(DispatchError::Rejected(_))));
        assert_eq!(world.get("drone-1").unwrap().state.position, Vec2::new(9.0, 9.0));
    }

    #[test]
    fn test_created_entities_start_hidden() {
        let mut world = world();
        let id = world
            .create("missile", EntityState::default(), &SpawnParams::default())
            .unwrap();
        assert_eq!(id, "missile-r1");
        assert!(!world.get(&id).unwrap().visible);

        world.reveal(&id).unwrap();
        assert!(world.get(&id).unwrap().visible);
    }
}
