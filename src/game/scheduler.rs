//! Fixed-order tick pipeline over one arena's registry and broad-phase grid
//!
//! Each tick runs `PRETICK -> SIMULATE -> COLLIDE -> deferred deletes ->
//! replicate -> POSTTICK` to completion; nothing preempts a phase and only
//! the phase that owns a resource mutates it. Gameplay behavior, collision
//! response and outbound replication are supplied by a [`SimulationHooks`]
//! collaborator; the scheduler guarantees iteration order, skip rules, and
//! that no phase ever observes a half-mutated registry.

use tracing::{debug, info};

use crate::config::SimulationConfig;
use crate::game::entity::{Aabb, EntityId, EntityKind, ViewerConnection};
use crate::game::registry::EntityRegistry;
use crate::game::spatial::HashGrid;

/// Gameplay seam: physics, AI and collision response live behind this trait.
///
/// Implementations may add entities and call [`World::defer_delete`]; direct
/// `Registry::delete` during SIMULATE or COLLIDE is what the deferred queue
/// exists to avoid.
pub trait SimulationHooks {
    /// Behavior/physics for one live, awake, non-child entity
    fn tick_entity(&mut self, world: &mut World, id: EntityId, tick: u32) {
        let _ = (world, id, tick);
    }

    /// Collision response for one broad-phase candidate pair.
    /// The pair is a candidate: the callback owns the exact overlap test.
    fn collide(&mut self, world: &mut World, a: EntityId, b: EntityId) {
        let _ = (world, a, b);
    }

    /// Snapshot point for outbound state. Runs after deferred deletes have
    /// settled but before POSTTICK wipes replication flags, so view
    /// compilers see the tick's full flag set and a populated grid.
    fn replicate(&mut self, world: &World) {
        let _ = world;
    }
}

/// Phase of the pipeline currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    Idle,
    PreTick,
    Simulate,
    Collide,
    Replicate,
    PostTick,
}

/// One isolated arena: registry, broad-phase grid and the tick pipeline.
///
/// Explicitly owned and passed by reference; several worlds can coexist in
/// one process.
pub struct World {
    pub registry: EntityRegistry,
    pub grid: HashGrid,
    config: SimulationConfig,
    tick: u32,
    phase: TickPhase,
    /// The arena fixture resent whenever a viewer's view set is empty
    arena: Option<EntityId>,
    /// Deletions marked during SIMULATE/COLLIDE, applied before POSTTICK
    pending_deletes: Vec<EntityId>,
    /// Reused candidate-pair buffer for the COLLIDE phase
    pair_scratch: Vec<(EntityId, EntityId)>,
    /// Reused viewer interest rect buffer for the wake/sleep passes
    rect_scratch: Vec<Aabb>,
}

impl World {
    pub fn new(config: SimulationConfig) -> Self {
        let grid = HashGrid::new(config.grid_cell_size);
        Self {
            registry: EntityRegistry::new(),
            grid,
            config,
            tick: 0,
            phase: TickPhase::Idle,
            arena: None,
            pending_deletes: Vec::new(),
            pair_scratch: Vec::new(),
            rect_scratch: Vec::new(),
        }
    }

    #[inline]
    pub fn tick(&self) -> u32 {
        self.tick
    }

    #[inline]
    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    #[inline]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Designates the world fixture for empty-view resends
    pub fn set_arena(&mut self, id: EntityId) {
        self.arena = Some(id);
    }

    #[inline]
    pub fn arena(&self) -> Option<EntityId> {
        self.arena
    }

    /// Marks an entity for removal at the end of the current tick.
    /// Safe to call repeatedly for one id within a tick.
    pub fn defer_delete(&mut self, id: EntityId) {
        self.pending_deletes.push(id);
    }

    /// Runs one complete tick
    pub fn run_tick(&mut self, hooks: &mut dyn SimulationHooks) {
        self.pre_tick();
        self.simulate(hooks);
        self.collide(hooks);
        self.apply_deferred_deletes();
        if self.tick % self.config.sleep_check_interval == 0 {
            self.sleep_pass();
        }
        self.phase = TickPhase::Replicate;
        hooks.replicate(self);
        self.post_tick();
    }

    /// PRETICK: advance the tick, retract the high-water mark, rebuild the
    /// grid from live physicals, then wake entities back inside a view.
    ///
    /// The tick number advances here so every later phase, including the
    /// replicate snapshot, observes one stable value.
    pub fn pre_tick(&mut self) {
        self.phase = TickPhase::PreTick;
        self.tick = self.tick.wrapping_add(1);

        self.registry.retract_high_water();
        self.grid.pre_tick();

        for id in 0..self.registry.high_water() {
            if let Some(data) = self
                .registry
                .get(id as EntityId)
                .and_then(|entity| entity.physics())
            {
                self.grid.insert(id as EntityId, &data.aabb());
            }
        }

        self.wake_pass();
    }

    /// SIMULATE: behavior for every live, awake, non-child object entity in
    /// ascending id order, then the camera pass. Entities added mid-phase
    /// with ids below the moving high-water mark tick this same phase.
    pub fn simulate(&mut self, hooks: &mut dyn SimulationHooks) {
        self.phase = TickPhase::Simulate;
        let tick = self.tick;

        let mut id: usize = 0;
        while id < self.registry.high_water() {
            let current = id as EntityId;
            id += 1;

            let Some(entity) = self.registry.get(current) else {
                continue;
            };
            match &entity.kind {
                EntityKind::Physical(data) => {
                    if data.sleeping || data.is_child() {
                        continue;
                    }
                }
                // Cameras tick after every object entity has moved
                EntityKind::Viewer(_) => continue,
                EntityKind::Plain => {}
            }

            hooks.tick_entity(self, current, tick);
        }

        self.tick_viewers();
    }

    /// COLLIDE: dispatch each broad-phase candidate pair once
    pub fn collide(&mut self, hooks: &mut dyn SimulationHooks) {
        self.phase = TickPhase::Collide;

        let mut pairs = std::mem::take(&mut self.pair_scratch);
        pairs.clear();
        self.grid.for_each_collision_pair(|a, b| pairs.push((a, b)));

        for &(a, b) in &pairs {
            // Either side may have died earlier in the phase; a stale id in
            // the grid is treated as absent, never dereferenced
            if self.registry.exists(a) && self.registry.exists(b) {
                hooks.collide(self, a, b);
            }
        }
        self.pair_scratch = pairs;
    }

    /// POSTTICK: flush every live entity's replication snapshot state and
    /// age out the grid epoch
    pub fn post_tick(&mut self) {
        self.phase = TickPhase::PostTick;

        for id in 0..self.registry.high_water() {
            if let Some(entity) = self.registry.get_mut(id as EntityId) {
                entity.state.wipe();
            }
        }
        self.grid.post_tick();
        self.phase = TickPhase::Idle;
    }

    /// Applies all deletions marked during SIMULATE/COLLIDE, cascading
    /// through owned children, so POSTTICK sees a settled registry.
    fn apply_deferred_deletes(&mut self) {
        let mut queue = std::mem::take(&mut self.pending_deletes);
        let mut index = 0;
        while index < queue.len() {
            let id = queue[index];
            index += 1;

            // Duplicate marks and already-freed slots are this queue's own
            // bookkeeping, not caller misuse; skip them quietly
            if !self.registry.exists(id) {
                continue;
            }

            if let Some(children) = self
                .registry
                .get(id)
                .and_then(|entity| entity.physics())
                .map(|data| data.children.clone())
            {
                queue.extend(children);
            }

            let _ = self.registry.delete(id);
        }
        queue.clear();
        self.pending_deletes = queue;
    }

    /// Collects each connected-or-waiting viewer's interest rectangle
    fn collect_viewer_rects(&mut self) {
        let config = &self.config;
        let registry = &self.registry;
        self.rect_scratch.clear();
        self.rect_scratch.extend(
            registry
                .cameras()
                .iter()
                .filter_map(|&id| registry.get(id))
                .filter_map(|entity| entity.camera())
                .map(|camera| camera.interest_aabb(config)),
        );
    }

    /// Wakes any sleeping physical back inside a viewer's interest rect.
    /// Runs in PRETICK so a woken entity simulates the same tick it
    /// re-entered view.
    fn wake_pass(&mut self) {
        self.collect_viewer_rects();
        let rects = std::mem::take(&mut self.rect_scratch);

        for rect in &rects {
            let candidates = self.grid.retrieve(rect);
            for id in candidates.iter_ones() {
                if let Some(data) = self
                    .registry
                    .get_mut(id as EntityId)
                    .and_then(|entity| entity.physics_mut())
                {
                    if data.sleeping && data.aabb().overlaps(rect) {
                        data.sleeping = false;
                    }
                }
            }
        }
        self.rect_scratch = rects;
    }

    /// Low-frequency pass putting unseen physicals to sleep to bound CPU
    /// cost under high population
    fn sleep_pass(&mut self) {
        self.collect_viewer_rects();
        let rects = std::mem::take(&mut self.rect_scratch);
        let mut slept = 0usize;

        for id in 0..self.registry.high_water() {
            if let Some(data) = self
                .registry
                .get_mut(id as EntityId)
                .and_then(|entity| entity.physics_mut())
            {
                if !data.can_sleep
                    || data.always_active
                    || data.deletion_animation
                    || data.is_child()
                {
                    continue;
                }
                let aabb = data.aabb();
                let visible = rects.iter().any(|rect| aabb.overlaps(rect));
                if !visible && !data.sleeping {
                    slept += 1;
                }
                data.sleeping = !visible;
            }
        }

        if slept > 0 {
            debug!(tick = self.tick, slept, "hibernation pass");
        }
        self.rect_scratch = rects;
    }

    /// Camera pass: follow the controlled entity's root parent and count
    /// down reconnection grace windows. The only timeout-driven transition
    /// in the core; expiry tears down one viewer deterministically.
    fn tick_viewers(&mut self) {
        let grace = self.config.reconnect_grace_ticks();
        let camera_ids: Vec<EntityId> = self.registry.cameras().to_vec();

        for id in camera_ids {
            let player = self
                .registry
                .get(id)
                .and_then(|entity| entity.camera())
                .and_then(|camera| camera.player);
            let player_alive = player.is_some_and(|pid| self.registry.exists(pid));
            let focus = if player_alive {
                let root = self.registry.root_ancestor(player.unwrap_or(id));
                self.registry
                    .get(root)
                    .and_then(|entity| entity.physics())
                    .map(|data| data.position)
            } else {
                None
            };

            let mut expired = false;
            if let Some(camera) = self.registry.get_mut(id).and_then(|e| e.camera_mut()) {
                match focus {
                    Some(position) if !camera.free_look => camera.position = position,
                    _ => {}
                }
                // A camera whose player is gone drives its own coordinates
                if player.is_some() && !player_alive {
                    camera.free_look = true;
                }

                if let ViewerConnection::AwaitingReconnect { ticks_waiting } =
                    &mut camera.connection
                {
                    *ticks_waiting += 1;
                    if *ticks_waiting > grace {
                        camera.reconnection_key = None;
                        expired = true;
                    }
                }
            }

            if expired {
                debug!(camera = id, "reconnection grace expired, tearing down viewer");
                self.defer_delete(id);
            }
        }
    }

    /// Whole-arena reset: the grid's post-tick pass runs first so it holds
    /// no stale references across the wipe
    pub fn clear(&mut self) {
        info!(tick = self.tick, "clearing arena");
        self.grid.post_tick();
        self.registry.clear();
        self.pending_deletes.clear();
        self.arena = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{CameraData, Entity, PhysicalData};
    use crate::util::vec2::Vec2;

    fn test_world() -> World {
        World::new(SimulationConfig::default())
    }

    fn physical_at(x: f32, y: f32) -> Entity {
        Entity::physical(PhysicalData::new(Vec2::new(x, y), 10.0, 5))
    }

    /// Records which entities ticked, in order
    #[derive(Default)]
    struct RecordingHooks {
        ticked: Vec<EntityId>,
        collided: Vec<(EntityId, EntityId)>,
    }

    impl SimulationHooks for RecordingHooks {
        fn tick_entity(&mut self, _world: &mut World, id: EntityId, _tick: u32) {
            self.ticked.push(id);
        }

        fn collide(&mut self, _world: &mut World, a: EntityId, b: EntityId) {
            self.collided.push((a, b));
        }
    }

    #[test]
    fn test_simulate_ascending_order_skipping_holes() {
        let mut world = test_world();
        let ids: Vec<_> = (0..6)
            .map(|i| world.registry.add(physical_at(i as f32 * 30.0, 0.0)).unwrap())
            .collect();
        world.registry.delete(ids[2]).unwrap();

        let mut hooks = RecordingHooks::default();
        world.run_tick(&mut hooks);

        assert_eq!(hooks.ticked, vec![0, 1, 3, 4, 5]);
    }

    #[test]
    fn test_simulate_skips_sleeping_and_children() {
        let mut world = test_world();
        let parent = world.registry.add(physical_at(0.0, 0.0)).unwrap();

        let mut child_data = PhysicalData::new(Vec2::ZERO, 5.0, 3);
        child_data.parent = Some(parent);
        let child = world.registry.add(Entity::physical(child_data)).unwrap();
        world
            .registry
            .get_mut(parent)
            .unwrap()
            .physics_mut()
            .unwrap()
            .children
            .push(child);

        let mut sleeper_data = PhysicalData::new(Vec2::new(500.0, 0.0), 10.0, 5);
        sleeper_data.sleeping = true;
        // No viewers exist, so nothing wakes it
        let sleeper = world.registry.add(Entity::physical(sleeper_data)).unwrap();

        let mut hooks = RecordingHooks::default();
        world.run_tick(&mut hooks);

        assert!(hooks.ticked.contains(&parent));
        assert!(!hooks.ticked.contains(&child), "children tick via their parent");
        assert!(!hooks.ticked.contains(&sleeper));
    }

    #[test]
    fn test_collide_dispatches_candidate_pairs() {
        let mut world = test_world();
        let a = world.registry.add(physical_at(0.0, 0.0)).unwrap();
        let b = world.registry.add(physical_at(5.0, 0.0)).unwrap();
        let _far = world.registry.add(physical_at(5000.0, 5000.0)).unwrap();

        let mut hooks = RecordingHooks::default();
        world.run_tick(&mut hooks);

        assert!(hooks.collided.contains(&(a, b)));
        assert!(hooks.collided.iter().all(|&(x, y)| x != y));
    }

    #[test]
    fn test_collide_skips_pairs_with_a_freed_member() {
        let mut world = test_world();
        // Three overlapping bodies sharing the same cells: candidate order
        // is (0,1), (0,2), (1,2)
        let a = world.registry.add(physical_at(0.0, 0.0)).unwrap();
        let b = world.registry.add(physical_at(5.0, 0.0)).unwrap();
        let c = world.registry.add(physical_at(10.0, 0.0)).unwrap();

        struct KillingHooks {
            victim: EntityId,
            dispatched: Vec<(EntityId, EntityId)>,
        }
        impl SimulationHooks for KillingHooks {
            fn collide(&mut self, world: &mut World, a: EntityId, b: EntityId) {
                self.dispatched.push((a, b));
                if b == self.victim {
                    // Freed immediately, while the grid still holds its bit
                    world.registry.delete(b).unwrap();
                }
            }
        }

        let mut hooks = KillingHooks {
            victim: b,
            dispatched: Vec::new(),
        };
        world.run_tick(&mut hooks);

        assert_eq!(
            hooks.dispatched,
            vec![(a, b), (a, c)],
            "pairs naming the freed id must not dispatch"
        );
        assert!(!world.registry.exists(b));
    }

    #[test]
    fn test_replicate_runs_before_flag_wipe() {
        use crate::game::entity::StateFlags;

        struct SnapshotHooks {
            target: EntityId,
            saw_update_flag: bool,
            saw_grid_occupant: bool,
        }
        impl SimulationHooks for SnapshotHooks {
            fn tick_entity(&mut self, world: &mut World, id: EntityId, _tick: u32) {
                if id == self.target {
                    world
                        .registry
                        .get_mut(id)
                        .unwrap()
                        .state
                        .insert(StateFlags::NEEDS_UPDATE);
                }
            }

            fn replicate(&mut self, world: &World) {
                self.saw_update_flag = world
                    .registry
                    .get(self.target)
                    .is_some_and(|entity| entity.state.contains(StateFlags::NEEDS_UPDATE));
                self.saw_grid_occupant = world.grid.stats().total_markings > 0;
            }
        }

        let mut world = test_world();
        let id = world.registry.add(physical_at(0.0, 0.0)).unwrap();
        let mut hooks = SnapshotHooks {
            target: id,
            saw_update_flag: false,
            saw_grid_occupant: false,
        };
        world.run_tick(&mut hooks);

        assert!(hooks.saw_update_flag, "flags are still set at the snapshot");
        assert!(hooks.saw_grid_occupant, "grid is still populated at the snapshot");
        assert!(
            world.registry.get(id).unwrap().state.is_empty(),
            "POSTTICK still wipes flags afterwards"
        );
    }

    #[test]
    fn test_deferred_delete_applies_before_posttick_and_cascades() {
        let mut world = test_world();
        let parent = world.registry.add(physical_at(0.0, 0.0)).unwrap();
        let mut child_data = PhysicalData::new(Vec2::ZERO, 5.0, 3);
        child_data.parent = Some(parent);
        let child = world.registry.add(Entity::physical(child_data)).unwrap();
        world
            .registry
            .get_mut(parent)
            .unwrap()
            .physics_mut()
            .unwrap()
            .children
            .push(child);

        struct DeletingHooks {
            target: EntityId,
        }
        impl SimulationHooks for DeletingHooks {
            fn tick_entity(&mut self, world: &mut World, id: EntityId, _tick: u32) {
                if id == self.target {
                    // Marked twice: the queue must tolerate duplicates
                    world.defer_delete(id);
                    world.defer_delete(id);
                }
            }
        }

        let mut hooks = DeletingHooks { target: parent };
        world.run_tick(&mut hooks);

        assert!(!world.registry.exists(parent));
        assert!(!world.registry.exists(child), "children die with their parent");
    }

    #[test]
    fn test_posttick_wipes_state_flags() {
        use crate::game::entity::StateFlags;

        let mut world = test_world();
        let id = world.registry.add(physical_at(0.0, 0.0)).unwrap();
        world
            .registry
            .get_mut(id)
            .unwrap()
            .state
            .insert(StateFlags::NEEDS_UPDATE);

        let mut hooks = RecordingHooks::default();
        world.run_tick(&mut hooks);

        assert!(world.registry.get(id).unwrap().state.is_empty());
    }

    #[test]
    fn test_sleep_and_wake_cycle() {
        let mut config = SimulationConfig::default();
        config.sleep_check_interval = 1; // hibernate every tick for the test
        let mut world = World::new(config);

        let camera_id = {
            let mut camera = CameraData::new(0.55);
            camera.position = Vec2::ZERO;
            camera.free_look = true;
            world.registry.add(Entity::viewer(camera)).unwrap()
        };
        let far = world.registry.add(physical_at(50_000.0, 50_000.0)).unwrap();

        let mut hooks = RecordingHooks::default();
        world.run_tick(&mut hooks);
        assert!(
            world.registry.get(far).unwrap().physics().unwrap().sleeping,
            "entity outside every view must hibernate"
        );

        hooks.ticked.clear();
        world.run_tick(&mut hooks);
        assert!(!hooks.ticked.contains(&far), "sleeping entity is skipped");

        // Move it into the viewer's region; the wake pass runs before
        // SIMULATE, so it must tick the same tick it re-enters
        world
            .registry
            .get_mut(far)
            .unwrap()
            .physics_mut()
            .unwrap()
            .position = Vec2::new(100.0, 100.0);
        hooks.ticked.clear();
        world.run_tick(&mut hooks);
        assert!(hooks.ticked.contains(&far));
        assert!(!world.registry.get(far).unwrap().physics().unwrap().sleeping);

        let _ = camera_id;
    }

    #[test]
    fn test_reconnection_grace_expiry_tears_down_viewer() {
        let mut config = SimulationConfig::default();
        config.reconnect_grace_secs = 0; // grace of 0 ticks: expires immediately
        let mut world = World::new(config);

        let camera_id = {
            let mut camera = CameraData::new(0.55);
            camera.reconnection_key = Some(uuid::Uuid::new_v4());
            camera.mark_for_reconnection();
            world.registry.add(Entity::viewer(camera)).unwrap()
        };
        let bystander = world.registry.add(physical_at(0.0, 0.0)).unwrap();

        let mut hooks = RecordingHooks::default();
        world.run_tick(&mut hooks);

        assert!(!world.registry.exists(camera_id));
        assert!(world.registry.exists(bystander), "teardown is isolated");
    }

    #[test]
    fn test_camera_follows_player_root() {
        let mut world = test_world();
        let body = world.registry.add(physical_at(123.0, 456.0)).unwrap();
        let camera_id = {
            let mut camera = CameraData::new(0.55);
            camera.player = Some(body);
            world.registry.add(Entity::viewer(camera)).unwrap()
        };

        let mut hooks = RecordingHooks::default();
        world.run_tick(&mut hooks);

        let camera = world.registry.get(camera_id).unwrap().camera().unwrap();
        assert_eq!(camera.position, Vec2::new(123.0, 456.0));
    }

    #[test]
    fn test_clear_resets_world() {
        let mut world = test_world();
        let arena = world.registry.add(physical_at(0.0, 0.0)).unwrap();
        world.set_arena(arena);
        world.registry.add(physical_at(10.0, 0.0)).unwrap();

        world.clear();
        assert!(world.registry.is_empty());
        assert_eq!(world.arena(), None);
    }
}
