mod config;
mod game;
mod net;
mod util;

use rand::Rng;
use tokio::time::MissedTickBehavior;
use tracing::{info, Level};

use crate::config::SimulationConfig;
use crate::game::entity::{Entity, EntityId, PhysicalData, StateFlags};
use crate::game::registry::EntityRegistry;
use crate::game::scheduler::{SimulationHooks, World};
use crate::net::input::InputBuffer;
use crate::net::session::SessionManager;
use crate::net::view::FieldEncoder;
use crate::net::wire::Writer;
use crate::util::vec2::Vec2;

/// Half-extent of the demo arena
const ARENA_BOUND: f32 = 4000.0;
/// Drifting polygons populating the demo arena
const POLYGON_COUNT: usize = 400;
/// World units a camera pans per command
const CAMERA_PAN_SPEED: f32 = 40.0;

/// The demo's only client command: pan the free-look camera
#[derive(Debug, Clone, Copy)]
struct PanCommand {
    direction: Vec2,
}

/// Drifting-polygon behavior: integrate velocity and bounce off the
/// arena bounds
struct DriftHooks;

impl SimulationHooks for DriftHooks {
    fn tick_entity(&mut self, world: &mut World, id: EntityId, _tick: u32) {
        let Some(entity) = world.registry.get_mut(id) else {
            return;
        };
        let Some(data) = entity.physics_mut() else {
            return;
        };
        if data.velocity == Vec2::ZERO {
            return;
        }

        data.position += data.velocity;
        if data.position.x.abs() > ARENA_BOUND {
            data.velocity.x = -data.velocity.x;
        }
        if data.position.y.abs() > ARENA_BOUND {
            data.velocity.y = -data.velocity.y;
        }
        entity.state.insert(StateFlags::NEEDS_UPDATE);
    }
}

/// Composes the demo behavior with per-viewer replication: packets are
/// compiled at the replicate snapshot, before POSTTICK wipes flags
struct ServerHooks {
    drift: DriftHooks,
    sessions: SessionManager,
    encoder: DemoEncoder,
    /// Grid occupancy sampled at the snapshot, for the stats log
    occupied_cells: usize,
}

impl SimulationHooks for ServerHooks {
    fn tick_entity(&mut self, world: &mut World, id: EntityId, tick: u32) {
        self.drift.tick_entity(world, id, tick);
    }

    fn replicate(&mut self, world: &World) {
        self.sessions.broadcast(world, &mut self.encoder);
        self.occupied_cells = world.grid.stats().occupied_cells;
    }
}

/// Applies every buffered client command. Runs before the tick so a
/// command submitted mid-tick takes effect on the next one.
fn apply_inputs(world: &mut World, inputs: &InputBuffer<PanCommand>) {
    for message in inputs.drain() {
        if let Some(camera) = world
            .registry
            .get_mut(message.viewer)
            .and_then(|e| e.camera_mut())
        {
            camera.position += message.command.direction * CAMERA_PAN_SPEED;
        }
    }
}

/// Minimal field layout: position, size and side count as varuints.
/// A production encoder owns the real per-field bit layout.
struct DemoEncoder;

impl DemoEncoder {
    fn write_fields(writer: &mut Writer, registry: &EntityRegistry, entity: EntityId) {
        let Some(data) = registry.get(entity).and_then(|e| e.physics()) else {
            writer.vu(0);
            return;
        };
        writer.vu((data.position.x + ARENA_BOUND) as u64);
        writer.vu((data.position.y + ARENA_BOUND) as u64);
        writer.vu(data.size as u64);
        writer.vu(u64::from(data.sides));
    }
}

impl FieldEncoder for DemoEncoder {
    fn compile_creation(
        &mut self,
        _viewer: EntityId,
        writer: &mut Writer,
        registry: &EntityRegistry,
        entity: EntityId,
    ) {
        writer.entid(
            entity,
            registry.get(entity).map(|e| e.hash).unwrap_or(0),
        );
        Self::write_fields(writer, registry, entity);
    }

    fn compile_update(
        &mut self,
        _viewer: EntityId,
        writer: &mut Writer,
        registry: &EntityRegistry,
        entity: EntityId,
    ) {
        writer.entid(
            entity,
            registry.get(entity).map(|e| e.hash).unwrap_or(0),
        );
        Self::write_fields(writer, registry, entity);
    }
}

/// Builds the demo arena: the global world fixture plus drifting polygons
fn populate(world: &mut World) -> anyhow::Result<()> {
    let mut arena_data = PhysicalData::new(Vec2::ZERO, ARENA_BOUND, 4);
    arena_data.is_global = true;
    arena_data.always_active = true;
    let arena = world
        .registry
        .add(Entity::physical(arena_data))
        .map_err(|e| anyhow::anyhow!("failed to create arena fixture: {e}"))?;
    world.set_arena(arena);

    let mut rng = rand::thread_rng();
    for _ in 0..POLYGON_COUNT {
        let mut data = PhysicalData::new(
            Vec2::new(
                rng.gen_range(-ARENA_BOUND..ARENA_BOUND),
                rng.gen_range(-ARENA_BOUND..ARENA_BOUND),
            ),
            rng.gen_range(20.0..60.0),
            rng.gen_range(3..=6),
        );
        data.velocity = Vec2::from_angle(rng.gen_range(0.0..std::f32::consts::TAU))
            * rng.gen_range(0.5..3.0);
        data.can_sleep = true;
        world
            .registry
            .add(Entity::physical(data))
            .map_err(|e| anyhow::anyhow!("failed to populate arena: {e}"))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Polyfield Server v{}", env!("CARGO_PKG_VERSION"));

    let config = SimulationConfig::load_or_default();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    info!(
        "Configuration loaded: tps={}, grid_cell_size={}",
        config.tps, config.grid_cell_size
    );

    let mut world = World::new(config.clone());
    populate(&mut world)?;
    info!("Arena populated with {} entities", world.registry.len());

    // Headless demo viewer so the full compile pipeline runs
    let mut sessions = SessionManager::new();
    let (camera, _key, drain) = sessions
        .connect(&mut world, 0.55)
        .map_err(|e| anyhow::anyhow!("failed to create demo viewer: {e}"))?;
    if let Some(data) = world.registry.get_mut(camera).and_then(|e| e.camera_mut()) {
        data.free_look = true;
    }

    let inputs: InputBuffer<PanCommand> = InputBuffer::default();
    let pan_input = inputs.sender();

    let mut hooks = ServerHooks {
        drift: DriftHooks,
        sessions,
        encoder: DemoEncoder,
        occupied_cells: 0,
    };
    let mut interval = tokio::time::interval(config.tick_duration());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let stats_interval = config.tps * 10;

    info!("Simulation running at {} Hz", config.tps);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                apply_inputs(&mut world, &inputs);
                world.run_tick(&mut hooks);

                // The demo viewer wanders: a slowly turning pan submitted
                // through the same buffer a connection handler would use,
                // picked up by the next tick's drain
                let angle = world.tick() as f32 * 0.01;
                let _ = pan_input.try_send(camera, PanCommand {
                    direction: Vec2::from_angle(angle),
                });

                let mut bytes = 0usize;
                while let Some(packet) = drain.try_recv() {
                    bytes += packet.len();
                }

                if world.tick() % stats_interval == 0 {
                    info!(
                        tick = world.tick(),
                        entities = world.registry.len(),
                        occupied_cells = hooks.occupied_cells,
                        packet_bytes = bytes,
                        "simulation stats"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down...");
    Ok(())
}
