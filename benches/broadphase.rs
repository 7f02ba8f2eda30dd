//! Broad-phase and tick-pipeline benchmarks for Polyfield server
//!
//! Measures grid rebuild, region queries, pair enumeration and full ticks
//! at various entity populations.
//!
//! Run with: cargo bench --bench broadphase

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use polyfield_server::config::SimulationConfig;
use polyfield_server::game::entity::{Aabb, CameraData, Entity, PhysicalData};
use polyfield_server::game::scheduler::{SimulationHooks, World};
use polyfield_server::net::view::ClientView;
use polyfield_server::net::view::FieldEncoder;
use polyfield_server::net::wire::Writer;
use polyfield_server::util::vec2::Vec2;
use rand::Rng;

const ARENA_BOUND: f32 = 4000.0;

struct NoopEncoder;
impl FieldEncoder for NoopEncoder {
    fn compile_creation(
        &mut self,
        _viewer: u16,
        writer: &mut Writer,
        _registry: &polyfield_server::game::registry::EntityRegistry,
        entity: u16,
    ) {
        writer.entid(entity, 1);
    }
    fn compile_update(
        &mut self,
        _viewer: u16,
        writer: &mut Writer,
        _registry: &polyfield_server::game::registry::EntityRegistry,
        entity: u16,
    ) {
        writer.entid(entity, 1);
    }
}

/// World with `count` physicals scattered uniformly across the arena
fn create_world(count: usize) -> World {
    let mut world = World::new(SimulationConfig::default());
    let mut rng = rand::thread_rng();

    let mut arena_data = PhysicalData::new(Vec2::ZERO, ARENA_BOUND, 4);
    arena_data.is_global = true;
    let arena = world.registry.add(Entity::physical(arena_data)).unwrap();
    world.set_arena(arena);

    for _ in 0..count {
        let data = PhysicalData::new(
            Vec2::new(
                rng.gen_range(-ARENA_BOUND..ARENA_BOUND),
                rng.gen_range(-ARENA_BOUND..ARENA_BOUND),
            ),
            rng.gen_range(20.0..60.0),
            rng.gen_range(3..=6),
        );
        world.registry.add(Entity::physical(data)).unwrap();
    }
    world
}

/// Benchmark grid rebuild (the PRETICK cost) at various populations
fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_rebuild");
    group.sample_size(50);

    for count in [500, 1000, 4000, 8000] {
        let mut world = create_world(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("pre_tick", count), &count, |b, _| {
            b.iter(|| {
                world.pre_tick();
                world.post_tick();
            })
        });
    }
    group.finish();
}

/// Benchmark region queries against a populated grid
fn bench_retrieve(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_retrieve");
    group.sample_size(50);

    for count in [500, 1000, 4000, 8000] {
        let mut world = create_world(count);
        world.pre_tick();
        let rect = Aabb::from_center(Vec2::ZERO, 1200.0, 700.0);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("view_rect", count), &count, |b, _| {
            b.iter(|| {
                let bits = world.grid.retrieve(black_box(&rect));
                black_box(bits.count_ones())
            })
        });
        world.post_tick();
    }
    group.finish();
}

/// Benchmark unique-pair enumeration (the COLLIDE scan)
fn bench_pairs(c: &mut Criterion) {
    let mut group = c.benchmark_group("collision_pairs");
    group.sample_size(50);

    for count in [500, 1000, 4000, 8000] {
        let mut world = create_world(count);
        world.pre_tick();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("unique_pairs", count), &count, |b, _| {
            b.iter(|| {
                let mut pairs = 0usize;
                world.grid.for_each_collision_pair(|_, _| pairs += 1);
                black_box(pairs)
            })
        });
        world.post_tick();
    }
    group.finish();
}

/// Benchmark a full tick including one viewer's delta compile at the
/// replicate snapshot
fn bench_full_tick(c: &mut Criterion) {
    struct CompilingHooks {
        view: ClientView,
        encoder: NoopEncoder,
        bytes: usize,
    }
    impl SimulationHooks for CompilingHooks {
        fn replicate(&mut self, world: &World) {
            self.bytes = self.view.compile(world, &mut self.encoder).len();
        }
    }

    let mut group = c.benchmark_group("full_tick");
    group.sample_size(30);

    for count in [500, 1000, 4000, 8000] {
        let mut world = create_world(count);
        let camera = {
            let mut data = CameraData::new(0.55);
            data.free_look = true;
            world.registry.add(Entity::viewer(data)).unwrap()
        };
        let mut hooks = CompilingHooks {
            view: ClientView::new(camera),
            encoder: NoopEncoder,
            bytes: 0,
        };

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("tick_and_compile", count), &count, |b, _| {
            b.iter(|| {
                world.run_tick(&mut hooks);
                black_box(hooks.bytes)
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_rebuild,
    bench_retrieve,
    bench_pairs,
    bench_full_tick
);
criterion_main!(benches);
