//! Per-viewer visibility diffing and delta packet assembly
//!
//! Each connected viewer owns a [`ClientView`]: the record of which entity
//! instances have already been communicated to that client. Once per tick,
//! from the scheduler's replicate snapshot (after deferred deletes, before
//! POSTTICK wipes flags), [`ClientView::compile`] queries the broad-phase
//! grid, diffs the result against the view record, and assembles one update
//! packet. Entity field payloads are produced by an
//! external [`FieldEncoder`]; this module only decides WHICH entities appear
//! and in what category, and owns the packet envelope.

use tracing::trace;

use crate::game::entity::{EntityId, EntityKind, GenerationHash, StateFlags};
use crate::game::registry::EntityRegistry;
use crate::game::scheduler::World;
use crate::game::spatial::EntityBits;
use crate::net::wire::{Writer, UPDATE_MESSAGE};

/// Produces the opaque per-entity byte payloads for creations and updates.
///
/// The encoder receives the viewer's camera id so per-viewer encodings
/// (censored fields, ownership-relative values) are possible. It must only
/// append to the writer.
pub trait FieldEncoder {
    fn compile_creation(
        &mut self,
        viewer: EntityId,
        writer: &mut Writer,
        registry: &EntityRegistry,
        entity: EntityId,
    );

    fn compile_update(
        &mut self,
        viewer: EntityId,
        writer: &mut Writer,
        registry: &EntityRegistry,
        entity: EntityId,
    );
}

/// One tracked entity instance: the hash is snapshotted at admission so a
/// deletion can still name the exact instance after the slot is freed or
/// reused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ViewEntry {
    id: EntityId,
    hash: GenerationHash,
}

/// A pending wire deletion. `no_removal` marks the delete-then-recreate
/// case: the entry is announced as deleted but stays tracked, because a
/// creation for the same id follows in this packet.
#[derive(Debug, Clone, Copy)]
struct WireDelete {
    id: EntityId,
    hash: GenerationHash,
    no_removal: bool,
}

/// Delta-compilation state for one viewer
pub struct ClientView {
    camera: EntityId,
    view: Vec<ViewEntry>,
    // Reused per-compile scratch
    in_range: Vec<EntityId>,
    in_range_bits: Box<EntityBits>,
    deletes: Vec<WireDelete>,
    updates: Vec<EntityId>,
    creations: Vec<EntityId>,
}

impl ClientView {
    pub fn new(camera: EntityId) -> Self {
        Self {
            camera,
            view: Vec::new(),
            in_range: Vec::new(),
            in_range_bits: Box::new(EntityBits::ZERO),
            deletes: Vec::new(),
            updates: Vec::new(),
            creations: Vec::new(),
        }
    }

    #[inline]
    pub fn camera(&self) -> EntityId {
        self.camera
    }

    /// Number of entity instances currently tracked
    pub fn tracked(&self) -> usize {
        self.view.len()
    }

    /// Forgets everything sent so far. The next compile behaves like a
    /// first packet; used after a reconnection.
    pub fn reset(&mut self) {
        self.view.clear();
    }

    fn contains(&self, id: EntityId) -> bool {
        self.view.iter().any(|entry| entry.id == id)
    }

    fn track(&mut self, id: EntityId, hash: GenerationHash) {
        self.view.push(ViewEntry { id, hash });
    }

    fn untrack(&mut self, id: EntityId) {
        if let Some(index) = self.view.iter().position(|entry| entry.id == id) {
            self.view.swap_remove(index);
        }
    }

    /// Collects the visible set for this tick: broad-phase candidates that
    /// pass the exact overlap test, then globals, then the viewer's own
    /// controlled entity. Order is preserved into the creation list.
    fn collect_in_range(&mut self, world: &World, player: Option<EntityId>) {
        self.in_range.clear();
        self.in_range_bits.fill(false);

        let registry = &world.registry;
        let Some(camera) = registry.get(self.camera).and_then(|e| e.camera()) else {
            return;
        };
        let rect = camera.interest_aabb(world.config());

        let candidates = world.grid.retrieve(&rect);
        for raw in candidates.iter_ones() {
            let id = raw as EntityId;
            if player == Some(id) {
                continue;
            }
            let Some(data) = registry.get(id).and_then(|e| e.physics()) else {
                continue;
            };
            if !data.aabb().overlaps(&rect) {
                continue;
            }
            // Invisible entities are skipped unless fading out, which the
            // client must still be shown
            if data.opacity == 0.0 && !data.deletion_animation {
                continue;
            }
            self.in_range.push(id);
            self.in_range_bits.set(raw, true);
        }

        for &id in registry.globals() {
            if !self.in_range_bits[id as usize] {
                self.in_range.push(id);
                self.in_range_bits.set(id as usize, true);
            }
        }

        if let Some(id) = player {
            self.in_range.push(id);
            self.in_range_bits.set(id as usize, true);
        }
    }

    /// Diffs the tracked set against this tick's visible set and entity
    /// state flags, filling the delete/update/create scratch lists
    fn diff(&mut self, registry: &EntityRegistry) {
        self.deletes.clear();
        self.updates.clear();
        self.creations.clear();

        for index in 0..self.view.len() {
            let entry = self.view[index];

            let Some(entity) = registry.get(entry.id).filter(|e| e.hash == entry.hash) else {
                // Freed or reused slot: the instance this entry tracked is
                // gone. The snapshotted hash is its preserved hash.
                self.deletes.push(WireDelete {
                    id: entry.id,
                    hash: entry.hash,
                    no_removal: false,
                });
                continue;
            };

            // A physical whose root ancestor fell out of range leaves the
            // view even while alive; orphaned children go with it
            if matches!(entity.kind, EntityKind::Physical(_)) {
                let root = registry.root_ancestor(entry.id);
                if !self.in_range_bits[root as usize] {
                    self.deletes.push(WireDelete {
                        id: entry.id,
                        hash: entry.hash,
                        no_removal: false,
                    });
                    continue;
                }
            }

            if entity.state.contains(StateFlags::NEEDS_CREATE) {
                if entity.state.contains(StateFlags::NEEDS_DELETE) {
                    self.deletes.push(WireDelete {
                        id: entry.id,
                        hash: entity.hash,
                        no_removal: true,
                    });
                }
                self.creations.push(entry.id);
            } else if entity.state.contains(StateFlags::NEEDS_UPDATE) {
                self.updates.push(entry.id);
            }
        }
    }

    /// Compiles this viewer's update packet for the current tick
    pub fn compile(&mut self, world: &World, encoder: &mut dyn FieldEncoder) -> Vec<u8> {
        let registry = &world.registry;

        let player = registry
            .get(self.camera)
            .and_then(|e| e.camera())
            .and_then(|camera| camera.player)
            .filter(|&id| {
                registry
                    .get(id)
                    .is_some_and(|e| matches!(e.kind, EntityKind::Physical(_)))
            });

        self.collect_in_range(world, player);
        self.diff(registry);

        let mut writer = Writer::new();
        writer.u8(UPDATE_MESSAGE).vu(u64::from(world.tick()));

        writer.vu(self.deletes.len() as u64);
        let deletes = std::mem::take(&mut self.deletes);
        for delete in &deletes {
            writer.entid(delete.id, delete.hash);
            if !delete.no_removal {
                self.untrack(delete.id);
            }
        }
        self.deletes = deletes;

        // First packet or post-reconnection: the client knows nothing, so
        // the arena fixture and its own camera are sent unconditionally
        if self.view.is_empty() {
            if let Some(arena) = world.arena().filter(|&id| registry.exists(id)) {
                if let Some(entity) = registry.get(arena) {
                    self.creations.push(arena);
                    self.track(arena, entity.hash);
                }
            }
            if let Some(entity) = registry.get(self.camera) {
                self.creations.push(self.camera);
                self.track(self.camera, entity.hash);
            }
        }

        // Plain bookkeeping entities replicate to everyone once tracked
        for &id in registry.others() {
            if !self.contains(id) {
                if let Some(entity) = registry.get(id) {
                    self.creations.push(id);
                    self.track(id, entity.hash);
                }
            }
        }

        // Admit newly visible entities, pulling in any untracked children
        // of a visible root so a composite never appears piecemeal
        let in_range = std::mem::take(&mut self.in_range);
        for &id in &in_range {
            let newly_admitted = !self.contains(id);
            if newly_admitted {
                if let Some(entity) = registry.get(id) {
                    self.creations.push(id);
                    self.track(id, entity.hash);
                }
            }
            let Some(data) = registry.get(id).and_then(|e| e.physics()) else {
                continue;
            };
            if data.is_child() || data.children.is_empty() {
                continue;
            }
            let children = data.children.clone();
            for child in children {
                if self.contains(child) {
                    continue;
                }
                if let Some(entity) = registry.get(child).filter(|e| e.is_alive()) {
                    self.creations.push(child);
                    self.track(child, entity.hash);
                }
            }
        }
        self.in_range = in_range;

        writer.vu((self.creations.len() + self.updates.len()) as u64);
        let updates = std::mem::take(&mut self.updates);
        for &id in &updates {
            encoder.compile_update(self.camera, &mut writer, registry, id);
        }
        self.updates = updates;

        let creations = std::mem::take(&mut self.creations);
        for &id in &creations {
            encoder.compile_creation(self.camera, &mut writer, registry, id);
        }
        self.creations = creations;

        trace!(
            camera = self.camera,
            tick = world.tick(),
            tracked = self.view.len(),
            bytes = writer.len(),
            "compiled view"
        );
        writer.finish()
    }
}
