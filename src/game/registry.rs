//! Entity registry: the slot table that owns every entity in one arena
//!
//! Ids are dense slot indices handed out by a first-free-slot scan bounded by
//! the high-water mark, so under steady load ids stay packed and sweeps cost
//! is proportional to the populated prefix of the table, not its capacity.
//! Each slot carries a generation counter; a held `(id, hash)` pair goes
//! stale the instant the slot is reused.

use tracing::error;

use crate::game::entity::{Entity, EntityId, EntityKind, EntityRef, GenerationHash, MAX_ENTITIES};

/// Registry misuse and capacity errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// All 16,384 slots are live. The population cap configured elsewhere was
    /// violated; callers must not retry within the same tick.
    #[error("out of identity space: all {MAX_ENTITIES} entity slots are live")]
    OutOfIdentitySpace,
    /// Deleting an entity that is not in the arena is a programming error.
    #[error("slot {0} is empty: deleted an entity that is not in the arena")]
    EmptySlot(EntityId),
}

/// Slot table plus classification lists for one arena
pub struct EntityRegistry {
    /// One slot per possible id; `None` marks a free slot
    slots: Vec<Option<Entity>>,
    /// Generation counter per slot, bumped on every reuse
    generations: Vec<GenerationHash>,
    /// Ids of viewer (camera) entities
    cameras: Vec<EntityId>,
    /// Ids of global physical fixtures, sent to every viewer
    globals: Vec<EntityId>,
    /// Ids of plain bookkeeping entities
    others: Vec<EntityId>,
    /// One past the highest id ever occupied since the last retraction
    high_water: usize,
    /// Creation ordinal stamped on each added entity
    z_index: u32,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_ENTITIES).map(|_| None).collect(),
            generations: vec![0; MAX_ENTITIES],
            cameras: Vec::new(),
            globals: Vec::new(),
            others: Vec::new(),
            high_water: 0,
            z_index: 0,
        }
    }

    /// Adds an entity, assigning the first free slot at or below the
    /// high-water mark.
    pub fn add(&mut self, mut entity: Entity) -> Result<EntityId, RegistryError> {
        let bound = (self.high_water + 1).min(MAX_ENTITIES);
        for id in 0..bound {
            if self.slots[id].is_some() {
                continue;
            }

            let hash = self.generations[id].wrapping_add(1);
            self.generations[id] = hash;

            entity.id = id as EntityId;
            entity.hash = hash;
            entity.preserved_hash = hash;
            entity.z_index = self.z_index;
            self.z_index = self.z_index.wrapping_add(1);

            // Classify so the view compiler knows what to send unconditionally
            match &entity.kind {
                EntityKind::Physical(data) => {
                    if data.is_global {
                        self.globals.push(entity.id);
                    }
                    // Non-global physicals reach the index at PRETICK rebuild
                }
                EntityKind::Viewer(_) => self.cameras.push(entity.id),
                EntityKind::Plain => self.others.push(entity.id),
            }

            self.slots[id] = Some(entity);
            if id == self.high_water {
                self.high_water = id + 1;
            }
            return Ok(id as EntityId);
        }

        error!("entity registry exhausted: {} slots live", MAX_ENTITIES);
        Err(RegistryError::OutOfIdentitySpace)
    }

    /// Removes an entity, freeing its slot for reuse on the next add scan.
    ///
    /// The returned entity carries `hash == 0` with `preserved_hash` intact
    /// so pending delete notifications can still target this instance.
    pub fn delete(&mut self, id: EntityId) -> Result<Entity, RegistryError> {
        let slot = self
            .slots
            .get_mut(id as usize)
            .ok_or(RegistryError::EmptySlot(id))?;
        let mut entity = slot.take().ok_or(RegistryError::EmptySlot(id))?;
        entity.hash = 0;

        match &entity.kind {
            EntityKind::Physical(data) => {
                if data.is_global {
                    swap_remove_id(&mut self.globals, id);
                }
            }
            EntityKind::Viewer(_) => swap_remove_id(&mut self.cameras, id),
            EntityKind::Plain => swap_remove_id(&mut self.others, id),
        }

        Ok(entity)
    }

    /// Wipes every slot and resets generations; whole-arena reset.
    ///
    /// Callers must run the spatial index's post-tick pass first so the index
    /// holds no stale references; `World::clear` orchestrates that ordering.
    pub fn clear(&mut self) {
        for slot in &mut self.slots[..self.high_water] {
            *slot = None;
        }
        self.generations.fill(0);
        self.cameras.clear();
        self.globals.clear();
        self.others.clear();
        self.high_water = 0;
    }

    #[inline]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots.get(id as usize).and_then(|slot| slot.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots
            .get_mut(id as usize)
            .and_then(|slot| slot.as_mut())
    }

    /// Resolves a held reference, failing if the slot was freed or reused
    pub fn resolve(&self, entity_ref: EntityRef) -> Option<&Entity> {
        self.get(entity_ref.id)
            .filter(|entity| entity.hash == entity_ref.hash)
    }

    #[inline]
    pub fn exists(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// One past the highest occupied id; sweep bound
    #[inline]
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Pulls the high-water mark down over trailing free slots so sweep cost
    /// tracks the live population. Runs at PRETICK.
    pub fn retract_high_water(&mut self) {
        while self.high_water > 0 && self.slots[self.high_water - 1].is_none() {
            self.high_water -= 1;
        }
    }

    /// Live entities in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.slots[..self.high_water]
            .iter()
            .filter_map(|slot| slot.as_ref())
    }

    /// Live ids in ascending order
    pub fn live_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.iter().map(|entity| entity.id)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cameras(&self) -> &[EntityId] {
        &self.cameras
    }

    pub fn globals(&self) -> &[EntityId] {
        &self.globals
    }

    pub fn others(&self) -> &[EntityId] {
        &self.others
    }

    /// Walks parent links to the root of an ownership chain.
    ///
    /// Non-physical and parentless entities are their own root. Bounded by
    /// the table capacity so a corrupt cycle cannot hang the sweep.
    pub fn root_ancestor(&self, id: EntityId) -> EntityId {
        let mut current = id;
        for _ in 0..MAX_ENTITIES {
            let parent = self
                .get(current)
                .and_then(|entity| entity.physics())
                .and_then(|data| data.parent);
            match parent {
                Some(next) => current = next,
                None => return current,
            }
        }
        current
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn swap_remove_id(list: &mut Vec<EntityId>, id: EntityId) {
    if let Some(index) = list.iter().position(|&entry| entry == id) {
        list.swap_remove(index);
    }
}
