//! Entity identity and capability model
//!
//! Every simulated thing is an [`Entity`] living in one registry slot. The
//! slot index is the entity's `id`; the generation `hash` distinguishes
//! successive occupants of the same slot so stale references are detectable.
//! Capabilities (spatial presence, camera ownership) are a tagged union
//! assigned at construction, never rebound at runtime.

use smallvec::SmallVec;
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::util::vec2::Vec2;

/// Hard ceiling on live entities per arena
pub const MAX_ENTITIES: usize = 16_384;

/// Dense slot index, stable for the entity's lifetime
pub type EntityId = u16;

/// Generation counter; nonzero while the entity is alive, 0 once deleted
pub type GenerationHash = u32;

/// A `(id, hash)` pair pinning one specific occupant of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub id: EntityId,
    pub hash: GenerationHash,
}

// ============================================================================
// Replication state flags
// ============================================================================

/// Per-tick replication state, wiped at POSTTICK
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateFlags(u8);

impl StateFlags {
    /// Some replicated field changed; clients tracking the entity need an update
    pub const NEEDS_UPDATE: StateFlags = StateFlags(1 << 0);
    /// The entity must be recompiled from scratch on every tracking client
    pub const NEEDS_CREATE: StateFlags = StateFlags(1 << 1);
    /// The previous occupant of this id must be deleted client-side first
    pub const NEEDS_DELETE: StateFlags = StateFlags(1 << 2);

    #[inline]
    pub fn contains(&self, flag: StateFlags) -> bool {
        self.0 & flag.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, flag: StateFlags) {
        self.0 |= flag.0;
    }

    /// Clears all flags; runs for every live entity at POSTTICK
    #[inline]
    pub fn wipe(&mut self) {
        self.0 = 0;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

// ============================================================================
// Axis-aligned bounding box
// ============================================================================

/// Axis-aligned bounding box in world units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    #[inline]
    pub fn from_center(center: Vec2, half_w: f32, half_h: f32) -> Self {
        Self {
            min: Vec2::new(center.x - half_w, center.y - half_h),
            max: Vec2::new(center.x + half_w, center.y + half_h),
        }
    }

    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }
}

// ============================================================================
// Physical capability
// ============================================================================

/// Spatial state for entities that collide and appear in views
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalData {
    pub position: Vec2,
    pub velocity: Vec2,
    /// Radius for polygons; length along the facing axis for two-sided shapes
    pub size: f32,
    /// Thickness of two-sided (line/rectangle) shapes; unused otherwise
    pub width: f32,
    /// Side count of the collision shape; 2 means a line/rectangle
    pub sides: u32,
    /// 0.0 = fully transparent (hidden from views unless mid-deletion)
    pub opacity: f32,
    /// Entity is playing its client-side death animation
    pub deletion_animation: bool,
    /// Owning parent; children are never independently indexed while their
    /// root ancestor is visible
    pub parent: Option<EntityId>,
    pub children: SmallVec<[EntityId; 4]>,
    /// Arena fixtures sent to every viewer regardless of region
    pub is_global: bool,
    pub can_sleep: bool,
    pub sleeping: bool,
    /// Owner forces the entity to keep simulating even when unseen
    pub always_active: bool,
}

impl PhysicalData {
    pub fn new(position: Vec2, size: f32, sides: u32) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            size,
            width: size,
            sides,
            opacity: 1.0,
            deletion_animation: false,
            parent: None,
            children: SmallVec::new(),
            is_global: false,
            can_sleep: true,
            sleeping: false,
            always_active: false,
        }
    }

    #[inline]
    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Half extents of the bounding box.
    ///
    /// Two-sided shapes span `size` along x and `width` along y, halved;
    /// regular polygons are bounded by their radius on both axes.
    #[inline]
    pub fn half_extents(&self) -> (f32, f32) {
        if self.sides == 2 {
            (self.size / 2.0, self.width / 2.0)
        } else {
            (self.size, self.size)
        }
    }

    #[inline]
    pub fn aabb(&self) -> Aabb {
        let (hw, hh) = self.half_extents();
        Aabb::from_center(self.position, hw, hh)
    }
}

// ============================================================================
// Viewer capability
// ============================================================================

/// Transport attachment state of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerConnection {
    /// A client is attached and receiving packets
    Connected,
    /// Client dropped; camera survives until the grace window expires
    AwaitingReconnect { ticks_waiting: u32 },
}

/// Camera state for entities that own a view and receive packets
#[derive(Debug, Clone, PartialEq)]
pub struct CameraData {
    /// Camera center in world units
    pub position: Vec2,
    /// Field of view factor; smaller means zoomed out, larger region
    pub fov: f32,
    /// The entity this camera follows and replicates specially
    pub player: Option<EntityId>,
    /// Camera coordinates are driven directly instead of following the player
    pub free_look: bool,
    pub connection: ViewerConnection,
    /// Token a dropped client presents to reclaim this camera
    pub reconnection_key: Option<Uuid>,
}

impl CameraData {
    pub fn new(fov: f32) -> Self {
        Self {
            position: Vec2::ZERO,
            fov,
            player: None,
            free_look: false,
            connection: ViewerConnection::Connected,
            reconnection_key: None,
        }
    }

    /// Half extents of the interest region derived from the FOV
    pub fn interest_half_extents(&self, config: &SimulationConfig) -> (f32, f32) {
        let fov = self.fov.max(f32::EPSILON);
        (
            (config.view_base_width / fov) / config.view_scale,
            (config.view_base_height / fov) / config.view_scale,
        )
    }

    /// Interest rectangle used by the view compiler and the sleep passes
    pub fn interest_aabb(&self, config: &SimulationConfig) -> Aabb {
        let (hw, hh) = self.interest_half_extents(config);
        Aabb::from_center(self.position, hw, hh)
    }

    /// Detach the client while keeping the camera alive for the grace window
    pub fn mark_for_reconnection(&mut self) {
        self.connection = ViewerConnection::AwaitingReconnect { ticks_waiting: 0 };
    }

    pub fn expecting_reconnection(&self) -> bool {
        self.reconnection_key.is_some()
            && matches!(self.connection, ViewerConnection::AwaitingReconnect { .. })
    }
}

// ============================================================================
// Entity
// ============================================================================

/// Capability set, fixed at construction
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    /// Has a bounding volume; participates in collision and visibility
    Physical(PhysicalData),
    /// Owns a camera and a replication view
    Viewer(CameraData),
    /// Bookkeeping only
    Plain,
}

/// One simulated entity occupying a registry slot
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Slot index; assigned by the registry at add
    pub id: EntityId,
    /// Generation; nonzero while alive, set to 0 exactly once at deletion
    pub hash: GenerationHash,
    /// The hash value this instance was born with, kept across deletion so
    /// delete notifications still resolve
    pub preserved_hash: GenerationHash,
    /// Creation ordinal, used by clients for stable draw order
    pub z_index: u32,
    pub state: StateFlags,
    pub kind: EntityKind,
}

impl Entity {
    fn with_kind(kind: EntityKind) -> Self {
        Self {
            id: 0,
            hash: 0,
            preserved_hash: 0,
            z_index: 0,
            state: StateFlags::default(),
            kind,
        }
    }

    pub fn physical(data: PhysicalData) -> Self {
        Self::with_kind(EntityKind::Physical(data))
    }

    pub fn viewer(data: CameraData) -> Self {
        Self::with_kind(EntityKind::Viewer(data))
    }

    pub fn plain() -> Self {
        Self::with_kind(EntityKind::Plain)
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.hash != 0
    }

    #[inline]
    pub fn reference(&self) -> EntityRef {
        EntityRef {
            id: self.id,
            hash: self.hash,
        }
    }

    #[inline]
    pub fn physics(&self) -> Option<&PhysicalData> {
        match &self.kind {
            EntityKind::Physical(data) => Some(data),
            _ => None,
        }
    }

    #[inline]
    pub fn physics_mut(&mut self) -> Option<&mut PhysicalData> {
        match &mut self.kind {
            EntityKind::Physical(data) => Some(data),
            _ => None,
        }
    }

    #[inline]
    pub fn camera(&self) -> Option<&CameraData> {
        match &self.kind {
            EntityKind::Viewer(data) => Some(data),
            _ => None,
        }
    }

    #[inline]
    pub fn camera_mut(&mut self) -> Option<&mut CameraData> {
        match &mut self.kind {
            EntityKind::Viewer(data) => Some(data),
            _ => None,
        }
    }
}
