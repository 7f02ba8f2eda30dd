//! Viewer lifecycle: connect, disconnect, reconnect, broadcast
//!
//! The session manager owns one [`ClientView`] and one outbox per
//! connected viewer and bridges them to camera entities in the world. A
//! disconnect does not destroy the camera: it enters the reconnection
//! grace window keyed by a one-time token, and a client presenting that
//! token gets its camera back with a fresh view history.

use hashbrown::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::entity::{CameraData, Entity, EntityId, ViewerConnection};
use crate::game::registry::RegistryError;
use crate::game::scheduler::World;
use crate::net::outbox::{self, PacketDrain, PacketOutbox};
use crate::net::view::{ClientView, FieldEncoder};

/// Outbound queue depth per client before packets drop
const OUTBOX_CAPACITY: usize = 32;

struct ClientSession {
    view: ClientView,
    outbox: PacketOutbox,
}

/// All connected viewers of one world
#[derive(Default)]
pub struct SessionManager {
    sessions: HashMap<EntityId, ClientSession>,
    reconnect_index: HashMap<Uuid, EntityId>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    /// Admits a new viewer: creates its camera entity and outbound queue.
    /// Returns the camera id, the reconnection token to hand to the
    /// client, and the transport-side packet drain.
    pub fn connect(
        &mut self,
        world: &mut World,
        fov: f32,
    ) -> Result<(EntityId, Uuid, PacketDrain), RegistryError> {
        let key = Uuid::new_v4();
        let mut camera = CameraData::new(fov);
        camera.reconnection_key = Some(key);
        let id = world.registry.add(Entity::viewer(camera))?;

        let (outbox, drain) = outbox::channel(id, OUTBOX_CAPACITY);
        self.sessions.insert(
            id,
            ClientSession {
                view: ClientView::new(id),
                outbox,
            },
        );
        self.reconnect_index.insert(key, id);

        info!(camera = id, "viewer connected");
        Ok((id, key, drain))
    }

    /// Transport loss. The camera stays alive awaiting reconnection; the
    /// scheduler tears it down if the grace window lapses.
    pub fn disconnect(&mut self, world: &mut World, camera: EntityId) {
        self.sessions.remove(&camera);
        if let Some(data) = world.registry.get_mut(camera).and_then(|e| e.camera_mut()) {
            data.mark_for_reconnection();
            info!(camera, "viewer disconnected, awaiting reconnection");
        } else {
            debug!(camera, "disconnect for unknown camera");
        }
    }

    /// Reattaches a returning client by its reconnection token. The view
    /// history starts empty so the next packet rebuilds the client's
    /// world from scratch.
    pub fn reconnect(
        &mut self,
        world: &mut World,
        key: Uuid,
    ) -> Option<(EntityId, PacketDrain)> {
        let id = *self.reconnect_index.get(&key)?;
        let data = world.registry.get_mut(id).and_then(|e| e.camera_mut())?;
        if !matches!(data.connection, ViewerConnection::AwaitingReconnect { .. }) {
            warn!(camera = id, "reconnection attempt for a connected viewer");
            return None;
        }
        data.connection = ViewerConnection::Connected;

        let (outbox, drain) = outbox::channel(id, OUTBOX_CAPACITY);
        self.sessions.insert(
            id,
            ClientSession {
                view: ClientView::new(id),
                outbox,
            },
        );
        info!(camera = id, "viewer reconnected");
        Some((id, drain))
    }

    /// Permanent departure: the camera entity goes with the session
    pub fn remove(&mut self, world: &mut World, camera: EntityId) {
        self.sessions.remove(&camera);
        self.reconnect_index.retain(|_, &mut id| id != camera);
        if world.registry.exists(camera) {
            world.defer_delete(camera);
        }
        info!(camera, "viewer removed");
    }

    /// Compiles and queues one update packet per connected viewer. Call
    /// this from the scheduler's replicate snapshot, while flags and the
    /// grid still describe the finished tick. Sessions whose camera lapsed
    /// out of the world are pruned here.
    pub fn broadcast(&mut self, world: &World, encoder: &mut dyn FieldEncoder) {
        let mut lapsed: Vec<EntityId> = Vec::new();
        for (&camera, session) in self.sessions.iter_mut() {
            if !world.registry.exists(camera) {
                lapsed.push(camera);
                continue;
            }
            let packet = session.view.compile(world, encoder);
            session.outbox.push(packet);
        }

        for camera in lapsed {
            debug!(camera, "pruning session for lapsed camera");
            self.sessions.remove(&camera);
            self.reconnect_index.retain(|_, &mut id| id != camera);
        }
    }
}
