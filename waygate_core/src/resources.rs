use std::collections::HashMap;

use bevy::prelude::*;
use crossbeam_channel::{unbounded, Receiver, Sender};
use waygate_proto::{PlayerId, PortalPos, ServerMessage};

/// Tracks total ticks elapsed.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationTick(pub u64);

/// Position → gate entity lookup for lifecycle hooks.
#[derive(Resource, Default, Debug, Clone)]
pub struct PortalIndex {
    gates: HashMap<PortalPos, Entity>,
}

impl PortalIndex {
    pub fn get(&self, pos: PortalPos) -> Option<Entity> {
        self.gates.get(&pos).copied()
    }

    pub fn insert(&mut self, pos: PortalPos, entity: Entity) {
        self.gates.insert(pos, entity);
    }

    pub fn remove(&mut self, pos: PortalPos) -> Option<Entity> {
        self.gates.remove(&pos)
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

/// Message produced on the tick thread for the replication dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    ToPlayer(PlayerId, ServerMessage),
    Broadcast(ServerMessage),
}

/// Queue carrying tick-side notifications (arrivals, yaw corrections) to
/// the network dispatch thread.
#[derive(Resource, Clone)]
pub struct ReplicationOutbox {
    sender: Sender<Outbound>,
    receiver: Receiver<Outbound>,
}

impl Default for ReplicationOutbox {
    fn default() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }
}

impl ReplicationOutbox {
    pub fn send_to(&self, player: PlayerId, message: ServerMessage) {
        let _ = self.sender.send(Outbound::ToPlayer(player, message));
    }

    pub fn broadcast(&self, message: ServerMessage) {
        let _ = self.sender.send(Outbound::Broadcast(message));
    }

    pub fn receiver(&self) -> Receiver<Outbound> {
        self.receiver.clone()
    }
}

/// A player's request to be moved straight to a known portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfTeleportRequest {
    pub player: PlayerId,
    pub target: PortalPos,
}

/// Queue carrying self-teleport requests from the network thread to the tick.
#[derive(Resource, Clone)]
pub struct SelfTeleportInbox {
    sender: Sender<SelfTeleportRequest>,
    receiver: Receiver<SelfTeleportRequest>,
}

impl Default for SelfTeleportInbox {
    fn default() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }
}

impl SelfTeleportInbox {
    pub fn sender(&self) -> Sender<SelfTeleportRequest> {
        self.sender.clone()
    }

    pub fn drain(&self) -> Vec<SelfTeleportRequest> {
        self.receiver.try_iter().collect()
    }
}
