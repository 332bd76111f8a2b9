//! Server fan-out of registry changes and the client-side mirror.
//!
//! The server side turns registry notifications into per-player projected
//! wire messages. Every connection gets a full snapshot when its handshake
//! completes; after that it only sees record updates, removals and the tick
//! thread's notices. The client side is a read-only mirror written solely
//! by inbound messages.

use std::collections::BTreeMap;

use crossbeam_channel::{select, Receiver, Sender};
use tracing::{debug, info, warn};
use waygate_proto::{
    codec::encode_server, ClientMessage, CosmeticUpdate, PlayerId, PortalPos, PortalSnapshot,
    PortalState, ServerMessage,
};

use crate::{
    network::{ConnectionId, NetworkEvent},
    record::PortalRecord,
    registry::{PortalRegistry, RegistryEvent},
    resources::{Outbound, SelfTeleportRequest},
};

/// Outgoing half of the network channel.
pub trait Transport: Send {
    /// Deliver one encoded frame. `false` means the connection is gone.
    fn send(&self, conn: ConnectionId, payload: &[u8]) -> bool;
}

/// Positional access check for cosmetic edits by non-creative players.
pub trait AccessPolicy: Send + Sync {
    fn may_edit(&self, player: PlayerId, record: &PortalRecord) -> bool;
}

/// Players may edit portals they have discovered.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoveredAccess;

impl AccessPolicy for DiscoveredAccess {
    fn may_edit(&self, player: PlayerId, record: &PortalRecord) -> bool {
        record.is_discovered_by(player)
    }
}

/// Build the wire view of `record` as seen by `player`.
///
/// Shared fields are copied verbatim; only the recipient's own preferences
/// and discovery flag are included.
pub fn project(record: &PortalRecord, player: PlayerId) -> PortalState {
    PortalState {
        pos: record.pos,
        name: record.name.clone(),
        enabled: record.enabled,
        target: record.target,
        size: record.size,
        facing: record.facing,
        discovered: record.is_discovered_by(player),
        prefs: record.prefs_for(player).cloned(),
    }
}

pub fn project_snapshot(records: &[PortalRecord], player: PlayerId) -> PortalSnapshot {
    PortalSnapshot::new(records.iter().map(|record| project(record, player)).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Session {
    player: PlayerId,
    creative: bool,
}

pub struct ServerReplicator<T: Transport> {
    registry: PortalRegistry,
    transport: T,
    policy: Box<dyn AccessPolicy>,
    teleports: Sender<SelfTeleportRequest>,
    sessions: BTreeMap<ConnectionId, Session>,
}

impl<T: Transport> ServerReplicator<T> {
    pub fn new(registry: PortalRegistry, transport: T, teleports: Sender<SelfTeleportRequest>) -> Self {
        Self {
            registry,
            transport,
            policy: Box::new(DiscoveredAccess),
            teleports,
            sessions: BTreeMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: impl AccessPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Register a connection and send it a fresh full snapshot.
    ///
    /// Reusing a connection id replaces the old session.
    pub fn connect(&mut self, conn: ConnectionId, player: PlayerId, creative: bool) {
        self.sessions.insert(conn, Session { player, creative });
        let snapshot = project_snapshot(&self.registry.snapshot(), player);
        info!(
            target: "waygate::replication",
            conn,
            %player,
            creative,
            records = snapshot.header.record_count,
            "session.opened"
        );
        self.send(conn, &ServerMessage::FullSnapshot(snapshot));
    }

    pub fn disconnect(&mut self, conn: ConnectionId) {
        if let Some(session) = self.sessions.remove(&conn) {
            info!(target: "waygate::replication", conn, player = %session.player, "session.closed");
        }
    }

    pub fn on_registry_event(&mut self, event: &RegistryEvent) {
        match event {
            RegistryEvent::Changed(record) => {
                let targets: Vec<(ConnectionId, PlayerId)> = self
                    .sessions
                    .iter()
                    .map(|(conn, session)| (*conn, session.player))
                    .collect();
                for (conn, player) in targets {
                    self.send(conn, &ServerMessage::RecordUpdate(project(record, player)));
                }
            }
            RegistryEvent::Removed(pos) => self.broadcast(&ServerMessage::RecordRemoved(*pos)),
        }
    }

    pub fn on_outbound(&mut self, outbound: Outbound) {
        match outbound {
            Outbound::ToPlayer(player, message) => {
                let conns: Vec<ConnectionId> = self
                    .sessions
                    .iter()
                    .filter(|(_, session)| session.player == player)
                    .map(|(conn, _)| *conn)
                    .collect();
                for conn in conns {
                    self.send(conn, &message);
                }
            }
            Outbound::Broadcast(message) => self.broadcast(&message),
        }
    }

    pub fn handle_client_message(&mut self, conn: ConnectionId, message: ClientMessage) {
        let Some(session) = self.sessions.get(&conn).copied() else {
            debug!(target: "waygate::replication", conn, "message.dropped=no_session");
            return;
        };
        match message {
            ClientMessage::Hello { player } => {
                debug!(target: "waygate::replication", conn, %player, "hello.ignored=already_open");
            }
            ClientMessage::CosmeticUpdate(update) => self.apply_cosmetic(session, &update),
            ClientMessage::SelfTeleportRequest { target } => {
                let request = SelfTeleportRequest {
                    player: session.player,
                    target,
                };
                if self.teleports.send(request).is_err() {
                    warn!(target: "waygate::replication", conn, "self_teleport.dropped=tick_closed");
                }
            }
        }
    }

    fn apply_cosmetic(&mut self, session: Session, update: &CosmeticUpdate) {
        let Some(record) = self.registry.get(update.pos) else {
            debug!(target: "waygate::replication", pos = %update.pos, "cosmetic.dropped=missing_record");
            return;
        };
        if !session.creative && !self.policy.may_edit(session.player, &record) {
            debug!(
                target: "waygate::replication",
                player = %session.player,
                pos = %update.pos,
                "cosmetic.dropped=unauthorized"
            );
            return;
        }
        self.registry.apply_cosmetic(session.player, update);
    }

    fn broadcast(&mut self, message: &ServerMessage) {
        let payload = match encode_server(message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: "waygate::replication", kind = message.kind(), error = %err, "encode.failed");
                return;
            }
        };
        let conns: Vec<ConnectionId> = self.sessions.keys().copied().collect();
        for conn in conns {
            self.deliver(conn, &payload);
        }
    }

    fn send(&mut self, conn: ConnectionId, message: &ServerMessage) {
        match encode_server(message) {
            Ok(payload) => self.deliver(conn, &payload),
            Err(err) => {
                warn!(target: "waygate::replication", conn, kind = message.kind(), error = %err, "encode.failed");
            }
        }
    }

    fn deliver(&mut self, conn: ConnectionId, payload: &[u8]) {
        if !self.transport.send(conn, payload) {
            debug!(target: "waygate::replication", conn, "session.dropped=send_failed");
            self.sessions.remove(&conn);
        }
    }

    /// Dispatch loop for the network thread. Returns once the network
    /// event channel closes.
    pub fn run(
        mut self,
        network: Receiver<NetworkEvent>,
        registry_events: Receiver<RegistryEvent>,
        outbound: Receiver<Outbound>,
    ) {
        loop {
            select! {
                recv(network) -> event => match event {
                    Ok(NetworkEvent::Connected { conn, player, creative }) => {
                        self.connect(conn, player, creative)
                    }
                    Ok(NetworkEvent::Message { conn, message }) => {
                        self.handle_client_message(conn, message)
                    }
                    Ok(NetworkEvent::Disconnected(conn)) => self.disconnect(conn),
                    Err(_) => break,
                },
                recv(registry_events) -> event => match event {
                    Ok(event) => self.on_registry_event(&event),
                    Err(_) => break,
                },
                recv(outbound) -> message => match message {
                    Ok(message) => self.on_outbound(message),
                    Err(_) => break,
                },
            }
        }
        info!(target: "waygate::replication", "dispatch.stopped");
    }
}

/// Client-side copy of the portal graph.
#[derive(Debug, Default, Clone)]
pub struct ClientMirror {
    records: BTreeMap<PortalPos, PortalState>,
    arrivals: Vec<u64>,
    pending_quarter_turns: u8,
    snapshot_verified: bool,
}

impl ClientMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::FullSnapshot(snapshot) => {
                self.snapshot_verified = snapshot.verify();
                if !self.snapshot_verified {
                    warn!(
                        target: "waygate::replication",
                        expected = snapshot.header.hash,
                        records = snapshot.records.len(),
                        "snapshot.hash_mismatch"
                    );
                }
                self.records = snapshot
                    .records
                    .into_iter()
                    .map(|state| (state.pos, state))
                    .collect();
            }
            ServerMessage::RecordUpdate(state) => {
                self.records.insert(state.pos, state);
            }
            ServerMessage::RecordRemoved(pos) => {
                self.records.remove(&pos);
            }
            ServerMessage::EntityArrived { entity } => self.arrivals.push(entity),
            ServerMessage::PlayerYawCorrection { quarter_turns } => {
                self.pending_quarter_turns = (self.pending_quarter_turns + quarter_turns) % 4;
            }
        }
    }

    pub fn get(&self, pos: PortalPos) -> Option<&PortalState> {
        self.records.get(&pos)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in position order.
    pub fn iter(&self) -> impl Iterator<Item = &PortalState> {
        self.records.values()
    }

    /// Portals the local player may list or travel to.
    pub fn visible(&self, creative: bool) -> impl Iterator<Item = &PortalState> {
        self.records
            .values()
            .filter(move |state| creative || state.discovered)
    }

    /// Whether the most recent full snapshot matched its header hash.
    pub fn snapshot_verified(&self) -> bool {
        self.snapshot_verified
    }

    pub fn take_arrivals(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.arrivals)
    }

    /// Accumulated view rotation not yet applied by the local camera.
    pub fn take_yaw_correction(&mut self) -> u8 {
        std::mem::take(&mut self.pending_quarter_turns)
    }
}
