//! Moving entities between linked, activated portals.
//!
//! Every tick each activated gate re-checks its link, snapshots the
//! travelers inside its capture volume, maps each one into the partner
//! gate's frame and asks the host to relocate it. A relocation the host
//! rejects leaves the entity in place without a cooldown so it is retried
//! on a later tick.

use std::f32::consts::{FRAC_PI_2, TAU};

use bevy::{ecs::system::SystemParam, math::Vec3, prelude::*};
use thiserror::Error;
use tracing::{debug, info, warn};
use waygate_proto::{Facing, PortalPos, ServerMessage};

use crate::{
    components::{Cooldowns, NetworkedPlayer, PortalGate, Traveler, TRANSIT_COOLDOWN},
    config::WaygateConfigHandle,
    metrics::TransitMetrics,
    record::PortalRecord,
    registry::{PartnerStatus, PortalRegistry},
    resources::{ReplicationOutbox, SelfTeleportInbox},
};

/// Request handed to the host movement subsystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelocationRequest {
    pub entity: Entity,
    pub from: Vec3,
    pub destination: Vec3,
    pub velocity: Vec3,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RelocationError {
    #[error("destination {0:?} is not loaded")]
    DestinationUnloaded(Vec3),
    #[error("relocation rejected: {0}")]
    Rejected(String),
}

/// Host primitive that actually moves an entity, keeping its velocity.
pub trait EntityMover: Send + Sync {
    fn relocate(&mut self, request: &RelocationRequest) -> Result<(), RelocationError>;
}

/// Mover that accepts every request; the ECS position is the only state.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateMover;

impl EntityMover for ImmediateMover {
    fn relocate(&mut self, _request: &RelocationRequest) -> Result<(), RelocationError> {
        Ok(())
    }
}

#[derive(Resource)]
pub struct MovementHost(Box<dyn EntityMover>);

impl MovementHost {
    pub fn new(mover: impl EntityMover + 'static) -> Self {
        Self(Box::new(mover))
    }

    pub fn relocate(&mut self, request: &RelocationRequest) -> Result<(), RelocationError> {
        self.0.relocate(request)
    }
}

impl Default for MovementHost {
    fn default() -> Self {
        Self::new(ImmediateMover)
    }
}

/// Raised after every successful relocation, for sound and effects consumers.
#[derive(Event, Debug, Clone, PartialEq)]
pub struct TransitCompleted {
    pub entity: Entity,
    /// `None` for self-teleports.
    pub from: Option<PortalPos>,
    pub to: PortalPos,
    pub destination: Vec3,
}

pub fn gate_center(pos: PortalPos) -> Vec3 {
    Vec3::new(pos.x as f32, pos.y as f32, pos.z as f32) + Vec3::splat(0.5)
}

pub fn facing_normal(facing: Facing) -> Vec3 {
    match facing {
        Facing::North => Vec3::NEG_Z,
        Facing::East => Vec3::X,
        Facing::South => Vec3::Z,
        Facing::West => Vec3::NEG_X,
        Facing::Up => Vec3::Y,
        Facing::Down => Vec3::NEG_Y,
    }
}

/// Short cylinder around the gate: radius `size / 2`, `depth` thick along the normal.
pub fn in_capture_volume(record: &PortalRecord, point: Vec3, depth: f32) -> bool {
    let offset = point - gate_center(record.pos);
    let normal = facing_normal(record.facing);
    let along = offset.dot(normal);
    if along.abs() > depth * 0.5 {
        return false;
    }
    let radial = offset - normal * along;
    let radius = record.size * 0.5;
    radial.length_squared() <= radius * radius
}

/// Where a self-teleport lands: one capture depth in front of the gate, so an
/// idle arrival is not swept through once its cooldown lapses.
pub fn arrival_point(record: &PortalRecord, depth: f32) -> Vec3 {
    gate_center(record.pos) + facing_normal(record.facing) * depth
}

/// Rotate clockwise (seen from above) about the vertical axis.
pub fn rotate_quarter_turns(vector: Vec3, turns: u8) -> Vec3 {
    let mut out = vector;
    for _ in 0..turns % 4 {
        out = Vec3::new(-out.z, out.y, out.x);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitPlan {
    pub destination: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub quarter_turns: u8,
    /// Both gates are horizontal, so heading and velocity turn with the offset.
    pub rotates_view: bool,
}

pub fn plan_transit(source: &PortalRecord, target: &PortalRecord, traveler: &Traveler) -> TransitPlan {
    let scale = if source.size > 0.0 {
        target.size / source.size
    } else {
        1.0
    };
    let quarter_turns = source.facing.quarter_turns_to(target.facing);
    let rotates_view = source.facing.is_horizontal() && target.facing.is_horizontal();

    let offset = (traveler.position - gate_center(source.pos)) * scale;
    let destination = gate_center(target.pos) + rotate_quarter_turns(offset, quarter_turns);

    let (velocity, yaw) = if rotates_view {
        (
            rotate_quarter_turns(traveler.velocity, quarter_turns),
            (traveler.yaw + quarter_turns as f32 * FRAC_PI_2).rem_euclid(TAU),
        )
    } else {
        (traveler.velocity, traveler.yaw)
    };

    TransitPlan {
        destination,
        velocity,
        yaw,
        quarter_turns,
        rotates_view,
    }
}

#[derive(SystemParam)]
pub struct TransitParams<'w, 's> {
    pub registry: Res<'w, PortalRegistry>,
    pub config: Res<'w, WaygateConfigHandle>,
    pub mover: ResMut<'w, MovementHost>,
    pub outbox: Res<'w, ReplicationOutbox>,
    pub metrics: ResMut<'w, TransitMetrics>,
    pub completed: EventWriter<'w, TransitCompleted>,
    pub gates: Query<'w, 's, &'static PortalGate>,
    pub travelers: Query<
        'w,
        's,
        (
            Entity,
            &'static mut Traveler,
            &'static mut Cooldowns,
            Option<&'static NetworkedPlayer>,
        ),
    >,
}

pub fn tick_cooldowns(config: Res<WaygateConfigHandle>, mut cooldowns: Query<&mut Cooldowns>) {
    let dt = config.0.tick_seconds;
    for mut timers in cooldowns.iter_mut() {
        timers.tick(dt);
    }
}

pub fn run_transit(mut params: TransitParams) {
    let depth = params.config.0.capture_depth;
    let cooldown = params.config.0.transit_cooldown_seconds;

    let mut active: Vec<PortalPos> = params
        .gates
        .iter()
        .filter(|gate| gate.activation.is_activated())
        .map(|gate| gate.pos)
        .collect();
    active.sort_unstable();

    for pos in active {
        let (source, target) = match params.registry.resolve_partner(pos) {
            PartnerStatus::Linked { source, target } => (source, target),
            PartnerStatus::Desynced => {
                params.metrics.desyncs_healed += 1;
                continue;
            }
            PartnerStatus::Missing | PartnerStatus::Unlinked | PartnerStatus::TargetMissing => {
                continue
            }
        };

        let mut captured: Vec<Entity> = params
            .travelers
            .iter()
            .filter(|(_, traveler, cooldowns, _)| {
                !cooldowns.is_active(TRANSIT_COOLDOWN)
                    && in_capture_volume(&source, traveler.position, depth)
            })
            .map(|(entity, ..)| entity)
            .collect();
        captured.sort_unstable();

        for entity in captured {
            let Ok((entity, mut traveler, mut cooldowns, player)) =
                params.travelers.get_mut(entity)
            else {
                continue;
            };
            let player = player.copied();
            let plan = plan_transit(&source, &target, &traveler);
            let request = RelocationRequest {
                entity,
                from: traveler.position,
                destination: plan.destination,
                velocity: plan.velocity,
            };

            if let Err(err) = params.mover.relocate(&request) {
                params.metrics.relocations_rejected += 1;
                warn!(
                    target: "waygate::transit",
                    ?entity,
                    from = %source.pos,
                    to = %target.pos,
                    error = %err,
                    "transit.rejected"
                );
                continue;
            }

            traveler.position = plan.destination;
            traveler.velocity = plan.velocity;
            traveler.yaw = plan.yaw;
            cooldowns.set(TRANSIT_COOLDOWN, cooldown);

            if let Some(player) = player {
                if plan.rotates_view && plan.quarter_turns != 0 {
                    params.outbox.send_to(
                        player.player,
                        ServerMessage::PlayerYawCorrection {
                            quarter_turns: plan.quarter_turns,
                        },
                    );
                }
                params.registry.discover(source.pos, player.player);
                params.registry.discover(target.pos, player.player);
            }
            params.outbox.broadcast(ServerMessage::EntityArrived {
                entity: entity.to_bits(),
            });
            params.completed.send(TransitCompleted {
                entity,
                from: Some(source.pos),
                to: target.pos,
                destination: plan.destination,
            });
            params.metrics.transits_completed += 1;
            info!(
                target: "waygate::transit",
                ?entity,
                from = %source.pos,
                to = %target.pos,
                quarter_turns = plan.quarter_turns,
                "transit.completed"
            );
        }
    }
}

#[derive(SystemParam)]
pub struct SelfTeleportParams<'w, 's> {
    pub inbox: Res<'w, SelfTeleportInbox>,
    pub registry: Res<'w, PortalRegistry>,
    pub config: Res<'w, WaygateConfigHandle>,
    pub mover: ResMut<'w, MovementHost>,
    pub outbox: Res<'w, ReplicationOutbox>,
    pub metrics: ResMut<'w, TransitMetrics>,
    pub completed: EventWriter<'w, TransitCompleted>,
    pub players: Query<
        'w,
        's,
        (
            Entity,
            &'static mut Traveler,
            &'static mut Cooldowns,
            &'static NetworkedPlayer,
        ),
    >,
}

/// Move requesting players straight to the gate they asked for.
pub fn process_self_teleports(mut params: SelfTeleportParams) {
    let cooldown = params.config.0.transit_cooldown_seconds;
    let depth = params.config.0.capture_depth;

    for request in params.inbox.drain() {
        let Some(record) = params.registry.get(request.target) else {
            params.metrics.self_teleports_refused += 1;
            warn!(
                target: "waygate::transit",
                player = %request.player,
                target_pos = %request.target,
                "self_teleport.failed=unknown_portal"
            );
            continue;
        };

        let Some((entity, mut traveler, mut cooldowns, player)) = params
            .players
            .iter_mut()
            .find(|(_, _, _, player)| player.player == request.player)
        else {
            params.metrics.self_teleports_refused += 1;
            warn!(
                target: "waygate::transit",
                player = %request.player,
                "self_teleport.failed=no_entity"
            );
            continue;
        };

        if !record.enabled || !record.is_visible_to(player.player, player.creative) {
            params.metrics.self_teleports_refused += 1;
            warn!(
                target: "waygate::transit",
                player = %request.player,
                target_pos = %record.pos,
                enabled = record.enabled,
                "self_teleport.failed=not_available"
            );
            continue;
        }

        let destination = arrival_point(&record, depth);
        let relocation = RelocationRequest {
            entity,
            from: traveler.position,
            destination,
            velocity: traveler.velocity,
        };
        if let Err(err) = params.mover.relocate(&relocation) {
            params.metrics.self_teleports_refused += 1;
            warn!(
                target: "waygate::transit",
                player = %request.player,
                error = %err,
                "self_teleport.failed=rejected"
            );
            continue;
        }

        traveler.position = destination;
        cooldowns.set(TRANSIT_COOLDOWN, cooldown);
        params.outbox.broadcast(ServerMessage::EntityArrived {
            entity: entity.to_bits(),
        });
        params.completed.send(TransitCompleted {
            entity,
            from: None,
            to: record.pos,
            destination,
        });
        params.metrics.self_teleports += 1;
        debug!(
            target: "waygate::transit",
            player = %request.player,
            target_pos = %record.pos,
            "self_teleport.completed"
        );
    }
}
