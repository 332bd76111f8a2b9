//! World-object lifecycle hooks and the per-tick activation driver.

use std::collections::HashMap;

use bevy::prelude::*;
use tracing::{debug, info};
use waygate_proto::{Facing, PortalPos};

use crate::{
    activation::{ActivationPhase, ActivationState},
    components::PortalGate,
    config::WaygateConfigHandle,
    registry::PortalRegistry,
    resources::PortalIndex,
};

/// A portal world object was initialized (placed, loaded or rebuilt).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalPlaced {
    pub pos: PortalPos,
    /// Gate diameter; non-positive values use the configured default.
    pub size: f32,
    pub facing: Facing,
    pub repaired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalRepairStarted {
    pub pos: PortalPos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalBroken {
    pub pos: PortalPos,
}

/// The world object was removed; its record and links go with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalDestroyed {
    pub pos: PortalPos,
}

/// Lifecycle hooks share one event stream and apply in the order they were sent.
#[derive(Event, Debug, Clone, Copy, PartialEq)]
pub enum PortalLifecycle {
    Placed(PortalPlaced),
    RepairStarted(PortalRepairStarted),
    Broken(PortalBroken),
    Destroyed(PortalDestroyed),
}

impl PortalLifecycle {
    pub fn pos(&self) -> PortalPos {
        match self {
            PortalLifecycle::Placed(event) => event.pos,
            PortalLifecycle::RepairStarted(event) => event.pos,
            PortalLifecycle::Broken(event) => event.pos,
            PortalLifecycle::Destroyed(event) => event.pos,
        }
    }
}

/// Activation state of the gate at `pos`, whether it already lives in the
/// world or is queued for spawning at the end of this batch.
fn gate_activation<'a>(
    pos: PortalPos,
    index: &PortalIndex,
    gates: &'a mut Query<&mut PortalGate>,
    spawning: &'a mut HashMap<PortalPos, ActivationState>,
) -> Option<&'a mut ActivationState> {
    if let Some(activation) = spawning.get_mut(&pos) {
        return Some(activation);
    }
    let entity = index.get(pos)?;
    gates
        .get_mut(entity)
        .ok()
        .map(|gate| &mut gate.into_inner().activation)
}

pub fn apply_portal_lifecycle(
    mut commands: Commands,
    config: Res<WaygateConfigHandle>,
    registry: Res<PortalRegistry>,
    mut index: ResMut<PortalIndex>,
    mut events: EventReader<PortalLifecycle>,
    mut gates: Query<&mut PortalGate>,
) {
    // Gates placed this batch are spawned once every event has been applied,
    // so later events in the same tick act on the pending state.
    let mut spawning: HashMap<PortalPos, ActivationState> = HashMap::new();

    for event in events.read() {
        debug!(target: "waygate::activation", pos = %event.pos(), ?event, "lifecycle.event");
        match *event {
            PortalLifecycle::Placed(placed) => {
                let size = if placed.size > 0.0 {
                    placed.size
                } else {
                    config.0.default_portal_size
                };
                registry.ensure(placed.pos, size, placed.facing);
                registry.set_enabled(placed.pos, placed.repaired);

                match gate_activation(placed.pos, &index, &mut gates, &mut spawning) {
                    Some(activation) => {
                        if !placed.repaired {
                            activation.mark_broken();
                        } else if activation.phase() == ActivationPhase::Broken {
                            *activation = ActivationState::repaired();
                        }
                    }
                    None => {
                        let activation = if placed.repaired {
                            ActivationState::repaired()
                        } else {
                            ActivationState::default()
                        };
                        spawning.insert(placed.pos, activation);
                    }
                }
            }
            PortalLifecycle::RepairStarted(PortalRepairStarted { pos }) => {
                let enabled = registry.get(pos).is_some_and(|record| record.enabled);
                match gate_activation(pos, &index, &mut gates, &mut spawning) {
                    Some(activation) => {
                        // A disabled record whose gate is not broken can only be
                        // recovered by restarting the repair.
                        if !enabled && activation.phase() != ActivationPhase::Repairing {
                            activation.mark_broken();
                        }
                        activation.repair();
                    }
                    None => debug!(target: "waygate::activation", %pos, "repair.skipped=no_gate"),
                }
            }
            PortalLifecycle::Broken(PortalBroken { pos }) => {
                if let Some(activation) = gate_activation(pos, &index, &mut gates, &mut spawning) {
                    activation.mark_broken();
                }
                registry.set_enabled(pos, false);
            }
            PortalLifecycle::Destroyed(PortalDestroyed { pos }) => {
                registry.remove(pos);
                spawning.remove(&pos);
                if let Some(entity) = index.remove(pos) {
                    commands.entity(entity).despawn();
                }
            }
        }
    }

    for (pos, activation) in spawning {
        let entity = commands.spawn(PortalGate::new(pos, activation)).id();
        index.insert(pos, entity);
    }
}

/// Start or stop every gate from its record's link state, then advance its timer.
pub fn drive_activation(
    config: Res<WaygateConfigHandle>,
    registry: Res<PortalRegistry>,
    mut gates: Query<&mut PortalGate>,
) {
    let dt = config.0.tick_seconds;
    let timings = config.0.timings();

    for mut gate in gates.iter_mut() {
        let (target, enabled) = registry
            .get(gate.pos)
            .map(|record| (record.target, record.enabled))
            .unwrap_or((None, false));

        if enabled && target.is_some() && target == gate.last_target {
            gate.activation.start();
        } else {
            gate.activation.stop();
        }
        gate.last_target = target;

        let before = gate.activation.phase();
        if let Some(phase) = gate.activation.tick(dt, timings) {
            debug!(
                target: "waygate::activation",
                pos = %gate.pos,
                from = ?before,
                to = ?phase,
                "activation.phase_changed"
            );
            if before == ActivationPhase::Repairing && phase == ActivationPhase::Deactivated {
                registry.set_enabled(gate.pos, true);
                info!(target: "waygate::activation", pos = %gate.pos, "portal.repaired");
            }
        }
    }
}
