use bevy::prelude::*;
use tracing::info;

use crate::{components::PortalGate, config::WaygateConfigHandle, resources::SimulationTick};

#[derive(Resource, Default, Debug, Clone, PartialEq, Eq)]
pub struct TransitMetrics {
    pub transits_completed: u64,
    pub relocations_rejected: u64,
    pub desyncs_healed: u64,
    pub self_teleports: u64,
    pub self_teleports_refused: u64,
    pub gates_activated: u32,
}

/// Refresh gauge values and periodically log the counters.
pub fn collect_metrics(
    tick: Res<SimulationTick>,
    config: Res<WaygateConfigHandle>,
    gates: Query<&PortalGate>,
    mut metrics: ResMut<TransitMetrics>,
) {
    metrics.gates_activated = gates
        .iter()
        .filter(|gate| gate.activation.is_activated())
        .count() as u32;

    let interval = config.0.metrics_log_interval_ticks;
    if interval > 0 && tick.0 > 0 && tick.0 % interval == 0 {
        info!(
            target: "waygate::metrics",
            tick = tick.0,
            gates_activated = metrics.gates_activated,
            transits = metrics.transits_completed,
            rejected = metrics.relocations_rejected,
            desyncs = metrics.desyncs_healed,
            self_teleports = metrics.self_teleports,
            "metrics.snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bevy_ecs::system::RunSystemOnce;
    use waygate_proto::PortalPos;

    use super::*;
    use crate::{
        activation::{ActivationState, ActivationTimings},
        config::WaygateConfig,
    };

    #[test]
    fn gauge_counts_activated_gates() {
        let mut world = World::new();
        world.insert_resource(SimulationTick(5));
        world.insert_resource(WaygateConfigHandle::new(Arc::new(WaygateConfig::default())));
        world.insert_resource(TransitMetrics::default());

        let timings = ActivationTimings {
            repair: 1.0,
            activation: 1.0,
        };
        let mut active = ActivationState::repaired();
        active.start();
        active.tick(1.0, timings);
        world.spawn(PortalGate::new(PortalPos::new(0, 0, 0), active));
        world.spawn(PortalGate::new(PortalPos::new(1, 0, 0), ActivationState::repaired()));

        world.run_system_once(collect_metrics);
        assert_eq!(world.resource::<TransitMetrics>().gates_activated, 1);
    }
}
