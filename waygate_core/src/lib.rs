//! Core crate for the Waygate portal network.
//!
//! Holds the shared portal registry and link algorithm, the per-gate
//! activation state machine, the transit executor and the replication layer.
//! A headless Bevy [`App`] hosts the tick; [`run_tick`] advances it once.

pub mod activation;
pub mod components;
pub mod config;
pub mod gates;
pub mod metrics;
pub mod network;
pub mod record;
pub mod registry;
pub mod replication;
pub mod resources;
pub mod transit;

use std::sync::Arc;

use bevy::prelude::*;

pub use activation::{ActivationPhase, ActivationState, ActivationTimings};
pub use components::{
    Cooldowns, NetworkedPlayer, PortalGate, Traveler, TravelerBundle, TRANSIT_COOLDOWN,
};
pub use config::{load_config_from_env, ConfigError, WaygateConfig, WaygateConfigHandle};
pub use gates::{
    PortalBroken, PortalDestroyed, PortalLifecycle, PortalPlaced, PortalRepairStarted,
};
pub use metrics::TransitMetrics;
pub use record::PortalRecord;
pub use registry::{PartnerStatus, PortalRegistry, RegistryEvent};
pub use replication::{project, ClientMirror, ServerReplicator, Transport};
pub use resources::{
    Outbound, PortalIndex, ReplicationOutbox, SelfTeleportInbox, SelfTeleportRequest,
    SimulationTick,
};
pub use transit::{
    EntityMover, MovementHost, RelocationError, RelocationRequest, TransitCompleted,
};

/// Construct a Bevy [`App`] running the portal tick pipeline.
pub fn build_headless_app(config: Arc<WaygateConfig>) -> App {
    let mut app = App::new();

    app.insert_resource(WaygateConfigHandle::new(config))
        .insert_resource(PortalRegistry::new())
        .insert_resource(SimulationTick::default())
        .insert_resource(PortalIndex::default())
        .insert_resource(ReplicationOutbox::default())
        .insert_resource(SelfTeleportInbox::default())
        .insert_resource(MovementHost::default())
        .insert_resource(TransitMetrics::default())
        .add_event::<PortalLifecycle>()
        .add_event::<TransitCompleted>()
        .add_plugins(MinimalPlugins)
        .add_systems(
            Update,
            (
                gates::apply_portal_lifecycle,
                gates::drive_activation,
                transit::tick_cooldowns,
                transit::process_self_teleports,
                transit::run_transit,
                advance_tick,
                metrics::collect_metrics,
            )
                .chain(),
        );

    app
}

/// Execute a single portal tick.
///
/// Runs the chained systems configured in [`build_headless_app`]
/// (lifecycle → activation → cooldowns → self teleports → transit → tick
/// counter → metrics). Network dispatch happens off this thread.
pub fn run_tick(app: &mut App) {
    app.update();
}

fn advance_tick(mut tick: ResMut<SimulationTick>) {
    tick.0 += 1;
}
