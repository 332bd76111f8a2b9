#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

use bevy::prelude::*;
use parking_lot::Mutex;
use waygate_core::network::ConnectionId;
use waygate_core::{
    build_headless_app, run_tick, ActivationPhase, NetworkedPlayer, PortalGate, PortalIndex,
    PortalLifecycle, PortalPlaced, PortalRegistry, Transport, TravelerBundle, WaygateConfig,
};
use waygate_proto::codec::decode_server;
use waygate_proto::{Facing, PlayerId, PortalPos, ServerMessage};

static INIT: Once = Once::new();

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("test_waygate_config.json")
}

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = fixture_path();
        debug_assert!(
            config_path.exists(),
            "missing test waygate config at {}",
            config_path.display()
        );
        std::env::set_var("WAYGATE_CONFIG_PATH", &config_path);
    });
}

pub fn test_config() -> Arc<WaygateConfig> {
    Arc::new(WaygateConfig::from_file(&fixture_path()).expect("test config loads"))
}

pub fn test_app() -> App {
    build_headless_app(test_config())
}

pub fn place(app: &mut App, pos: PortalPos, facing: Facing, size: f32) {
    app.world.send_event(PortalLifecycle::Placed(PortalPlaced {
        pos,
        size,
        facing,
        repaired: true,
    }));
}

pub fn registry(app: &App) -> PortalRegistry {
    app.world.resource::<PortalRegistry>().clone()
}

pub fn phase(app: &App, pos: PortalPos) -> ActivationPhase {
    let entity = app
        .world
        .resource::<PortalIndex>()
        .get(pos)
        .expect("gate indexed");
    app.world
        .get::<PortalGate>(entity)
        .expect("gate component")
        .activation
        .phase()
}

/// Place, link and tick a pair until both gates are activated.
pub fn activated_pair(
    app: &mut App,
    a: (PortalPos, Facing, f32),
    b: (PortalPos, Facing, f32),
) {
    place(app, a.0, a.1, a.2);
    place(app, b.0, b.1, b.2);
    run_tick(app);
    assert!(registry(app).link(a.0, b.0));
    for _ in 0..8 {
        run_tick(app);
        if phase(app, a.0) == ActivationPhase::Activated
            && phase(app, b.0) == ActivationPhase::Activated
        {
            return;
        }
    }
    panic!("pair never activated");
}

pub fn spawn_player(app: &mut App, player: PlayerId, at: Vec3) -> Entity {
    app.world
        .spawn((
            TravelerBundle::at(at),
            NetworkedPlayer {
                player,
                creative: false,
            },
        ))
        .id()
}

/// Transport that decodes and keeps every frame it is handed.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<(ConnectionId, ServerMessage)>>>,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<(ConnectionId, ServerMessage)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn take_for(&self, conn: ConnectionId) -> Vec<ServerMessage> {
        self.take()
            .into_iter()
            .filter(|(to, _)| *to == conn)
            .map(|(_, message)| message)
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, conn: ConnectionId, payload: &[u8]) -> bool {
        let message = decode_server(payload).expect("server frame decodes");
        self.sent.lock().push((conn, message));
        true
    }
}
