use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bevy::math::Vec3;
use bevy::prelude::App;
use crossbeam_channel::{never, select, tick, unbounded, Receiver, Sender};
use tracing::{info, warn};

use waygate_core::network::start_portal_server;
use waygate_core::{
    build_headless_app, load_config_from_env, run_tick, NetworkedPlayer, PortalBroken,
    PortalDestroyed, PortalLifecycle, PortalPlaced, PortalRegistry, PortalRepairStarted,
    ReplicationOutbox, SelfTeleportInbox, ServerReplicator, SimulationTick, TravelerBundle,
    WaygateConfig,
};
use waygate_proto::{Facing, PlayerId, PortalPos};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (config, config_path) = load_config_from_env();
    let mut app = build_headless_app(Arc::clone(&config));

    let registry = app.world.resource::<PortalRegistry>().clone();
    let outbound = app.world.resource::<ReplicationOutbox>().receiver();
    let teleports = app.world.resource::<SelfTeleportInbox>().sender();

    if let Some(server) = start_portal_server(config.server_bind, Arc::clone(&config)) {
        let registry_events = registry.subscribe();
        let replicator = ServerReplicator::new(registry.clone(), server.transport, teleports);
        let events = server.events;
        thread::spawn(move || replicator.run(events, registry_events, outbound));
    }

    let command_rx = spawn_admin_listener(config.admin_bind);

    info!(
        target: "waygate::server",
        server_bind = %config.server_bind,
        admin_bind = %config.admin_bind,
        config = ?config_path,
        tick_seconds = config.tick_seconds,
        "waygate server ready"
    );

    let ticker = tick(Duration::from_secs_f32(config.tick_seconds));
    loop {
        select! {
            recv(ticker) -> _ => run_tick(&mut app),
            recv(command_rx) -> request => match request {
                Ok(AdminRequest { command, reply }) => {
                    let response = apply_command(&mut app, &config, command);
                    let _ = reply.send(response);
                }
                Err(_) => break,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Place {
        pos: PortalPos,
        facing: Facing,
        size: f32,
        repaired: bool,
    },
    Repair(PortalPos),
    Break(PortalPos),
    Destroy(PortalPos),
    Link(PortalPos, PortalPos),
    Unlink(PortalPos),
    Spawn {
        player: PlayerId,
        at: Vec3,
    },
    List,
}

struct AdminRequest {
    command: Command,
    reply: Sender<String>,
}

/// Line-based admin console. Each line is answered with a single line.
fn spawn_admin_listener(bind_addr: SocketAddr) -> Receiver<AdminRequest> {
    let listener = match TcpListener::bind(bind_addr) {
        Ok(listener) => listener,
        Err(err) => {
            warn!(
                target: "waygate::server",
                %bind_addr,
                error = %err,
                "admin.bind_failed -- console disabled"
            );
            return never();
        }
    };

    let (sender, receiver) = unbounded::<AdminRequest>();
    thread::spawn(move || {
        for incoming in listener.incoming() {
            match incoming {
                Ok(stream) => {
                    let sender = sender.clone();
                    thread::spawn(move || handle_admin_client(stream, sender));
                }
                Err(err) => {
                    warn!(target: "waygate::server", error = %err, "admin.accept_failed");
                    thread::sleep(Duration::from_millis(200));
                }
            }
        }
    });

    receiver
}

fn handle_admin_client(stream: TcpStream, sender: Sender<AdminRequest>) {
    let peer = stream.peer_addr().ok();
    info!(target: "waygate::server", ?peer, "admin.connected");
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!(target: "waygate::server", error = %err, "admin.clone_failed");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let response = match parse_command(trimmed) {
                    Some(command) => {
                        let (reply, response) = unbounded();
                        if sender.send(AdminRequest { command, reply }).is_err() {
                            break;
                        }
                        response.recv().unwrap_or_else(|_| "error: server stopping".to_string())
                    }
                    None => {
                        warn!(target: "waygate::server", input = trimmed, "admin.invalid_command");
                        format!("error: invalid command `{trimmed}`")
                    }
                };
                if writeln!(writer, "{response}").is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(target: "waygate::server", error = %err, "admin.read_failed");
                break;
            }
        }
    }
}

fn parse_command(input: &str) -> Option<Command> {
    let mut parts = input.split_whitespace();
    match parts.next()? {
        "place" => {
            let pos = parts.next()?.parse().ok()?;
            let facing = parts.next().unwrap_or("north").parse().ok()?;
            let size = parts.next().unwrap_or("0").parse().ok()?;
            let repaired = parts.next() != Some("broken");
            Some(Command::Place {
                pos,
                facing,
                size,
                repaired,
            })
        }
        "repair" => Some(Command::Repair(parts.next()?.parse().ok()?)),
        "break" => Some(Command::Break(parts.next()?.parse().ok()?)),
        "destroy" => Some(Command::Destroy(parts.next()?.parse().ok()?)),
        "link" => {
            let a = parts.next()?.parse().ok()?;
            let b = parts.next()?.parse().ok()?;
            Some(Command::Link(a, b))
        }
        "unlink" => Some(Command::Unlink(parts.next()?.parse().ok()?)),
        "spawn" => {
            let player = PlayerId(parts.next()?.parse().ok()?);
            let at = parse_vec3(parts.next()?)?;
            Some(Command::Spawn { player, at })
        }
        "list" => Some(Command::List),
        _ => None,
    }
}

fn parse_vec3(input: &str) -> Option<Vec3> {
    let mut coords = input.split(',').map(|part| part.trim().parse::<f32>());
    let x = coords.next()?.ok()?;
    let y = coords.next()?.ok()?;
    let z = coords.next()?.ok()?;
    if coords.next().is_some() {
        return None;
    }
    Some(Vec3::new(x, y, z))
}

fn apply_command(app: &mut App, config: &WaygateConfig, command: Command) -> String {
    let tick = app.world.resource::<SimulationTick>().0;
    info!(target: "waygate::server", tick, ?command, "admin.command");
    match command {
        Command::Place {
            pos,
            facing,
            size,
            repaired,
        } => {
            app.world.send_event(PortalLifecycle::Placed(PortalPlaced {
                pos,
                size,
                facing,
                repaired,
            }));
            format!("ok: placing {pos}")
        }
        Command::Repair(pos) => {
            app.world
                .send_event(PortalLifecycle::RepairStarted(PortalRepairStarted { pos }));
            format!("ok: repairing {pos}")
        }
        Command::Break(pos) => {
            app.world
                .send_event(PortalLifecycle::Broken(PortalBroken { pos }));
            format!("ok: breaking {pos}")
        }
        Command::Destroy(pos) => {
            app.world
                .send_event(PortalLifecycle::Destroyed(PortalDestroyed { pos }));
            format!("ok: destroying {pos}")
        }
        Command::Link(a, b) => {
            if app.world.resource::<PortalRegistry>().link(a, b) {
                format!("ok: linked {a} <-> {b}")
            } else {
                format!("error: cannot link {a} and {b}")
            }
        }
        Command::Unlink(pos) => {
            if app.world.resource::<PortalRegistry>().unlink(pos) {
                format!("ok: unlinked {pos}")
            } else {
                format!("ok: {pos} was not linked")
            }
        }
        Command::Spawn { player, at } => {
            let creative = config.is_creative(player);
            let entity = app
                .world
                .spawn((TravelerBundle::at(at), NetworkedPlayer { player, creative }))
                .id();
            format!("ok: spawned {player} as entity {}", entity.to_bits())
        }
        Command::List => {
            let records = app.world.resource::<PortalRegistry>().snapshot();
            let mut lines: Vec<String> = records
                .iter()
                .map(|record| {
                    let target = record
                        .target
                        .map(|target| target.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    format!(
                        "{} '{}' enabled={} target={} facing={:?} size={}",
                        record.pos, record.name, record.enabled, target, record.facing, record.size
                    )
                })
                .collect();
            lines.insert(0, format!("{} portals", records.len()));
            lines.join(" | ")
        }
    }
}
