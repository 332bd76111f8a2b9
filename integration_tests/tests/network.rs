mod common;

use std::io::ErrorKind;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::unbounded;
use waygate_core::network::start_portal_server;
use waygate_core::{PortalRecord, PortalRegistry, ServerReplicator};
use waygate_proto::codec::{decode_server, encode_client, read_frame, write_frame};
use waygate_proto::{ClientMessage, CosmeticUpdate, Facing, PlayerId, PortalPos, ServerMessage};

const GATE: PortalPos = PortalPos::new(3, 70, -2);

fn send(stream: &mut TcpStream, message: &ClientMessage) -> Result<()> {
    write_frame(stream, &encode_client(message)?)?;
    Ok(())
}

fn recv(stream: &mut TcpStream) -> Result<ServerMessage> {
    match read_frame(stream)? {
        Some(frame) => Ok(decode_server(&frame)?),
        None => bail!("server closed the connection"),
    }
}

fn connect(addr: std::net::SocketAddr, player: PlayerId) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).context("connect")?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    send(&mut stream, &ClientMessage::Hello { player })?;
    Ok(stream)
}

#[test]
fn tcp_client_gets_snapshot_and_live_updates() -> Result<()> {
    let config = common::test_config();
    let registry = PortalRegistry::new();
    registry.upsert(PortalRecord::new(GATE, 4.0, Facing::East).with_name("Quarry"));

    let server = start_portal_server(config.server_bind, config.clone()).context("server binds")?;
    let addr = server.local_addr;
    let registry_events = registry.subscribe();
    let (teleports, teleport_rx) = unbounded();
    let (_outbox_tx, outbox_rx) = unbounded();
    let replicator = ServerReplicator::new(registry.clone(), server.transport, teleports);
    let events = server.events;
    thread::spawn(move || replicator.run(events, registry_events, outbox_rx));

    // Player 99 is creative in the test fixture.
    let mut stream = connect(addr, PlayerId(99))?;
    let ServerMessage::FullSnapshot(snapshot) = recv(&mut stream)? else {
        bail!("first frame was not a snapshot");
    };
    assert!(snapshot.verify());
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.records[0].name, "Quarry");

    send(
        &mut stream,
        &ClientMessage::CosmeticUpdate(CosmeticUpdate {
            pos: GATE,
            name: Some("Old Quarry".to_string()),
            prefs: None,
        }),
    )?;
    let ServerMessage::RecordUpdate(state) = recv(&mut stream)? else {
        bail!("expected a record update");
    };
    assert_eq!(state.name, "Old Quarry");
    assert_eq!(registry.get(GATE).context("record")?.name, "Old Quarry");

    send(&mut stream, &ClientMessage::SelfTeleportRequest { target: GATE })?;
    let request = teleport_rx
        .recv_timeout(Duration::from_secs(5))
        .context("teleport request forwarded")?;
    assert_eq!(request.player, PlayerId(99));
    assert_eq!(request.target, GATE);

    registry.remove(GATE);
    assert_eq!(recv(&mut stream)?, ServerMessage::RecordRemoved(GATE));
    Ok(())
}

#[test]
fn connection_without_hello_is_closed() -> Result<()> {
    let config = common::test_config();
    let server = start_portal_server(config.server_bind, config.clone()).context("server binds")?;

    let mut stream = TcpStream::connect(server.local_addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    send(&mut stream, &ClientMessage::SelfTeleportRequest { target: GATE })?;

    match read_frame(&mut stream) {
        Ok(None) => {}
        Ok(Some(frame)) => bail!("unexpected frame of {} bytes", frame.len()),
        Err(err) => {
            let reset = matches!(
                &err,
                waygate_proto::codec::CodecError::Io(io)
                    if matches!(io.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted)
            );
            assert!(reset, "unexpected error {err}");
        }
    }
    Ok(())
}
