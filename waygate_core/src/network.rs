use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use waygate_proto::{
    codec::{decode_client, read_frame, write_frame},
    ClientMessage, PlayerId,
};

use crate::{config::WaygateConfig, replication::Transport};

pub type ConnectionId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// Handshake completed; the connection is ready for its snapshot.
    Connected {
        conn: ConnectionId,
        player: PlayerId,
        creative: bool,
    },
    Message {
        conn: ConnectionId,
        message: ClientMessage,
    },
    Disconnected(ConnectionId),
}

/// Write halves of every open connection.
#[derive(Clone, Default)]
pub struct TcpTransport {
    streams: Arc<Mutex<HashMap<ConnectionId, TcpStream>>>,
}

impl TcpTransport {
    fn register(&self, conn: ConnectionId, stream: TcpStream) {
        self.streams.lock().insert(conn, stream);
    }

    fn forget(&self, conn: ConnectionId) {
        if let Some(stream) = self.streams.lock().remove(&conn) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.streams.lock().len()
    }
}

impl Transport for TcpTransport {
    fn send(&self, conn: ConnectionId, payload: &[u8]) -> bool {
        let mut streams = self.streams.lock();
        let Some(stream) = streams.get_mut(&conn) else {
            return false;
        };
        match write_frame(stream, payload) {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "waygate::network", conn, error = %err, "client.dropped=write_failed");
                if let Some(stream) = streams.remove(&conn) {
                    let _ = stream.shutdown(Shutdown::Both);
                }
                false
            }
        }
    }
}

pub struct PortalServer {
    pub transport: TcpTransport,
    pub events: Receiver<NetworkEvent>,
    pub local_addr: SocketAddr,
}

/// Bind the client listener and start accepting connections.
///
/// Returns `None` after logging when the address cannot be bound; the
/// simulation keeps running without replication in that case.
pub fn start_portal_server(bind_addr: SocketAddr, config: Arc<WaygateConfig>) -> Option<PortalServer> {
    let listener = match TcpListener::bind(bind_addr) {
        Ok(listener) => listener,
        Err(err) => {
            warn!(
                target: "waygate::network",
                %bind_addr,
                error = %err,
                "listener.bind_failed -- replication disabled"
            );
            return None;
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => {
            warn!(target: "waygate::network", error = %err, "listener.addr_unavailable");
            return None;
        }
    };

    let transport = TcpTransport::default();
    let (sender, events) = unbounded();
    let accept_transport = transport.clone();

    thread::spawn(move || {
        let mut next_conn: ConnectionId = 1;
        for incoming in listener.incoming() {
            match incoming {
                Ok(stream) => {
                    let conn = next_conn;
                    next_conn += 1;
                    let transport = accept_transport.clone();
                    let sender = sender.clone();
                    let config = Arc::clone(&config);
                    thread::spawn(move || {
                        if let Err(err) = serve_connection(conn, stream, &transport, &sender, &config) {
                            debug!(target: "waygate::network", conn, error = %err, "client.closed_with_error");
                        }
                        transport.forget(conn);
                        let _ = sender.send(NetworkEvent::Disconnected(conn));
                    });
                }
                Err(err) => {
                    warn!(target: "waygate::network", error = %err, "listener.accept_failed");
                    thread::sleep(Duration::from_millis(200));
                }
            }
        }
    });

    info!(target: "waygate::network", %local_addr, "listener.ready");
    Some(PortalServer {
        transport,
        events,
        local_addr,
    })
}

fn serve_connection(
    conn: ConnectionId,
    mut stream: TcpStream,
    transport: &TcpTransport,
    events: &Sender<NetworkEvent>,
    config: &WaygateConfig,
) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    if let Err(err) = stream.set_nodelay(true) {
        warn!(target: "waygate::network", %peer, error = %err, "client.nodelay_failed");
    }

    let player = match read_client(&mut stream)? {
        Some(ClientMessage::Hello { player }) => player,
        Some(other) => {
            warn!(target: "waygate::network", %peer, message = ?other, "handshake.rejected=expected_hello");
            return Ok(());
        }
        None => return Ok(()),
    };
    let creative = config.is_creative(player);
    info!(target: "waygate::network", conn, %peer, %player, creative, "client.connected");

    transport.register(conn, writer_for(&stream, config.client_write_timeout())?);
    if events
        .send(NetworkEvent::Connected {
            conn,
            player,
            creative,
        })
        .is_err()
    {
        return Ok(());
    }

    while let Some(message) = read_client(&mut stream)? {
        if events.send(NetworkEvent::Message { conn, message }).is_err() {
            break;
        }
    }
    info!(target: "waygate::network", conn, %player, "client.disconnected");
    Ok(())
}

/// Write half for the transport. Sends run under the transport lock, so a
/// client that stops reading must fail fast instead of stalling every send.
fn writer_for(stream: &TcpStream, timeout: Duration) -> io::Result<TcpStream> {
    let writer = stream.try_clone()?;
    writer.set_write_timeout(Some(timeout))?;
    Ok(writer)
}

/// Next decoded client frame; `None` on clean EOF. Undecodable frames are
/// skipped.
fn read_client(stream: &mut TcpStream) -> io::Result<Option<ClientMessage>> {
    loop {
        let frame = match read_frame(stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        };
        match decode_client(&frame) {
            Ok(message) => return Ok(Some(message)),
            Err(err) => {
                warn!(target: "waygate::network", error = %err, "frame.dropped=decode_failed");
            }
        }
    }
}
