use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::bail;
use color_eyre::Result;
use tracing::{info, warn};
use waygate_core::ClientMirror;
use waygate_proto::codec::encode_snapshot_json;
use waygate_proto::{ClientMessage, CosmeticUpdate, PlayerId, PortalPos, PortalSnapshot, ServerMessage};

mod render;
mod session;

use session::Session;

#[derive(Parser, Debug)]
#[command(author, version, about = "Waygate portal network inspector", long_about = None)]
struct Cli {
    /// Address of the portal server's client listener.
    #[arg(long, default_value = "127.0.0.1:42000")]
    endpoint: String,
    /// Player id to connect as.
    #[arg(long)]
    player: u64,
    /// List undiscovered portals too.
    #[arg(long)]
    all: bool,
    /// Ask the server to move this player's entity to a portal (`x,y,z[@dim]`).
    #[arg(long)]
    teleport: Option<PortalPos>,
    /// Rename a portal: `x,y,z[@dim]=New Name`.
    #[arg(long, value_parser = parse_assignment)]
    rename: Option<(PortalPos, String)>,
    /// Set this player's note on a portal: `x,y,z[@dim]=text`.
    #[arg(long, value_parser = parse_assignment)]
    note: Option<(PortalPos, String)>,
    /// Print the received snapshot as JSON instead of a table.
    #[arg(long)]
    json: bool,
    /// Keep the connection open and print every change, reconnecting on errors.
    #[arg(long)]
    watch: bool,
}

fn parse_assignment(input: &str) -> Result<(PortalPos, String), String> {
    let (pos, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected `x,y,z=value`, got {input:?}"))?;
    let pos = pos.parse::<PortalPos>().map_err(|err| err.to_string())?;
    Ok((pos, value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();

    let cli = Cli::parse();
    let player = PlayerId(cli.player);

    loop {
        match run_session(&cli, player).await {
            Ok(()) => break,
            Err(err) if cli.watch => {
                warn!("Connection error: {}", err);
                info!("Reconnecting in 2 seconds...");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

async fn run_session(cli: &Cli, player: PlayerId) -> Result<()> {
    info!("Connecting to {} as {}", cli.endpoint, player);
    let mut session = Session::open(&cli.endpoint, player).await?;
    let mut mirror = ClientMirror::new();

    let snapshot = match session.recv().await? {
        ServerMessage::FullSnapshot(snapshot) => snapshot,
        other => bail!("expected a full snapshot first, got {}", other.kind()),
    };
    mirror.apply(ServerMessage::FullSnapshot(snapshot));
    print_state(&mirror, cli)?;

    let requests = build_requests(cli, &mirror);
    let sent_any = !requests.is_empty();
    for request in &requests {
        session.send(request).await?;
        info!(?request, "request.sent");
    }

    if cli.watch {
        loop {
            let message = session.recv().await?;
            println!("{}", render::describe(&message));
            mirror.apply(message);
        }
    }

    if sent_any {
        // Echo whatever the server sends back for a moment.
        while let Ok(received) =
            tokio::time::timeout(Duration::from_millis(750), session.recv()).await
        {
            let message = received?;
            println!("{}", render::describe(&message));
            mirror.apply(message);
        }
    }
    Ok(())
}

fn build_requests(cli: &Cli, mirror: &ClientMirror) -> Vec<ClientMessage> {
    let mut requests = Vec::new();
    if let Some((pos, name)) = &cli.rename {
        requests.push(ClientMessage::CosmeticUpdate(CosmeticUpdate {
            pos: *pos,
            name: Some(name.clone()),
            prefs: None,
        }));
    }
    if let Some((pos, note)) = &cli.note {
        let mut prefs = mirror
            .get(*pos)
            .and_then(|state| state.prefs.clone())
            .unwrap_or_default();
        prefs.note = note.clone();
        requests.push(ClientMessage::CosmeticUpdate(CosmeticUpdate {
            pos: *pos,
            name: None,
            prefs: Some(prefs),
        }));
    }
    if let Some(target) = cli.teleport {
        requests.push(ClientMessage::SelfTeleportRequest { target });
    }
    requests
}

fn print_state(mirror: &ClientMirror, cli: &Cli) -> Result<()> {
    if cli.json {
        let snapshot = PortalSnapshot::new(mirror.visible(cli.all).cloned().collect());
        println!("{}", encode_snapshot_json(&snapshot)?);
    } else {
        for line in render::portal_table(mirror, cli.all) {
            println!("{line}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_splits_on_first_equals() {
        assert_eq!(
            parse_assignment("1,64,2=Sea = Gate"),
            Ok((PortalPos::new(1, 64, 2), "Sea = Gate".to_string()))
        );
        assert!(parse_assignment("1,64,2").is_err());
        assert!(parse_assignment("1,64=x").is_err());
    }

    #[test]
    fn note_request_keeps_existing_preferences() {
        let cli = Cli::parse_from([
            "waygate_inspector",
            "--player",
            "4",
            "--note",
            "0,64,0=spawn",
            "--teleport",
            "0,64,0",
        ]);
        let requests = build_requests(&cli, &ClientMirror::new());
        assert_eq!(requests.len(), 2);
        match &requests[0] {
            ClientMessage::CosmeticUpdate(update) => {
                assert_eq!(update.name, None);
                assert_eq!(update.prefs.as_ref().map(|p| p.note.as_str()), Some("spawn"));
            }
            other => panic!("unexpected request {other:?}"),
        }
        assert_eq!(
            requests[1],
            ClientMessage::SelfTeleportRequest {
                target: PortalPos::new(0, 64, 0)
            }
        );
    }
}
