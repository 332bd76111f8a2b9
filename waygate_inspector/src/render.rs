use waygate_core::ClientMirror;
use waygate_proto::{PortalState, ServerMessage};

pub fn portal_line(state: &PortalState) -> String {
    let target = state
        .target
        .map(|target| target.to_string())
        .unwrap_or_else(|| "unlinked".to_string());
    let mut line = format!(
        "{:<20} {:<24} {:<8} -> {:<20} {:?} size {}",
        state.pos.to_string(),
        state.name,
        if state.enabled { "enabled" } else { "broken" },
        target,
        state.facing,
        state.size
    );
    if let Some(prefs) = &state.prefs {
        if prefs.pinned {
            line.push_str(" [pinned]");
        }
        if !prefs.note.is_empty() {
            line.push_str(&format!(" note: {}", prefs.note));
        }
    }
    line
}

pub fn portal_table(mirror: &ClientMirror, show_all: bool) -> Vec<String> {
    let mut states: Vec<&PortalState> = mirror.visible(show_all).collect();
    states.sort_by_key(|state| {
        let prefs = state.prefs.as_ref();
        (
            !prefs.map(|p| p.pinned).unwrap_or(false),
            prefs.map(|p| p.order).unwrap_or(0),
            state.pos,
        )
    });

    let mut lines = vec![format!(
        "{} of {} portals visible{}",
        states.len(),
        mirror.len(),
        if mirror.snapshot_verified() {
            ""
        } else {
            " (snapshot hash mismatch)"
        }
    )];
    lines.extend(states.into_iter().map(portal_line));
    lines
}

pub fn describe(message: &ServerMessage) -> String {
    match message {
        ServerMessage::FullSnapshot(snapshot) => {
            format!("snapshot: {} records", snapshot.header.record_count)
        }
        ServerMessage::RecordUpdate(state) => format!("update: {}", portal_line(state)),
        ServerMessage::RecordRemoved(pos) => format!("removed: {pos}"),
        ServerMessage::EntityArrived { entity } => format!("arrival: entity {entity}"),
        ServerMessage::PlayerYawCorrection { quarter_turns } => {
            format!("view turned {quarter_turns} quarter turn(s)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waygate_proto::{Facing, PlayerPortalPrefs, PortalPos, PortalSnapshot};

    fn state(x: i32, discovered: bool, pinned: bool) -> PortalState {
        PortalState {
            pos: PortalPos::new(x, 64, 0),
            name: format!("Gate {x}"),
            enabled: true,
            target: None,
            size: 5.0,
            facing: Facing::North,
            discovered,
            prefs: pinned.then(|| PlayerPortalPrefs {
                pinned: true,
                note: "home".to_string(),
                ..PlayerPortalPrefs::default()
            }),
        }
    }

    #[test]
    fn table_puts_pinned_portals_first_and_hides_undiscovered() {
        let mut mirror = ClientMirror::new();
        mirror.apply(ServerMessage::FullSnapshot(PortalSnapshot::new(vec![
            state(1, true, false),
            state(2, false, false),
            state(3, true, true),
        ])));

        let lines = portal_table(&mirror, false);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("2 of 3 portals visible"));
        assert!(lines[1].contains("Gate 3"));
        assert!(lines[1].contains("[pinned] note: home"));
        assert!(lines[2].contains("Gate 1"));

        assert_eq!(portal_table(&mirror, true).len(), 4);
    }

    #[test]
    fn describes_notices() {
        assert_eq!(
            describe(&ServerMessage::RecordRemoved(PortalPos::new(1, 2, 3))),
            "removed: 1,2,3@0"
        );
        assert_eq!(
            describe(&ServerMessage::PlayerYawCorrection { quarter_turns: 2 }),
            "view turned 2 quarter turn(s)"
        );
    }
}
