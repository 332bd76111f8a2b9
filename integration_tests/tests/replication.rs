mod common;

use common::RecordingTransport;
use crossbeam_channel::unbounded;
use waygate_core::{
    project, run_tick, ClientMirror, PortalDestroyed, PortalLifecycle, PortalRecord,
    PortalRegistry, RegistryEvent, ServerReplicator,
};
use waygate_proto::{ClientMessage, CosmeticUpdate, Facing, PlayerId, PlayerPortalPrefs, PortalPos, ServerMessage};

const P1: PortalPos = PortalPos::new(0, 64, 0);
const P2: PortalPos = PortalPos::new(20, 64, 0);
const ALICE: PlayerId = PlayerId(1);
const BOB: PlayerId = PlayerId(2);

fn pump(
    replicator: &mut ServerReplicator<RecordingTransport>,
    events: &crossbeam_channel::Receiver<RegistryEvent>,
) {
    for event in events.try_iter() {
        replicator.on_registry_event(&event);
    }
}

fn linked_registry() -> PortalRegistry {
    let registry = PortalRegistry::new();
    registry.upsert(PortalRecord::new(P1, 4.0, Facing::North));
    registry.upsert(PortalRecord::new(P2, 4.0, Facing::South));
    assert!(registry.link(P1, P2));
    registry
}

#[test]
fn removing_a_linked_portal_updates_partner_then_removes() {
    let registry = linked_registry();
    let events = registry.subscribe();
    let transport = RecordingTransport::default();
    let (teleports, _teleport_rx) = unbounded();
    let mut replicator = ServerReplicator::new(registry.clone(), transport.clone(), teleports);
    replicator.connect(1, ALICE, false);
    transport.take();

    assert!(registry.remove(P2));
    pump(&mut replicator, &events);

    let sent = transport.take_for(1);
    assert_eq!(sent.len(), 2, "{sent:?}");
    match &sent[0] {
        ServerMessage::RecordUpdate(state) => {
            assert_eq!(state.pos, P1);
            assert_eq!(state.target, None);
        }
        other => panic!("expected update for P1, got {other:?}"),
    }
    assert_eq!(sent[1], ServerMessage::RecordRemoved(P2));

    assert!(!registry.remove(P2));
    pump(&mut replicator, &events);
    assert!(transport.take().is_empty());
}

#[test]
fn destroy_hook_replicates_through_the_app_registry() {
    let mut app = common::test_app();
    common::place(&mut app, P1, Facing::North, 4.0);
    common::place(&mut app, P2, Facing::South, 4.0);
    run_tick(&mut app);
    let registry = common::registry(&app);
    registry.link(P1, P2);

    let events = registry.subscribe();
    let transport = RecordingTransport::default();
    let (teleports, _teleport_rx) = unbounded();
    let mut replicator = ServerReplicator::new(registry.clone(), transport.clone(), teleports);
    replicator.connect(5, BOB, false);

    let mut mirror = ClientMirror::new();
    for message in transport.take_for(5) {
        mirror.apply(message);
    }
    assert_eq!(mirror.get(P1).and_then(|state| state.target), Some(P2));

    app.world
        .send_event(PortalLifecycle::Destroyed(PortalDestroyed { pos: P2 }));
    run_tick(&mut app);
    pump(&mut replicator, &events);
    for message in transport.take_for(5) {
        mirror.apply(message);
    }

    assert!(mirror.get(P2).is_none());
    assert_eq!(mirror.get(P1).and_then(|state| state.target), None);
}

#[test]
fn projection_keeps_cosmetics_private_and_transit_fields_shared() {
    let registry = linked_registry();
    let prefs = PlayerPortalPrefs {
        pinned: true,
        order: -1,
        note: "alice's note".to_string(),
        icon: "anchor".to_string(),
        color: 0x3366ff,
    };
    registry.discover(P1, ALICE);
    registry.apply_cosmetic(
        ALICE,
        &CosmeticUpdate {
            pos: P1,
            name: Some("Harbor".to_string()),
            prefs: Some(prefs.clone()),
        },
    );

    let record = registry.get(P1).expect("P1");
    let alice = project(&record, ALICE);
    let bob = project(&record, BOB);

    assert_eq!(alice.prefs, Some(prefs));
    assert_eq!(bob.prefs, None);
    assert!(alice.discovered);
    assert!(!bob.discovered);
    assert_eq!(
        (&alice.name, alice.enabled, alice.target, alice.size, alice.facing),
        (&bob.name, bob.enabled, bob.target, bob.size, bob.facing)
    );
}

#[test]
fn reconnect_receives_a_fresh_snapshot() {
    let registry = linked_registry();
    let events = registry.subscribe();
    let transport = RecordingTransport::default();
    let (teleports, _teleport_rx) = unbounded();
    let mut replicator = ServerReplicator::new(registry.clone(), transport.clone(), teleports);

    replicator.connect(1, ALICE, true);
    replicator.disconnect(1);
    transport.take();

    registry.unlink(P1);
    registry.upsert(PortalRecord::new(PortalPos::new(40, 64, 0), 4.0, Facing::West));
    pump(&mut replicator, &events);
    assert!(transport.take().is_empty());

    replicator.connect(2, ALICE, true);
    let sent = transport.take_for(2);
    let [ServerMessage::FullSnapshot(snapshot)] = sent.as_slice() else {
        panic!("expected a single snapshot, got {sent:?}");
    };
    assert!(snapshot.verify());
    assert_eq!(snapshot.header.record_count, 3);
    assert!(snapshot.records.iter().all(|state| state.target.is_none()));
}

#[test]
fn client_edits_flow_back_as_projected_updates() {
    let registry = linked_registry();
    let events = registry.subscribe();
    let transport = RecordingTransport::default();
    let (teleports, _teleport_rx) = unbounded();
    let mut replicator = ServerReplicator::new(registry.clone(), transport.clone(), teleports);
    replicator.connect(1, ALICE, true);
    replicator.connect(2, BOB, false);

    let mut alice_mirror = ClientMirror::new();
    let mut bob_mirror = ClientMirror::new();
    for (conn, message) in transport.take() {
        match conn {
            1 => alice_mirror.apply(message),
            _ => bob_mirror.apply(message),
        }
    }

    // Bob never discovered P2, so his rename is dropped.
    replicator.handle_client_message(
        2,
        ClientMessage::CosmeticUpdate(CosmeticUpdate {
            pos: P2,
            name: Some("Bob's".to_string()),
            prefs: None,
        }),
    );
    replicator.handle_client_message(
        1,
        ClientMessage::CosmeticUpdate(CosmeticUpdate {
            pos: P2,
            name: Some("Lighthouse".to_string()),
            prefs: Some(PlayerPortalPrefs {
                pinned: true,
                ..PlayerPortalPrefs::default()
            }),
        }),
    );
    pump(&mut replicator, &events);
    for (conn, message) in transport.take() {
        match conn {
            1 => alice_mirror.apply(message),
            _ => bob_mirror.apply(message),
        }
    }

    let alice_view = alice_mirror.get(P2).expect("alice sees P2");
    let bob_view = bob_mirror.get(P2).expect("bob sees P2");
    assert_eq!(alice_view.name, "Lighthouse");
    assert_eq!(bob_view.name, "Lighthouse");
    assert!(alice_view.prefs.as_ref().is_some_and(|prefs| prefs.pinned));
    assert_eq!(bob_view.prefs, None);
    assert_eq!(bob_mirror.visible(false).count(), 0);
}
