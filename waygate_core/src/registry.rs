//! Shared portal registry and the link/unlink algorithm.
//!
//! A single guard serializes every mutation and enumeration of the record
//! map. Link cascades can touch three records at once, so per-record locking
//! would reintroduce lock ordering between the tick thread and the network
//! dispatch thread. Notifications are collected while the guard is held.
//! The subscriber list is locked before the record guard is released, so
//! subscribers observe changes in the order they were applied.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bevy::prelude::Resource;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use waygate_proto::{CosmeticUpdate, Facing, PlayerId, PortalPos};

use crate::record::{normalize_prefs, PortalRecord};

/// Change notification emitted after a registry mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Changed(PortalRecord),
    Removed(PortalPos),
}

/// Result of re-checking a portal's link before transit.
#[derive(Debug, Clone, PartialEq)]
pub enum PartnerStatus {
    /// No record at the queried position.
    Missing,
    Unlinked,
    /// The target position has no record, usually a removal racing the tick.
    TargetMissing,
    /// The target pointed elsewhere; the link has been torn down.
    Desynced,
    Linked {
        source: PortalRecord,
        target: PortalRecord,
    },
}

#[derive(Default)]
struct RegistryInner {
    records: Mutex<HashMap<PortalPos, PortalRecord>>,
    subscribers: Mutex<Vec<Sender<RegistryEvent>>>,
}

/// Cloneable handle to the process-wide portal registry.
#[derive(Resource, Clone, Default)]
pub struct PortalRegistry {
    inner: Arc<RegistryInner>,
}

type Records = HashMap<PortalPos, PortalRecord>;

impl PortalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer. Every later notification is delivered to it.
    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        let (sender, receiver) = unbounded();
        self.inner.subscribers.lock().push(sender);
        receiver
    }

    pub fn get(&self, pos: PortalPos) -> Option<PortalRecord> {
        self.inner.records.lock().get(&pos).cloned()
    }

    pub fn contains(&self, pos: PortalPos) -> bool {
        self.inner.records.lock().contains_key(&pos)
    }

    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every record, ordered by position.
    pub fn snapshot(&self) -> Vec<PortalRecord> {
        self.snapshot_where(|_| true)
    }

    pub fn snapshot_where<F>(&self, predicate: F) -> Vec<PortalRecord>
    where
        F: Fn(&PortalRecord) -> bool,
    {
        let mut records: Vec<PortalRecord> = {
            let guard = self.inner.records.lock();
            guard.values().filter(|r| predicate(r)).cloned().collect()
        };
        records.sort_unstable_by_key(|record| record.pos);
        records
    }

    /// Insert or replace a record verbatim, including its link target.
    ///
    /// Intended for host loads; link invariants are maintained by
    /// [`link`](Self::link), [`unlink`](Self::unlink) and [`remove`](Self::remove).
    pub fn upsert(&self, record: PortalRecord) {
        let mut guard = self.inner.records.lock();
        guard.insert(record.pos, record.clone());
        self.emit(guard, vec![RegistryEvent::Changed(record)]);
    }

    /// Create the record for a freshly initialized world object, or refresh
    /// the geometry of an existing one.
    pub fn ensure(&self, pos: PortalPos, size: f32, facing: Facing) -> PortalRecord {
        let mut guard = self.inner.records.lock();
        let (record, changed) = match guard.get_mut(&pos) {
            Some(existing) => {
                let changed = existing.size != size || existing.facing != facing;
                existing.size = size;
                existing.facing = facing;
                (existing.clone(), changed)
            }
            None => {
                let record = PortalRecord::new(pos, size, facing);
                guard.insert(pos, record.clone());
                info!(target: "waygate::registry", %pos, "portal.created");
                (record, true)
            }
        };
        if changed {
            self.emit(guard, vec![RegistryEvent::Changed(record.clone())]);
        }
        record
    }

    /// Remove a record and every link pointing at it.
    ///
    /// Returns `false` without notifying anyone when nothing was stored at `pos`.
    pub fn remove(&self, pos: PortalPos) -> bool {
        let mut guard = self.inner.records.lock();
        if !guard.contains_key(&pos) {
            return false;
        }
        let mut touched = BTreeSet::new();
        unlink_cascade(&mut guard, pos, &mut touched);
        let pointing: Vec<PortalPos> = guard
            .values()
            .filter(|record| record.target == Some(pos))
            .map(|record| record.pos)
            .collect();
        for other in pointing {
            unlink_cascade(&mut guard, other, &mut touched);
        }
        guard.remove(&pos);
        touched.remove(&pos);

        let mut events = changed_events(&guard, &touched);
        events.push(RegistryEvent::Removed(pos));
        self.emit(guard, events);
        info!(target: "waygate::registry", %pos, "portal.removed");
        true
    }

    /// Re-announce a record whose nested data was mutated elsewhere.
    pub fn mark_dirty(&self, pos: PortalPos) -> bool {
        let guard = self.inner.records.lock();
        let Some(record) = guard.get(&pos).cloned() else {
            return false;
        };
        self.emit(guard, vec![RegistryEvent::Changed(record)]);
        true
    }

    /// Apply an edit to a record's non-link fields.
    ///
    /// Position and target are restored after `edit` runs, so link state
    /// only ever changes through the link operations.
    pub fn update<F>(&self, pos: PortalPos, edit: F) -> bool
    where
        F: FnOnce(&mut PortalRecord),
    {
        let mut guard = self.inner.records.lock();
        let Some(record) = guard.get_mut(&pos) else {
            return false;
        };
        let target = record.target;
        edit(record);
        record.pos = pos;
        record.target = target;
        let record = record.clone();
        self.emit(guard, vec![RegistryEvent::Changed(record)]);
        true
    }

    pub fn set_enabled(&self, pos: PortalPos, enabled: bool) -> bool {
        let mut guard = self.inner.records.lock();
        let record = match guard.get_mut(&pos) {
            Some(record) if record.enabled != enabled => {
                record.enabled = enabled;
                record.clone()
            }
            _ => return false,
        };
        self.emit(guard, vec![RegistryEvent::Changed(record)]);
        true
    }

    /// Record that `player` has found this portal. Returns `true` on first discovery.
    pub fn discover(&self, pos: PortalPos, player: PlayerId) -> bool {
        let mut guard = self.inner.records.lock();
        let Some(record) = guard.get_mut(&pos) else {
            return false;
        };
        if !record.activated_by.insert(player) {
            return false;
        }
        let record = record.clone();
        self.emit(guard, vec![RegistryEvent::Changed(record)]);
        true
    }

    /// Apply a client's cosmetic edit. Authorization is the caller's job.
    ///
    /// Names and preference text are sanitized and capped before storage.
    pub fn apply_cosmetic(&self, player: PlayerId, update: &CosmeticUpdate) -> bool {
        self.update(update.pos, |record| {
            if let Some(name) = update.name.as_deref() {
                record.set_name(name);
            }
            if let Some(prefs) = &update.prefs {
                record.per_player.insert(player, normalize_prefs(prefs));
            }
        })
    }

    /// Pair `a` with `b`, first tearing down whatever either side was linked to.
    pub fn link(&self, a: PortalPos, b: PortalPos) -> bool {
        if a == b {
            warn!(target: "waygate::registry", pos = %a, "link.rejected=self_link");
            return false;
        }
        let mut guard = self.inner.records.lock();
        if !guard.contains_key(&a) || !guard.contains_key(&b) {
            debug!(target: "waygate::registry", %a, %b, "link.skipped=missing_record");
            return false;
        }
        let mut touched = BTreeSet::new();
        unlink_cascade(&mut guard, a, &mut touched);
        unlink_cascade(&mut guard, b, &mut touched);
        if let Some(record) = guard.get_mut(&a) {
            record.target = Some(b);
        }
        if let Some(record) = guard.get_mut(&b) {
            record.target = Some(a);
        }
        touched.insert(a);
        touched.insert(b);
        let events = changed_events(&guard, &touched);
        self.emit(guard, events);
        info!(target: "waygate::registry", %a, %b, "link.created");
        true
    }

    /// Tear down the link of `pos`. Returns `true` if any record changed.
    pub fn unlink(&self, pos: PortalPos) -> bool {
        let mut guard = self.inner.records.lock();
        let mut touched = BTreeSet::new();
        unlink_cascade(&mut guard, pos, &mut touched);
        if touched.is_empty() {
            return false;
        }
        let events = changed_events(&guard, &touched);
        self.emit(guard, events);
        info!(target: "waygate::registry", %pos, "link.removed");
        true
    }

    /// Live symmetry check used before every transit.
    ///
    /// A target that points elsewhere is treated as corruption: the link is
    /// torn down with the usual cascade and [`PartnerStatus::Desynced`] is
    /// returned so the caller aborts.
    pub fn resolve_partner(&self, pos: PortalPos) -> PartnerStatus {
        let mut guard = self.inner.records.lock();
        let Some(source) = guard.get(&pos) else {
            return PartnerStatus::Missing;
        };
        let Some(target_pos) = source.target else {
            return PartnerStatus::Unlinked;
        };
        let Some(target) = guard.get(&target_pos) else {
            return PartnerStatus::TargetMissing;
        };
        if target.target == Some(pos) {
            return PartnerStatus::Linked {
                source: source.clone(),
                target: target.clone(),
            };
        }
        warn!(
            target: "waygate::registry",
            %pos,
            %target_pos,
            partner_target = ?target.target,
            "link.desync_healed"
        );
        let mut touched = BTreeSet::new();
        unlink_cascade(&mut guard, pos, &mut touched);
        let events = changed_events(&guard, &touched);
        self.emit(guard, events);
        PartnerStatus::Desynced
    }

    /// Fan `events` out to subscribers.
    ///
    /// Lock order is records then subscribers: the subscriber list is taken
    /// before `records` is released and held until every event is queued.
    fn emit(&self, records: MutexGuard<'_, Records>, events: Vec<RegistryEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.inner.subscribers.lock();
        drop(records);
        subscribers.retain(|subscriber| {
            events
                .iter()
                .all(|event| subscriber.send(event.clone()).is_ok())
        });
    }
}

/// Clear the link of `pos`, its partner, and, when the partner pointed at
/// a third record, that record's link as well.
fn unlink_cascade(records: &mut Records, pos: PortalPos, touched: &mut BTreeSet<PortalPos>) {
    let Some(target_pos) = records.get(&pos).and_then(|record| record.target) else {
        return;
    };

    let partner_target = records.get(&target_pos).and_then(|target| target.target);
    if let Some(third) = partner_target {
        if third != pos {
            warn!(
                target: "waygate::registry",
                %pos,
                %target_pos,
                %third,
                "unlink.cascade=desynced_partner"
            );
            if let Some(record) = records.get_mut(&third) {
                if record.target.take().is_some() {
                    touched.insert(third);
                }
            }
        }
        if let Some(target) = records.get_mut(&target_pos) {
            target.target = None;
            touched.insert(target_pos);
        }
    }

    if let Some(record) = records.get_mut(&pos) {
        record.target = None;
        touched.insert(pos);
    }
}

fn changed_events(records: &Records, touched: &BTreeSet<PortalPos>) -> Vec<RegistryEvent> {
    touched
        .iter()
        .filter_map(|pos| records.get(pos).cloned())
        .map(RegistryEvent::Changed)
        .collect()
}
