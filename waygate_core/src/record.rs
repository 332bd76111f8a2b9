use std::collections::{BTreeMap, BTreeSet};

use waygate_proto::{Facing, PlayerId, PlayerPortalPrefs, PortalPos};

/// Name shown for portals that were never named or were given an unusable name.
pub const PLACEHOLDER_NAME: &str = "Unnamed Portal";

/// Longest display name kept, in characters.
pub const MAX_NAME_CHARS: usize = 64;

/// Longest per-player note kept, in characters.
pub const MAX_NOTE_CHARS: usize = 256;

/// Longest per-player icon key kept, in characters.
pub const MAX_ICON_CHARS: usize = 64;

/// Authoritative server-side record for one portal.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalRecord {
    pub pos: PortalPos,
    pub name: String,
    /// Set once the physical portal has been repaired. Independent of linking.
    pub enabled: bool,
    pub target: Option<PortalPos>,
    /// Gate diameter in blocks.
    pub size: f32,
    pub facing: Facing,
    pub activated_by: BTreeSet<PlayerId>,
    pub per_player: BTreeMap<PlayerId, PlayerPortalPrefs>,
}

impl PortalRecord {
    pub fn new(pos: PortalPos, size: f32, facing: Facing) -> Self {
        Self {
            pos,
            name: PLACEHOLDER_NAME.to_string(),
            enabled: false,
            target: None,
            size,
            facing,
            activated_by: BTreeSet::new(),
            per_player: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.set_name(name);
        self
    }

    pub fn set_name(&mut self, raw: &str) {
        self.name = normalize_name(raw);
    }

    pub fn is_linked(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_discovered_by(&self, player: PlayerId) -> bool {
        self.activated_by.contains(&player)
    }

    /// Non-creative players only see portals they have discovered.
    pub fn is_visible_to(&self, player: PlayerId, creative: bool) -> bool {
        creative || self.is_discovered_by(player)
    }

    pub fn prefs_for(&self, player: PlayerId) -> Option<&PlayerPortalPrefs> {
        self.per_player.get(&player)
    }
}

/// Strip delimiter/control characters and fall back to the placeholder.
pub fn normalize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '{' | '}' | '<' | '>'))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return PLACEHOLDER_NAME.to_string();
    }
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}

/// Client-supplied preferences with their free-text fields cleaned and capped.
pub fn normalize_prefs(prefs: &PlayerPortalPrefs) -> PlayerPortalPrefs {
    PlayerPortalPrefs {
        note: clean_text(&prefs.note, MAX_NOTE_CHARS),
        icon: clean_text(&prefs.icon, MAX_ICON_CHARS),
        ..prefs.clone()
    }
}

fn clean_text(raw: &str, max_chars: usize) -> String {
    raw.chars()
        .filter(|c| !c.is_control())
        .take(max_chars)
        .collect()
}
