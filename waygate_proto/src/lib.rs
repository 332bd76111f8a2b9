//! Wire contracts shared by the Waygate server, its clients and tooling.
//!
//! Everything in this crate is plain data: positions, facings, the projected
//! portal state a single recipient is allowed to see, and the message enums
//! exchanged over a connection. Encoding lives in [`codec`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod codec;

pub use codec::{
    decode_client, decode_server, encode_client, encode_server, encode_snapshot_json, read_frame,
    write_frame, CodecError, MAX_FRAME_LEN,
};

/// Identifier for a player as assigned by the host platform.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block coordinate of a portal plus the dimension it lives in.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct PortalPos {
    pub dimension: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl PortalPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self {
            dimension: 0,
            x,
            y,
            z,
        }
    }

    pub const fn in_dimension(mut self, dimension: i32) -> Self {
        self.dimension = dimension;
        self
    }
}

impl fmt::Display for PortalPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}@{}", self.x, self.y, self.z, self.dimension)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsePosError {
    #[error("expected `x,y,z` or `x,y,z@dimension`, got {0:?}")]
    Shape(String),
    #[error("invalid coordinate {0:?}")]
    Coordinate(String),
}

impl FromStr for PortalPos {
    type Err = ParsePosError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (coords, dimension) = match trimmed.split_once('@') {
            Some((coords, dim)) => (coords, Some(dim)),
            None => (trimmed, None),
        };
        let parts: Vec<&str> = coords.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(ParsePosError::Shape(input.to_string()));
        }
        let parse = |value: &str| {
            value
                .parse::<i32>()
                .map_err(|_| ParsePosError::Coordinate(value.to_string()))
        };
        let mut pos = PortalPos::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?);
        if let Some(dim) = dimension {
            pos.dimension = parse(dim.trim())?;
        }
        Ok(pos)
    }
}

/// Direction a portal gate faces.
///
/// Horizontal facings are numbered clockwise when seen from above, so the
/// difference between two indices is a number of clockwise quarter turns.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Facing {
    #[default]
    North,
    East,
    South,
    West,
    Up,
    Down,
}

impl Facing {
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(value: u8) -> Option<Self> {
        match value {
            0 => Some(Facing::North),
            1 => Some(Facing::East),
            2 => Some(Facing::South),
            3 => Some(Facing::West),
            4 => Some(Facing::Up),
            5 => Some(Facing::Down),
            _ => None,
        }
    }

    pub fn is_horizontal(self) -> bool {
        self.index() < 4
    }

    /// Clockwise quarter turns needed to rotate `self` onto `other`.
    ///
    /// Zero unless both facings are horizontal.
    pub fn quarter_turns_to(self, other: Facing) -> u8 {
        if self.is_horizontal() && other.is_horizontal() {
            (other.index() + 4 - self.index()) % 4
        } else {
            0
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown facing {0:?}")]
pub struct ParseFacingError(pub String);

impl FromStr for Facing {
    type Err = ParseFacingError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "n" | "north" | "0" => Ok(Facing::North),
            "e" | "east" | "1" => Ok(Facing::East),
            "s" | "south" | "2" => Ok(Facing::South),
            "w" | "west" | "3" => Ok(Facing::West),
            "u" | "up" | "4" => Ok(Facing::Up),
            "d" | "down" | "5" => Ok(Facing::Down),
            _ => Err(ParseFacingError(input.to_string())),
        }
    }
}

/// Cosmetic per-player preferences attached to a portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlayerPortalPrefs {
    pub pinned: bool,
    pub order: i32,
    pub note: String,
    pub icon: String,
    /// Packed RGBA.
    pub color: u32,
}

/// A portal as seen by one recipient.
///
/// Transit-relevant fields are identical for every recipient; `discovered`
/// and `prefs` only ever describe the recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalState {
    pub pos: PortalPos,
    pub name: String,
    pub enabled: bool,
    pub target: Option<PortalPos>,
    pub size: f32,
    pub facing: Facing,
    pub discovered: bool,
    pub prefs: Option<PlayerPortalPrefs>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SnapshotHeader {
    pub record_count: u32,
    pub hash: u64,
}

/// Complete projected portal list sent to a connecting client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PortalSnapshot {
    pub header: SnapshotHeader,
    pub records: Vec<PortalState>,
}

impl PortalSnapshot {
    pub fn new(mut records: Vec<PortalState>) -> Self {
        records.sort_by_key(|state| state.pos);
        let header = SnapshotHeader {
            record_count: records.len() as u32,
            hash: hash_records(&records),
        };
        Self { header, records }
    }

    pub fn verify(&self) -> bool {
        self.header.record_count as usize == self.records.len()
            && self.header.hash == hash_records(&self.records)
    }
}

/// Digest of a position-ordered record list: the first eight bytes, little
/// endian, of the BLAKE3 hash of its bincode encoding. Identical on every
/// platform and build.
pub fn hash_records(records: &[PortalState]) -> u64 {
    let encoded = bincode::serialize(records).unwrap_or_default();
    let digest = blake3::hash(&encoded);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Player-scoped edit submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmeticUpdate {
    pub pos: PortalPos,
    pub name: Option<String>,
    pub prefs: Option<PlayerPortalPrefs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    FullSnapshot(PortalSnapshot),
    RecordUpdate(PortalState),
    RecordRemoved(PortalPos),
    EntityArrived { entity: u64 },
    PlayerYawCorrection { quarter_turns: u8 },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::FullSnapshot(_) => "full_snapshot",
            ServerMessage::RecordUpdate(_) => "record_update",
            ServerMessage::RecordRemoved(_) => "record_removed",
            ServerMessage::EntityArrived { .. } => "entity_arrived",
            ServerMessage::PlayerYawCorrection { .. } => "yaw_correction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Must be the first frame on a connection.
    Hello { player: PlayerId },
    CosmeticUpdate(CosmeticUpdate),
    SelfTeleportRequest { target: PortalPos },
}
