use std::collections::HashMap;

use bevy::{math::Vec3, prelude::*};
use waygate_proto::{PlayerId, PortalPos};

use crate::activation::ActivationState;

/// Cooldown key set on an entity after it passes through a portal.
pub const TRANSIT_COOLDOWN: &str = "waygate:transit";

/// World object backing a portal record.
#[derive(Component, Debug, Clone)]
pub struct PortalGate {
    pub pos: PortalPos,
    pub activation: ActivationState,
    /// Target observed on the previous tick; activation only starts once the
    /// target has been stable for a full tick.
    pub last_target: Option<PortalPos>,
}

impl PortalGate {
    pub fn new(pos: PortalPos, activation: ActivationState) -> Self {
        Self {
            pos,
            activation,
            last_target: None,
        }
    }
}

/// Any entity that can be carried through a portal.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Traveler {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Heading in radians, increasing clockwise seen from above.
    pub yaw: f32,
}

impl Traveler {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            yaw: 0.0,
        }
    }
}

/// Marks a traveler controlled by a connected player.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkedPlayer {
    pub player: PlayerId,
    pub creative: bool,
}

/// Named per-entity countdown timers, in seconds.
#[derive(Component, Debug, Clone, Default)]
pub struct Cooldowns {
    timers: HashMap<&'static str, f32>,
}

impl Cooldowns {
    pub fn set(&mut self, name: &'static str, seconds: f32) {
        if seconds > 0.0 {
            self.timers.insert(name, seconds);
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.remaining(name) > 0.0
    }

    pub fn remaining(&self, name: &str) -> f32 {
        self.timers.get(name).copied().unwrap_or(0.0)
    }

    pub fn tick(&mut self, dt: f32) {
        self.timers.retain(|_, remaining| {
            *remaining -= dt;
            *remaining > 0.0
        });
    }
}

#[derive(Bundle, Debug, Clone)]
pub struct TravelerBundle {
    pub traveler: Traveler,
    pub cooldowns: Cooldowns,
}

impl TravelerBundle {
    pub fn at(position: Vec3) -> Self {
        Self {
            traveler: Traveler::at(position),
            cooldowns: Cooldowns::default(),
        }
    }
}
