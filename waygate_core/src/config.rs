//! Runtime configuration for the portal network.
//!
//! Loaded from `waygate_config.json` with support for an environment variable override.

use std::{
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;
use waygate_proto::PlayerId;

use crate::activation::ActivationTimings;

pub const BUILTIN_WAYGATE_CONFIG: &str = include_str!("data/waygate_config.json");

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WaygateConfig {
    /// Fixed tick interval in seconds.
    pub tick_seconds: f32,
    pub repair_seconds: f32,
    pub activation_seconds: f32,
    pub transit_cooldown_seconds: f32,
    /// Thickness of the capture cylinder along the gate normal.
    pub capture_depth: f32,
    pub default_portal_size: f32,
    pub server_bind: SocketAddr,
    pub admin_bind: SocketAddr,
    /// Players granted creative privileges: they see every portal and may
    /// edit any portal's cosmetics.
    pub creative_players: Vec<u64>,
    pub metrics_log_interval_ticks: u64,
    /// How long a send to one client may block before that client is dropped.
    pub client_write_timeout_ms: u64,
}

impl Default for WaygateConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 0.05,
            repair_seconds: 3.0,
            activation_seconds: 2.0,
            transit_cooldown_seconds: 2.5,
            capture_depth: 0.6,
            default_portal_size: 5.0,
            server_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42000),
            admin_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42001),
            creative_players: Vec::new(),
            metrics_log_interval_ticks: 1200,
            client_write_timeout_ms: 2000,
        }
    }
}

impl WaygateConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_WAYGATE_CONFIG)
                .expect("builtin waygate config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: WaygateConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        WaygateConfig::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("tick_seconds", self.tick_seconds),
            ("repair_seconds", self.repair_seconds),
            ("activation_seconds", self.activation_seconds),
            ("capture_depth", self.capture_depth),
            ("default_portal_size", self.default_portal_size),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }
        if !(self.transit_cooldown_seconds.is_finite() && self.transit_cooldown_seconds >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "transit_cooldown_seconds",
                reason: format!(
                    "must be zero or positive, got {}",
                    self.transit_cooldown_seconds
                ),
            });
        }
        if self.client_write_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "client_write_timeout_ms",
                reason: "must be at least one millisecond".to_string(),
            });
        }
        Ok(())
    }

    pub fn client_write_timeout(&self) -> Duration {
        Duration::from_millis(self.client_write_timeout_ms)
    }

    pub fn timings(&self) -> ActivationTimings {
        ActivationTimings {
            repair: self.repair_seconds,
            activation: self.activation_seconds,
        }
    }

    pub fn is_creative(&self, player: PlayerId) -> bool {
        self.creative_players.contains(&player.0)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse waygate config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read waygate config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid waygate config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Handle for accessing the configuration from systems.
#[derive(Resource, Debug, Clone)]
pub struct WaygateConfigHandle(pub Arc<WaygateConfig>);

impl WaygateConfigHandle {
    pub fn new(config: Arc<WaygateConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<WaygateConfig> {
        Arc::clone(&self.0)
    }
}

/// Load configuration from `WAYGATE_CONFIG_PATH` or the crate's default file,
/// falling back to the built-in copy.
pub fn load_config_from_env() -> (Arc<WaygateConfig>, Option<PathBuf>) {
    let path = env::var("WAYGATE_CONFIG_PATH")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/waygate_config.json")
        });

    match WaygateConfig::from_file(&path) {
        Ok(config) => {
            tracing::info!(
                target: "waygate::config",
                path = %path.display(),
                "waygate_config.loaded=file"
            );
            return (Arc::new(config), Some(path));
        }
        Err(err) => {
            tracing::warn!(
                target: "waygate::config",
                path = %path.display(),
                error = %err,
                "waygate_config.load_failed"
            );
        }
    }

    tracing::info!(target: "waygate::config", "waygate_config.loaded=builtin");
    (WaygateConfig::builtin(), None)
}
