use std::{
    collections::BTreeMap,
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_BRIDGE_CONFIG: &str = include_str!("data/bridge_config.json");

/// Runtime configuration for one bridge instance.
#[derive(Resource, Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub subscribe_addr: SocketAddr,
    pub request_addr: SocketAddr,
    pub connect_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub inbound_queue_capacity: usize,
    pub outbound_high_water_bytes: usize,
    pub max_frame_bytes: usize,
    pub reconnect_delay_ms: u64,
    /// Fixed local tick length in seconds.
    pub tick_seconds: f32,
    /// Step length the peer simulator advances by per published batch.
    pub peer_step_length: f32,
    pub metrics_log_interval_ticks: u64,
    pub kinematics: KinematicsConfig,
    pub ego: EgoConfig,
    pub visuals: VisualCatalogConfig,
    pub recording: RecordingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            subscribe_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5556),
            request_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5557),
            connect_timeout_ms: 2_000,
            poll_interval_ms: 1,
            inbound_queue_capacity: 1_000,
            outbound_high_water_bytes: 256 * 1024,
            max_frame_bytes: 4 * 1024 * 1024,
            reconnect_delay_ms: 2_000,
            tick_seconds: 0.02,
            peer_step_length: 0.1,
            metrics_log_interval_ticks: 500,
            kinematics: KinematicsConfig::default(),
            ego: EgoConfig::default(),
            visuals: VisualCatalogConfig::default(),
            recording: RecordingConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn builtin() -> Self {
        serde_json::from_str(BUILTIN_BRIDGE_CONFIG).expect("builtin bridge config should parse")
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, BridgeConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| BridgeConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(BridgeConfig::from_json_str(&contents)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f32(self.tick_seconds.max(0.001))
    }
}

#[derive(Debug, Error)]
pub enum BridgeConfigError {
    #[error("failed to parse bridge config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read bridge config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Tuning for proxy motion reconstruction.
///
/// The turn threshold clamp bounds are heuristics; they are exposed here
/// rather than fixed so a deployment can retune them against its peer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KinematicsConfig {
    /// Apparent heading change per second of peer step that still counts as
    /// straight motion.
    pub turn_rate_deg_per_sec: f32,
    pub min_turn_threshold_deg: f32,
    pub max_turn_threshold_deg: f32,
    /// Seconds over which residual spin bleeds off after a turn.
    pub angular_decay_window: f32,
    /// Exponent applied across the decay window; larger values fade faster.
    pub angular_decay_sharpness: f32,
    /// Per-tick fraction of the remaining gap to the latest sample that is
    /// closed by direct positional blending.
    pub position_blend: f32,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            turn_rate_deg_per_sec: 20.0,
            min_turn_threshold_deg: 1.0,
            max_turn_threshold_deg: 15.0,
            angular_decay_window: 0.3,
            angular_decay_sharpness: 5.0,
            position_blend: 0.02,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EgoConfig {
    pub vehicle_id: String,
    pub type_tag: String,
    /// Spawn pose in peer coordinates: `[x, y, z]` with z up, heading as a
    /// compass angle in degrees. Converted to the local frame at spawn.
    pub initial_position: [f64; 3],
    pub initial_angle: f64,
}

impl Default for EgoConfig {
    fn default() -> Self {
        Self {
            vehicle_id: "f_0.0".to_string(),
            type_tag: "ego".to_string(),
            initial_position: [0.0, 0.0, 0.0],
            initial_angle: 180.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisualCatalogConfig {
    pub default_model: String,
    /// Peer vehicle type tag to visual model name.
    pub models: BTreeMap<String, String>,
}

impl Default for VisualCatalogConfig {
    fn default() -> Self {
        Self {
            default_model: "EloraGold".to_string(),
            models: BTreeMap::new(),
        }
    }
}

impl VisualCatalogConfig {
    pub fn model_for(&self, type_tag: &str) -> Option<&str> {
        self.models.get(type_tag).map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub report_path: Option<PathBuf>,
    pub sample_interval: f32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            report_path: None,
            sample_interval: 0.1,
        }
    }
}

#[derive(Resource, Debug, Clone)]
pub struct BridgeConfigMetadata {
    path: Option<PathBuf>,
}

impl BridgeConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

pub fn load_bridge_config_from_env() -> (BridgeConfig, BridgeConfigMetadata) {
    if let Some(path) = env::var("BRIDGE_CONFIG_PATH").ok().map(PathBuf::from) {
        match BridgeConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "traffic_bridge::config",
                    path = %path.display(),
                    "bridge_config.loaded=file"
                );
                return (config, BridgeConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "traffic_bridge::config",
                    path = %path.display(),
                    error = %err,
                    "bridge_config.load_failed"
                );
            }
        }
    }

    tracing::info!(
        target: "traffic_bridge::config",
        "bridge_config.loaded=builtin"
    );
    (BridgeConfig::builtin(), BridgeConfigMetadata::new(None))
}
