use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use cmafplay_playback::SessionConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served at `/`
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// `Cache-Control: max-age` for served files (0 = no header)
    #[serde(default)]
    pub cache_max_age_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8081
}
fn default_directory() -> PathBuf {
    PathBuf::from("media/hls")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            directory: default_directory(),
            cache_max_age_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    /// Lateness after which a video frame is dropped (milliseconds)
    #[serde(default = "default_sync_threshold")]
    pub sync_threshold_ms: u64,

    /// Render loop period (milliseconds)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Rebuild timestamps from manifest segment durations
    #[serde(default)]
    pub reconstruct_timestamps: bool,

    /// Master playlist nesting allowed before giving up
    #[serde(default = "default_max_variant_depth")]
    pub max_variant_depth: usize,

    /// How long queued output may keep playing after the last segment
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_sync_threshold() -> u64 {
    50
}
fn default_refresh_interval() -> u64 {
    16
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_variant_depth() -> usize {
    4
}
fn default_drain_timeout() -> u64 {
    10
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sync_threshold_ms: default_sync_threshold(),
            refresh_interval_ms: default_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
            reconstruct_timestamps: false,
            max_variant_depth: default_max_variant_depth(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl PlayerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settings for one playback session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_variant_depth: self.max_variant_depth,
            reconstruct_timestamps: self.reconstruct_timestamps,
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            sync_threshold: Duration::from_millis(self.sync_threshold_ms),
        }
    }
}
