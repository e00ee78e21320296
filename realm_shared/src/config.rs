//! Configuration system.
//!
//! Loads client configuration from JSON strings (file IO left to the app).
//! Every field has a default, so a partial document overrides only what it names.
//! Movement, smoothing and culling numbers are presentation tuning, not protocol.

use serde::{Deserialize, Serialize};

/// Frustum culling tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingConfig {
    pub enabled: bool,
    /// Extra pixels around the viewport that still count as visible.
    pub margin: f32,
    /// Evaluate at most once every this many frames.
    pub interval_frames: u32,
    /// Skip evaluation unless the camera moved more than this many pixels.
    pub camera_threshold: f32,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            margin: 100.0,
            interval_frames: 3,
            camera_threshold: 10.0,
        }
    }
}

/// Root client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address, e.g. `127.0.0.1:8080`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Identity presented to the server.
    #[serde(default = "default_player_name")]
    pub player_name: String,
    #[serde(default = "default_skin")]
    pub skin: String,
    /// Frame rate of the headless loop.
    #[serde(default = "default_frame_hz")]
    pub frame_hz: u32,
    #[serde(default = "default_camera_scale")]
    pub camera_scale: f32,
    #[serde(default = "default_screen_width")]
    pub screen_width: f32,
    #[serde(default = "default_screen_height")]
    pub screen_height: f32,
    /// Pixels per 60 Hz tick.
    #[serde(default = "default_movement_speed")]
    pub movement_speed: f32,
    /// Per-frame fraction remote avatars close toward their target.
    #[serde(default = "default_remote_lerp")]
    pub remote_lerp: f32,
    #[serde(default = "default_position_interval_ms")]
    pub position_interval_ms: u64,
    /// How long `leave` waits for the goodbye frame to flush.
    #[serde(default = "default_leave_grace_ms")]
    pub leave_grace_ms: u64,
    /// Seconds the screen takes to fade out before a teleport lands.
    #[serde(default = "default_fade_duration")]
    pub fade_duration: f32,
    /// Failed externally driven path requests tolerated before ignoring more.
    #[serde(default = "default_max_strikes")]
    pub max_strikes: u32,
    #[serde(default)]
    pub culling: CullingConfig,
}

fn default_server_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_skin() -> String {
    "009".to_string()
}

fn default_frame_hz() -> u32 {
    60
}

fn default_camera_scale() -> f32 {
    1.5
}

fn default_screen_width() -> f32 {
    1280.0
}

fn default_screen_height() -> f32 {
    720.0
}

fn default_movement_speed() -> f32 {
    3.5
}

fn default_remote_lerp() -> f32 {
    0.2
}

fn default_position_interval_ms() -> u64 {
    100
}

fn default_leave_grace_ms() -> u64 {
    100
}

fn default_fade_duration() -> f32 {
    0.5
}

fn default_max_strikes() -> u32 {
    25
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            player_name: default_player_name(),
            skin: default_skin(),
            frame_hz: default_frame_hz(),
            camera_scale: default_camera_scale(),
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
            movement_speed: default_movement_speed(),
            remote_lerp: default_remote_lerp(),
            position_interval_ms: default_position_interval_ms(),
            leave_grace_ms: default_leave_grace_ms(),
            fade_duration: default_fade_duration(),
            max_strikes: default_max_strikes(),
            culling: CullingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ClientConfig::from_json_str(
            r#"{ "player_name": "ann", "culling": { "margin": 64.0 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.player_name, "ann");
        assert_eq!(cfg.remote_lerp, 0.2);
        assert_eq!(cfg.position_interval_ms, 100);
        assert_eq!(cfg.culling.margin, 64.0);
        assert_eq!(cfg.culling.interval_frames, 3);
    }
}
