//! Workspace configuration – the TOML document describing every arm.
//!
//! Loading and validation are separate steps: [`WorkspaceConfig::from_toml_str`]
//! only checks the document's shape, [`WorkspaceConfig::validate`] checks the
//! values.  A (re)build always validates the whole document before touching
//! any arm, so a bad file never applies partially.

use std::collections::HashSet;
use std::time::Duration;

use armsim_hal::{ArmGeometry, MotionPattern};
use armsim_kernel::WatchdogConfig;
use armsim_types::{ArmError, OperationState, Vec2};
use serde::{Deserialize, Serialize};

fn default_version() -> String {
    "1.0".to_string()
}
fn default_update_interval_ms() -> u64 {
    100
}
fn default_health_port() -> u16 {
    9999
}
fn default_telemetry_channel() -> String {
    "telemetry".to_string()
}
fn default_control_bindings() -> Vec<String> {
    vec!["control.robot".to_string()]
}
fn default_websocket_host() -> String {
    "0.0.0.0".to_string()
}
fn default_websocket_port() -> u16 {
    armsim_middleware::ws_bridge::DEFAULT_PORT
}
fn default_goal_threshold() -> f64 {
    0.01
}
fn default_check_interval_ms() -> u64 {
    10
}
fn default_trigger_delta_ms() -> u64 {
    1_000
}

// ─────────────────────────────────────────────────────────────────────────────
// Workspace-level sections
// ─────────────────────────────────────────────────────────────────────────────

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_version")]
    pub version: String,

    /// Period of the workspace tick.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    #[serde(default)]
    pub health_server: HealthServerConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub snapshot_store: SnapshotStoreConfig,

    #[serde(default)]
    pub robots: Vec<ArmConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthServerConfig {
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: default_health_port(),
        }
    }
}

/// Which [`PubSub`][armsim_middleware::PubSub] the binary runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// In-process bus; nothing outside the process can reach it.
    #[default]
    Local,
    /// WebSocket bridge; external clients publish and subscribe.
    Websocket,
}

/// Channel names on the message bus and the transport carrying them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub transport: Transport,

    /// Channel every telemetry snapshot is published on.
    #[serde(default = "default_telemetry_channel")]
    pub telemetry_channel: String,

    /// Bindings the workspace listens on for control messages.
    #[serde(default = "default_control_bindings")]
    pub control_bindings: Vec<String>,

    /// Listener of the `websocket` transport.
    #[serde(default)]
    pub websocket: WebSocketConfig,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            telemetry_channel: default_telemetry_channel(),
            control_bindings: default_control_bindings(),
            websocket: WebSocketConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_websocket_host")]
    pub host: String,
    #[serde(default = "default_websocket_port")]
    pub port: u16,
}

impl WebSocketConfig {
    /// `host:port` to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: default_websocket_host(),
            port: default_websocket_port(),
        }
    }
}

/// Where arm descriptions are stored.  No path means in-memory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStoreConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-arm sections
// ─────────────────────────────────────────────────────────────────────────────

/// A point written as `{ x = .., y = .. }` in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointConfig {
    pub x: f64,
    pub y: f64,
}

impl From<PointConfig> for Vec2 {
    fn from(p: PointConfig) -> Self {
        Vec2::new(p.x, p.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkLengths {
    pub shoulder_to_elbow: f64,
    pub elbow_to_gripper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    pub proportional_gain: f64,
    /// Controller time step in seconds.
    pub sample_interval: f64,
    /// Waypoints in the shoulder frame, visited in order and then repeated.
    #[serde(default)]
    pub waypoints: Vec<PointConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatchdogSettings {
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_trigger_delta_ms")]
    pub trigger_delta_ms: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            trigger_delta_ms: default_trigger_delta_ms(),
        }
    }
}

/// One `[[robots]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmConfig {
    pub id: String,

    #[serde(default)]
    pub operation_state: OperationState,

    /// Distance under which a waypoint counts as reached.
    #[serde(default = "default_goal_threshold")]
    pub goal_threshold: f64,

    pub arm: LinkLengths,

    #[serde(default)]
    pub base: PointConfig,

    pub motion: MotionConfig,

    #[serde(default)]
    pub watchdog: WatchdogSettings,
}

impl ArmConfig {
    /// Validated link geometry.
    pub fn geometry(&self) -> Result<ArmGeometry, ArmError> {
        ArmGeometry::new(self.arm.shoulder_to_elbow, self.arm.elbow_to_gripper)
            .map_err(|e| ArmError::Config(format!("robot {:?}: {e}", self.id)))
    }

    pub fn base(&self) -> Vec2 {
        self.base.into()
    }

    pub fn motion_pattern(&self) -> MotionPattern {
        MotionPattern::new(self.motion.waypoints.iter().copied().map(Vec2::from).collect())
    }

    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            check_interval: Duration::from_millis(self.watchdog.check_interval_ms),
            trigger_delta: Duration::from_millis(self.watchdog.trigger_delta_ms),
        }
    }

    /// Check every value of this entry.
    pub fn validate(&self) -> Result<(), ArmError> {
        if self.id.trim().is_empty() {
            return Err(ArmError::Config("robot id must not be empty".to_string()));
        }
        self.geometry()?;

        let positive = [
            ("goal_threshold", self.goal_threshold),
            ("motion.proportional_gain", self.motion.proportional_gain),
            ("motion.sample_interval", self.motion.sample_interval),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(self.invalid(format!("{name} must be positive, got {value}")));
            }
        }
        if self.watchdog.check_interval_ms == 0 || self.watchdog.trigger_delta_ms == 0 {
            return Err(self.invalid("watchdog intervals must be positive".to_string()));
        }
        if !self.base().is_finite() {
            return Err(self.invalid("base position must be finite".to_string()));
        }
        if let Some(bad) = self
            .motion
            .waypoints
            .iter()
            .map(|p| Vec2::from(*p))
            .find(|p| !p.is_finite())
        {
            return Err(self.invalid(format!("waypoint {bad} is not finite")));
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> ArmError {
        ArmError::Config(format!("robot {:?}: {reason}", self.id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing and validation
// ─────────────────────────────────────────────────────────────────────────────

impl WorkspaceConfig {
    /// Parse a TOML document.  Does not validate values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ArmError> {
        toml::from_str(raw).map_err(|e| ArmError::Config(format!("failed to parse config: {e}")))
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Validate the whole document.  Returns the first problem found.
    pub fn validate(&self) -> Result<(), ArmError> {
        if self.update_interval_ms == 0 {
            return Err(ArmError::Config(
                "update_interval_ms must be positive".to_string(),
            ));
        }
        if self.protocol.telemetry_channel.is_empty() {
            return Err(ArmError::Config(
                "protocol.telemetry_channel must not be empty".to_string(),
            ));
        }
        if self.protocol.control_bindings.iter().any(String::is_empty) {
            return Err(ArmError::Config(
                "protocol.control_bindings must not contain empty bindings".to_string(),
            ));
        }
        if self.protocol.transport == Transport::Websocket
            && self.protocol.websocket.host.trim().is_empty()
        {
            return Err(ArmError::Config(
                "protocol.websocket.host must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for robot in &self.robots {
            robot.validate()?;
            if !seen.insert(robot.id.as_str()) {
                return Err(ArmError::Config(format!("duplicate robot id {:?}", robot.id)));
            }
        }
        Ok(())
    }
}
