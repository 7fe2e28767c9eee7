//! `armsim-types` – shared vocabulary of the arm workspace simulator.
//!
//! Value types that cross crate boundaries: planar points, the operation
//! state machine's states, control commands, the wire formats for control
//! and telemetry messages, and the workspace-wide [`ArmError`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Geometry primitives
// ────────────────────────────────────────────────────────────────────────────

/// A point (or displacement) in the arm's plane.
///
/// Serialised as a two-element array `[x, y]`, the layout used by the
/// telemetry wire format.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    /// Create a new point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// The origin.
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }

    /// Euclidean length.
    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Self) -> f64 {
        self.sub(other).norm()
    }

    /// `true` when both coordinates are finite.
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Vec2 {
    fn from([x, y]: [f64; 2]) -> Self {
        Self::new(x, y)
    }
}

impl From<Vec2> for [f64; 2] {
    fn from(v: Vec2) -> Self {
        [v.x, v.y]
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.x, self.y)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Operation state machine
// ────────────────────────────────────────────────────────────────────────────

/// Motion control state of a single arm.
///
/// Configuration files may spell the states either as the command that
/// produces them (`start`, `stop`, `off`) or by name (`running`, `stopped`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    /// The arm advances toward its destination on every tick.
    #[default]
    #[serde(alias = "start")]
    Running,
    /// Paused by an operator; resumes on `start`.
    #[serde(alias = "stop")]
    Stopped,
    /// Switched off by an operator; watchdog recovery never overrides it.
    Off,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Running => write!(f, "running"),
            OperationState::Stopped => write!(f, "stopped"),
            OperationState::Off => write!(f, "off"),
        }
    }
}

/// External control command accepted by an arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    Start,
    Stop,
    Off,
}

impl ControlCommand {
    /// The operation state an arm ends up in after this command.
    pub fn target_state(self) -> OperationState {
        match self {
            ControlCommand::Start => OperationState::Running,
            ControlCommand::Stop => OperationState::Stopped,
            ControlCommand::Off => OperationState::Off,
        }
    }

    /// Wire spelling of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            ControlCommand::Start => "start",
            ControlCommand::Stop => "stop",
            ControlCommand::Off => "off",
        }
    }
}

impl FromStr for ControlCommand {
    type Err = ArmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ControlCommand::Start),
            "stop" => Ok(ControlCommand::Stop),
            "off" => Ok(ControlCommand::Off),
            other => Err(ArmError::InvalidCommand(other.to_string())),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire formats
// ────────────────────────────────────────────────────────────────────────────

/// Inbound control message: `{"id": "...", "control": "start"}`.
///
/// `control` stays a string here so that an unknown command can be told
/// apart from a message that is missing fields altogether.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub id: String,
    pub control: String,
}

/// Outbound per-arm telemetry snapshot produced once per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub id: String,
    pub base: Vec2,
    pub shoulder: Vec2,
    pub elbow: Vec2,
    pub wrist: Vec2,
    pub theta1: f64,
    pub theta2: f64,
    /// Wall-clock time of the snapshot in nanoseconds since the Unix epoch.
    pub timestamp: i64,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type.
#[derive(Error, Debug)]
pub enum ArmError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Invalid control command: {0:?}")]
    InvalidCommand(String),

    #[error("Unknown arm: {0}")]
    UnknownArm(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Snapshot Store Error: {0}")]
    Store(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec2_serializes_as_pair() {
        let json = serde_json::to_string(&Vec2::new(1.5, -2.0)).unwrap();
        assert_eq!(json, "[1.5,-2.0]");
        let back: Vec2 = serde_json::from_str("[0.25, 4]").unwrap();
        assert_eq!(back, Vec2::new(0.25, 4.0));
    }

    #[test]
    fn vec2_distance() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < 1e-12);
        assert!((b.norm() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn control_command_parses_known_spellings() {
        assert_eq!("start".parse::<ControlCommand>().unwrap(), ControlCommand::Start);
        assert_eq!("stop".parse::<ControlCommand>().unwrap(), ControlCommand::Stop);
        assert_eq!("off".parse::<ControlCommand>().unwrap(), ControlCommand::Off);
    }

    #[test]
    fn control_command_rejects_unknown_and_padded_input() {
        for bad in ["bogus", " stop", "START", ""] {
            let err = bad.parse::<ControlCommand>().unwrap_err();
            assert!(matches!(err, ArmError::InvalidCommand(ref s) if s == bad));
        }
    }

    #[test]
    fn command_targets() {
        assert_eq!(ControlCommand::Start.target_state(), OperationState::Running);
        assert_eq!(ControlCommand::Stop.target_state(), OperationState::Stopped);
        assert_eq!(ControlCommand::Off.target_state(), OperationState::Off);
    }

    #[test]
    fn operation_state_accepts_command_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            state: OperationState,
        }
        let w: Wrapper = serde_json::from_str(r#"{"state":"start"}"#).unwrap();
        assert_eq!(w.state, OperationState::Running);
        let w: Wrapper = serde_json::from_str(r#"{"state":"stopped"}"#).unwrap();
        assert_eq!(w.state, OperationState::Stopped);
        let w: Wrapper = serde_json::from_str(r#"{"state":"off"}"#).unwrap();
        assert_eq!(w.state, OperationState::Off);
    }

    #[test]
    fn telemetry_snapshot_wire_layout() {
        let snap = TelemetrySnapshot {
            id: "arm-1".to_string(),
            base: Vec2::zero(),
            shoulder: Vec2::zero(),
            elbow: Vec2::new(1.0, 0.0),
            wrist: Vec2::new(2.0, 0.0),
            theta1: 0.0,
            theta2: 0.0,
            timestamp: 1_700_000_000_000_000_000,
        };
        let value: serde_json::Value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["id"], "arm-1");
        assert_eq!(value["wrist"], serde_json::json!([2.0, 0.0]));
        assert_eq!(value["timestamp"], 1_700_000_000_000_000_000_i64);
    }

    #[test]
    fn control_message_requires_both_fields() {
        let ok: ControlMessage = serde_json::from_str(r#"{"id":"a","control":"stop"}"#).unwrap();
        assert_eq!(ok.control, "stop");
        assert!(serde_json::from_str::<ControlMessage>(r#"{"id":"a"}"#).is_err());
    }

    #[test]
    fn arm_error_display() {
        let err = ArmError::InvalidCommand("bogus".to_string());
        assert!(err.to_string().contains("bogus"));
        let err = ArmError::Config("missing id".to_string());
        assert!(err.to_string().contains("Configuration Error"));
    }
}
