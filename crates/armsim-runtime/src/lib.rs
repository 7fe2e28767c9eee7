//! `armsim-runtime` – The Workspace Engine
//!
//! Owns the arms and drives them.
//!
//! # Modules
//!
//! - [`config`] – [`WorkspaceConfig`][config::WorkspaceConfig] and
//!   [`ArmConfig`][config::ArmConfig]: the deserialised configuration file
//!   plus the all-or-nothing validation every (re)build runs first.
//! - [`arm`] – [`RobotArm`][arm::RobotArm]: one arm's operation state
//!   machine.  Couples the kinematics from `armsim-hal` with a
//!   [`Watchdog`][armsim_kernel::Watchdog] whose expiry callback performs
//!   recovery under the arm's lock.
//! - [`workspace`] – [`Workspace`][workspace::Workspace]: the orchestrator.
//!   Ticks every arm, publishes telemetry, routes inbound control messages
//!   and rebuilds the arm set on reload.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.
//!
//! # Locking
//!
//! Each arm has exactly one `parking_lot::Mutex` guarding its operation
//! state and kinematics.  The tick loop, control routing and the arm's
//! watchdog task all go through it; no lock spans two arms.

pub mod arm;
pub mod config;
pub mod telemetry;
pub mod workspace;

pub use arm::{ArmDescription, RobotArm};
pub use config::{ArmConfig, Transport, WorkspaceConfig};
pub use workspace::{RouteOutcome, Workspace, WorkspaceSignal};
