//! `armsim-hal` – Simulated Arm Hardware
//!
//! The stateless mathematics of a planar two-link manipulator and the small
//! amount of state needed to drive one.
//!
//! # Modules
//!
//! - [`kinematics`] – [`ArmGeometry`], [`ArmKinematicState`], closed-form
//!   inverse kinematics ([`solve`]) and forward kinematics
//!   ([`forward_kinematics`]).
//! - [`controller`] – [`ProportionalController`]: the discrete joint-space
//!   P-controller that moves the joints toward their goal angles a little on
//!   every tick.
//! - [`motion`] – [`MotionPattern`]: the cyclic list of waypoints an arm
//!   replays.

pub mod controller;
pub mod kinematics;
pub mod motion;

pub use controller::{ProportionalController, wrap_angle};
pub use kinematics::{
    ArmGeometry, ArmKinematicState, JointPositions, ReachabilityError, forward_kinematics, solve,
};
pub use motion::MotionPattern;
