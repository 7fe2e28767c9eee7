//! Planar two-link arm kinematics.
//!
//! Destinations are expressed in the shoulder frame; joint positions returned
//! by [`forward_kinematics`] are in the workspace frame.
//!
//! # Example
//!
//! ```rust
//! use armsim_hal::kinematics::{ArmGeometry, forward_kinematics, solve};
//! use armsim_types::Vec2;
//!
//! let geometry = ArmGeometry::new(1.0, 1.0).unwrap();
//! let (theta1, theta2) = solve(&geometry, Vec2::new(1.5, 0.0)).unwrap();
//!
//! let joints = forward_kinematics(&geometry, Vec2::zero(), theta1, theta2);
//! assert!(joints.wrist.distance(Vec2::new(1.5, 0.0)) < 1e-9);
//! ```

use armsim_types::{ArmError, Vec2};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// A destination the arm cannot reach with its link lengths.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ReachabilityError {
    #[error("destination {destination} is {distance:.4} from the shoulder, beyond the maximum reach {max_reach:.4}")]
    OutOfReach {
        destination: Vec2,
        distance: f64,
        max_reach: f64,
    },

    #[error("destination {destination} has no elbow solution (cosine argument {cos_arg:.4})")]
    Degenerate { destination: Vec2, cos_arg: f64 },
}

// ────────────────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────────────────

/// Link lengths of a two-link arm. Fixed for the lifetime of the arm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmGeometry {
    shoulder_to_elbow: f64,
    elbow_to_gripper: f64,
}

impl ArmGeometry {
    /// Create a geometry from the two link lengths.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Config`] unless both lengths are finite and
    /// strictly positive.
    pub fn new(shoulder_to_elbow: f64, elbow_to_gripper: f64) -> Result<Self, ArmError> {
        for (name, value) in [
            ("shoulder_to_elbow", shoulder_to_elbow),
            ("elbow_to_gripper", elbow_to_gripper),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ArmError::Config(format!(
                    "{name} must be a positive length, got {value}"
                )));
            }
        }
        Ok(Self {
            shoulder_to_elbow,
            elbow_to_gripper,
        })
    }

    pub fn shoulder_to_elbow(&self) -> f64 {
        self.shoulder_to_elbow
    }

    pub fn elbow_to_gripper(&self) -> f64 {
        self.elbow_to_gripper
    }

    /// Distance from the shoulder to the gripper with the arm fully stretched.
    pub fn max_reach(&self) -> f64 {
        self.shoulder_to_elbow + self.elbow_to_gripper
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Kinematic state
// ────────────────────────────────────────────────────────────────────────────

/// Mutable kinematic state of one arm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmKinematicState {
    pub base: Vec2,
    pub shoulder: Vec2,
    /// Shoulder joint angle (radians).
    pub theta1: f64,
    /// Elbow joint angle relative to the upper link (radians).
    pub theta2: f64,
    /// Current target of the wrist, shoulder frame.
    pub destination: Vec2,
    /// Last destination that was solved successfully.
    pub previous_destination: Vec2,
}

impl ArmKinematicState {
    /// A stretched-out arm (both angles zero) mounted at `base`, heading for
    /// `destination`.
    pub fn new(base: Vec2, destination: Vec2) -> Self {
        Self {
            base,
            shoulder: base,
            theta1: 0.0,
            theta2: 0.0,
            destination,
            previous_destination: destination,
        }
    }

    /// Joint positions for the current angles.
    pub fn joints(&self, geometry: &ArmGeometry) -> JointPositions {
        forward_kinematics(geometry, self.shoulder, self.theta1, self.theta2)
    }

    /// Wrist position relative to the shoulder, the frame destinations live in.
    pub fn wrist_in_shoulder_frame(&self, geometry: &ArmGeometry) -> Vec2 {
        self.joints(geometry).wrist.sub(self.shoulder)
    }

    /// Undo a destination change that could not be solved.
    pub fn rollback(&mut self) {
        self.destination = self.previous_destination;
    }

    /// Mark the current destination as solvable.
    pub fn commit_destination(&mut self) {
        self.previous_destination = self.destination;
    }
}

/// Elbow and wrist positions, workspace frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointPositions {
    pub elbow: Vec2,
    pub wrist: Vec2,
}

// ────────────────────────────────────────────────────────────────────────────
// Inverse / forward kinematics
// ────────────────────────────────────────────────────────────────────────────

/// Rounding slack allowed at the reach boundaries. A stretched or fully
/// folded wrist computed by [`forward_kinematics`] can land a few ulps
/// outside them.
pub const BOUNDARY_TOLERANCE: f64 = 1e-12;

/// Goal joint angles `(theta1, theta2)` that put the wrist on `destination`.
///
/// # Errors
///
/// - [`ReachabilityError::OutOfReach`] if `destination` lies beyond the
///   stretched arm.
/// - [`ReachabilityError::Degenerate`] if the elbow cosine falls outside
///   `[-1, 1]` (destination inside the unreachable inner annulus) or is not
///   a number.
pub fn solve(geometry: &ArmGeometry, destination: Vec2) -> Result<(f64, f64), ReachabilityError> {
    let l1 = geometry.shoulder_to_elbow;
    let l2 = geometry.elbow_to_gripper;

    let distance = destination.norm();
    if distance > geometry.max_reach() * (1.0 + BOUNDARY_TOLERANCE) {
        return Err(ReachabilityError::OutOfReach {
            destination,
            distance,
            max_reach: geometry.max_reach(),
        });
    }

    let cos_arg = (destination.x.powi(2) + destination.y.powi(2) - l1.powi(2) - l2.powi(2))
        / (2.0 * l1 * l2);
    let cos_arg = if (cos_arg.abs() - 1.0) <= BOUNDARY_TOLERANCE {
        cos_arg.clamp(-1.0, 1.0)
    } else {
        cos_arg
    };
    if !(-1.0..=1.0).contains(&cos_arg) {
        return Err(ReachabilityError::Degenerate {
            destination,
            cos_arg,
        });
    }

    let theta2 = cos_arg.acos();
    let bearing = destination.y.atan2(destination.x);
    let offset = (l2 * theta2.sin()).atan2(l1 + l2 * theta2.cos());
    // acos never yields a negative angle, so the first branch is kept only
    // for elbow-configuration compatibility.
    let theta1 = if theta2 < 0.0 {
        bearing + offset
    } else {
        bearing - offset
    };

    Ok((theta1, theta2))
}

/// Elbow and wrist positions for the given joint angles.
pub fn forward_kinematics(
    geometry: &ArmGeometry,
    shoulder: Vec2,
    theta1: f64,
    theta2: f64,
) -> JointPositions {
    let elbow = shoulder.add(Vec2::new(
        geometry.shoulder_to_elbow * theta1.cos(),
        geometry.shoulder_to_elbow * theta1.sin(),
    ));
    let wrist = elbow.add(Vec2::new(
        geometry.elbow_to_gripper * (theta1 + theta2).cos(),
        geometry.elbow_to_gripper * (theta1 + theta2).sin(),
    ));
    JointPositions { elbow, wrist }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ProportionalController;

    fn unit_arm() -> ArmGeometry {
        ArmGeometry::new(1.0, 1.0).unwrap()
    }

    #[test]
    fn geometry_rejects_non_positive_lengths() {
        assert!(ArmGeometry::new(0.0, 1.0).is_err());
        assert!(ArmGeometry::new(1.0, -0.5).is_err());
        assert!(ArmGeometry::new(f64::NAN, 1.0).is_err());
        assert!(ArmGeometry::new(1.0, f64::INFINITY).is_err());
    }

    #[test]
    fn solve_within_reach_succeeds() {
        let (theta1, theta2) = solve(&unit_arm(), Vec2::new(1.5, 0.0)).expect("reachable");
        assert!(theta1.is_finite() && theta2.is_finite());
        let wrist = forward_kinematics(&unit_arm(), Vec2::zero(), theta1, theta2).wrist;
        assert!(wrist.distance(Vec2::new(1.5, 0.0)) < 1e-9);
    }

    #[test]
    fn solve_beyond_reach_fails() {
        let err = solve(&unit_arm(), Vec2::new(3.0, 0.0)).unwrap_err();
        assert!(matches!(err, ReachabilityError::OutOfReach { max_reach, .. } if max_reach == 2.0));
    }

    #[test]
    fn solve_at_full_stretch_succeeds() {
        let (theta1, theta2) = solve(&unit_arm(), Vec2::new(0.0, 2.0)).expect("boundary");
        assert!(theta2.abs() < 1e-6);
        assert!((theta1 - std::f64::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn stretched_wrist_of_any_geometry_is_solvable() {
        let pairs = [(0.7, 0.3), (0.3, 0.1), (0.8, 0.6), (1.3, 0.45), (0.11, 0.07), (2.5, 1.7)];
        for (l1, l2) in pairs {
            let geometry = ArmGeometry::new(l1, l2).unwrap();
            for theta1 in [0.0, 0.4, -2.1, std::f64::consts::PI] {
                let wrist = forward_kinematics(&geometry, Vec2::zero(), theta1, 0.0).wrist;
                let (goal1, goal2) = solve(&geometry, wrist)
                    .unwrap_or_else(|e| panic!("{l1}/{l2} at {theta1}: {e}"));
                assert!(goal2.abs() < 1e-5, "{l1}/{l2}: theta2 = {goal2}");
                let back = forward_kinematics(&geometry, Vec2::zero(), goal1, goal2).wrist;
                assert!(back.distance(wrist) < 1e-9);
            }
        }
    }

    #[test]
    fn rounding_past_the_boundary_is_tolerated_but_real_overshoot_is_not() {
        let geometry = ArmGeometry::new(0.7, 0.3).unwrap();
        assert!(solve(&geometry, Vec2::new(1.0, 0.0)).is_ok());
        assert!(matches!(
            solve(&geometry, Vec2::new(1.0 + 1e-6, 0.0)),
            Err(ReachabilityError::OutOfReach { .. })
        ));
    }

    #[test]
    fn solve_inside_inner_annulus_fails() {
        let geometry = ArmGeometry::new(1.0, 0.5).unwrap();
        let err = solve(&geometry, Vec2::new(0.2, 0.0)).unwrap_err();
        assert!(matches!(err, ReachabilityError::Degenerate { cos_arg, .. } if cos_arg < -1.0));
    }

    #[test]
    fn solve_picks_elbow_down_branch() {
        let (theta1, theta2) = solve(&unit_arm(), Vec2::new(1.0, 1.0)).unwrap();
        assert!(theta2 > 0.0);
        assert!(theta1 < std::f64::consts::FRAC_PI_4);
    }

    #[test]
    fn forward_kinematics_of_stretched_arm() {
        let joints = forward_kinematics(&unit_arm(), Vec2::new(2.0, 1.0), 0.0, 0.0);
        assert_eq!(joints.elbow, Vec2::new(3.0, 1.0));
        assert_eq!(joints.wrist, Vec2::new(4.0, 1.0));
    }

    #[test]
    fn repeated_steps_converge_on_reachable_destinations() {
        let geometry = ArmGeometry::new(1.0, 0.8).unwrap();
        let controller = ProportionalController::new(10.0);
        let targets = [
            Vec2::new(1.5, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(-0.7, 0.9),
            Vec2::new(0.3, -1.2),
            Vec2::new(-1.0, -0.5),
        ];
        for target in targets {
            let (goal1, goal2) = solve(&geometry, target).expect("reachable");
            let (mut theta1, mut theta2) = (0.0, 0.0);
            let start = forward_kinematics(&geometry, Vec2::zero(), theta1, theta2)
                .wrist
                .distance(target);
            for _ in 0..600 {
                (theta1, theta2) = controller.step((theta1, theta2), (goal1, goal2), 0.01);
            }
            let end = forward_kinematics(&geometry, Vec2::zero(), theta1, theta2)
                .wrist
                .distance(target);
            assert!(end < start);
            assert!(end < 1e-6, "did not converge on {target}: {end}");
        }
    }

    #[test]
    fn rollback_restores_previous_destination() {
        let mut state = ArmKinematicState::new(Vec2::zero(), Vec2::new(1.0, 0.0));
        state.destination = Vec2::new(5.0, 5.0);
        state.rollback();
        assert_eq!(state.destination, Vec2::new(1.0, 0.0));
        assert_eq!(state.previous_destination, state.destination);
    }

    #[test]
    fn wrist_in_shoulder_frame_removes_mount_offset() {
        let state = ArmKinematicState::new(Vec2::new(10.0, -3.0), Vec2::zero());
        let wrist = state.wrist_in_shoulder_frame(&unit_arm());
        assert!(wrist.distance(Vec2::new(2.0, 0.0)) < 1e-12);
    }
}
