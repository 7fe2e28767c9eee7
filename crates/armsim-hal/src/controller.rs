//! Discrete joint-space proportional controller.
//!
//! Each call to [`ProportionalController::step`] moves every joint a fraction
//! of the way toward its goal angle, so an arm converges gradually over many
//! ticks rather than jumping to the solution.
//!
//! # Example
//!
//! ```rust
//! use armsim_hal::controller::ProportionalController;
//!
//! let controller = ProportionalController::new(10.0);
//! let (theta1, theta2) = controller.step((0.0, 0.0), (1.0, -1.0), 0.01);
//! assert!((theta1 - 0.1).abs() < 1e-12);
//! assert!((theta2 + 0.1).abs() < 1e-12);
//! ```

use std::f64::consts::{PI, TAU};

/// Normalise an angle difference into `(-π, π]`.
///
/// Taking the shortest way round keeps the controller from spinning a joint
/// the long way when the goal sits across the `±π` seam. A difference of
/// exactly half a turn maps to `+π`.
pub fn wrap_angle(delta: f64) -> f64 {
    let wrapped = (delta + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Proportional controller shared by both joints of an arm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProportionalController {
    gain: f64,
}

impl ProportionalController {
    /// Create a controller with proportional gain `gain`.
    pub fn new(gain: f64) -> Self {
        Self { gain }
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Advance a single angle toward `goal`.
    ///
    /// - `dt` – controller sample interval in seconds.
    ///
    /// Returns `current` unchanged if `dt` is not positive.
    pub fn step_angle(&self, current: f64, goal: f64, dt: f64) -> f64 {
        if dt <= 0.0 {
            return current;
        }
        current + self.gain * wrap_angle(goal - current) * dt
    }

    /// Advance both joint angles `(theta1, theta2)` toward `goal`.
    pub fn step(&self, current: (f64, f64), goal: (f64, f64), dt: f64) -> (f64, f64) {
        (
            self.step_angle(current.0, goal.0, dt),
            self.step_angle(current.1, goal.1, dt),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_keeps_small_differences() {
        assert!((wrap_angle(0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_angle(-0.5) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn wrap_takes_the_short_way_round() {
        // 350° ahead is really 10° behind.
        let delta = wrap_angle(350f64.to_radians());
        assert!((delta + 10f64.to_radians()).abs() < 1e-9);
        let delta = wrap_angle(-3.0 * PI / 2.0);
        assert!((delta - PI / 2.0).abs() < 1e-9);
    }

    #[test]
    fn wrap_output_stays_in_range() {
        let mut x = -20.0;
        while x < 20.0 {
            let w = wrap_angle(x);
            assert!(w > -PI && w <= PI, "wrap({x}) = {w}");
            x += 0.137;
        }
    }

    #[test]
    fn half_turn_wraps_to_positive_pi() {
        assert_eq!(wrap_angle(PI), PI);
        assert_eq!(wrap_angle(-PI), PI);
        assert!((wrap_angle(-PI - 1e-9) - (PI - 1e-9)).abs() < 1e-12);
    }

    #[test]
    fn step_moves_fraction_of_error() {
        let c = ProportionalController::new(2.0);
        let next = c.step_angle(0.0, 1.0, 0.1);
        assert!((next - 0.2).abs() < 1e-12);
    }

    #[test]
    fn step_crosses_the_seam() {
        let c = ProportionalController::new(1.0);
        // Goal just past -π from a start just before +π: move forward, not back.
        let next = c.step_angle(3.1, -3.1, 0.5);
        assert!(next > 3.1);
    }

    #[test]
    fn step_ignores_non_positive_dt() {
        let c = ProportionalController::new(5.0);
        assert_eq!(c.step((0.3, -0.2), (1.0, 1.0), 0.0), (0.3, -0.2));
    }

    #[test]
    fn repeated_steps_converge() {
        let c = ProportionalController::new(10.0);
        let mut angles = (0.0, 0.0);
        for _ in 0..300 {
            angles = c.step(angles, (1.2, -0.4), 0.01);
        }
        assert!((angles.0 - 1.2).abs() < 1e-9);
        assert!((angles.1 + 0.4).abs() < 1e-9);
    }
}
