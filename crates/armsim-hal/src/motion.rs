//! Cyclic waypoint pattern replayed by an arm.

use armsim_types::Vec2;

/// Ordered list of waypoints (shoulder frame) visited round-robin.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MotionPattern {
    waypoints: Vec<Vec2>,
    next: usize,
}

impl MotionPattern {
    /// Build a pattern. The first call to [`advance`][Self::advance] yields
    /// the first waypoint.
    pub fn new(waypoints: Vec<Vec2>) -> Self {
        Self { waypoints, next: 0 }
    }

    /// Return the next waypoint, wrapping to the start once exhausted.
    ///
    /// Returns `None` for an empty pattern.
    pub fn advance(&mut self) -> Option<Vec2> {
        if self.waypoints.is_empty() {
            return None;
        }
        if self.next >= self.waypoints.len() {
            self.next = 0;
        }
        let waypoint = self.waypoints[self.next];
        self.next += 1;
        Some(waypoint)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn waypoints(&self) -> &[Vec2] {
        &self.waypoints
    }
}
