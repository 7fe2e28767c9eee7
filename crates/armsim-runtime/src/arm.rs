//! [`RobotArm`] – the per-arm operation state machine.
//!
//! An arm advances toward its current destination on every tick while it is
//! [`OperationState::Running`], and moves on to the next waypoint of its
//! motion pattern once the wrist is within the goal threshold.
//!
//! # Transitions
//!
//! | From | Event | To |
//! |---|---|---|
//! | any | `start` | `Running` |
//! | any | `stop` | `Stopped` |
//! | any | `off` | `Off` |
//! | `Running` | watchdog expiry | `Running` (recovery) |
//! | `Stopped` / `Off` | watchdog expiry | unchanged |
//!
//! Every successful tick refreshes the arm's watchdog.  When a `Running` arm
//! makes no progress for longer than the trigger delta (typically because
//! its destination keeps failing to solve) the watchdog performs a
//! *recovery*: it skips to the next waypoint and re-arms itself.
//!
//! # Locking
//!
//! Operation state, kinematics and motion pattern live behind one
//! [`parking_lot::Mutex`].  [`RobotArm::update`], [`RobotArm::apply_command`]
//! and the watchdog callback each take it for the whole of their mutation, so
//! an `off` racing an expiry always ends in `Off`.

use std::sync::Arc;

use armsim_hal::{ArmGeometry, ArmKinematicState, MotionPattern, ProportionalController, solve};
use armsim_kernel::{Watchdog, WatchdogHandle, WatchdogState};
use armsim_types::{ArmError, ControlCommand, OperationState, TelemetrySnapshot, Vec2};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ArmConfig;

// ────────────────────────────────────────────────────────────────────────────
// Static description
// ────────────────────────────────────────────────────────────────────────────

/// The parts of an arm that never change after construction, as written to
/// the snapshot store under `robot_<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmDescription {
    pub base: Vec2,
    pub shoulder: Vec2,
    pub length_shoulder_to_elbow: f64,
    pub length_elbow_to_gripper: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Lock-protected core
// ────────────────────────────────────────────────────────────────────────────

struct ArmCore {
    geometry: ArmGeometry,
    kinematics: ArmKinematicState,
    state: OperationState,
    pattern: MotionPattern,
    controller: ProportionalController,
    /// Controller time step, seconds.
    sample_interval: f64,
    goal_threshold: f64,
    pending_telemetry: Option<TelemetrySnapshot>,
    recoveries: u64,
}

impl ArmCore {
    fn from_config(config: &ArmConfig) -> Result<Self, ArmError> {
        let geometry = config.geometry()?;
        let mut pattern = config.motion_pattern();

        // Start on the first waypoint; an empty pattern holds the wrist
        // where it is (fully stretched along +x).
        let mut kinematics = ArmKinematicState::new(config.base(), Vec2::zero());
        let destination = pattern
            .advance()
            .unwrap_or_else(|| kinematics.wrist_in_shoulder_frame(&geometry));
        kinematics.destination = destination;
        kinematics.previous_destination = destination;

        Ok(Self {
            geometry,
            kinematics,
            state: config.operation_state,
            pattern,
            controller: ProportionalController::new(config.motion.proportional_gain),
            sample_interval: config.motion.sample_interval,
            goal_threshold: config.goal_threshold,
            pending_telemetry: None,
            recoveries: 0,
        })
    }
}

/// Watchdog expiry handler.  Runs on the watchdog task.
fn recover(id: &str, core: &Mutex<ArmCore>, watchdog: &WatchdogHandle) {
    let mut core = core.lock();
    if core.state != OperationState::Running {
        debug!(arm = %id, state = %core.state, "watchdog expired on an idle arm; ignored");
        return;
    }

    if let Some(next) = core.pattern.advance() {
        core.kinematics.destination = next;
    }
    core.recoveries += 1;
    watchdog.refresh();
    info!(
        arm = %id,
        destination = %core.kinematics.destination,
        recoveries = core.recoveries,
        "arm stalled; recovered onto next waypoint"
    );
}

// ────────────────────────────────────────────────────────────────────────────
// RobotArm
// ────────────────────────────────────────────────────────────────────────────

/// One simulated two-link arm and its watchdog.
///
/// Must be created inside a Tokio runtime because the watchdog runs as a
/// task.  Call [`shutdown`][Self::shutdown] before discarding an arm to wait
/// for that task to exit.
pub struct RobotArm {
    id: String,
    core: Arc<Mutex<ArmCore>>,
    watchdog: Watchdog,
}

impl RobotArm {
    /// Build an arm from its configuration entry and start its watchdog.
    ///
    /// The entry is expected to have passed [`ArmConfig::validate`]; only the
    /// geometry is re-checked here.
    pub fn spawn(config: &ArmConfig) -> Result<Self, ArmError> {
        let core = Arc::new(Mutex::new(ArmCore::from_config(config)?));

        let id = config.id.clone();
        let callback_core = Arc::clone(&core);
        let watchdog = Watchdog::spawn(config.id.clone(), config.watchdog_config(), move |handle| {
            recover(&id, &callback_core, handle);
        });

        info!(
            arm = %config.id,
            state = %config.operation_state,
            waypoints = config.motion.waypoints.len(),
            "arm created"
        );
        Ok(Self {
            id: config.id.clone(),
            core,
            watchdog,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> OperationState {
        self.core.lock().state
    }

    /// Copy of the current kinematic state.
    pub fn kinematics(&self) -> ArmKinematicState {
        self.core.lock().kinematics
    }

    pub fn geometry(&self) -> ArmGeometry {
        self.core.lock().geometry
    }

    /// Number of watchdog recoveries performed so far.
    pub fn recoveries(&self) -> u64 {
        self.core.lock().recoveries
    }

    /// Snapshot produced by the most recent successful tick, cleared while
    /// the arm is not running.
    pub fn pending_telemetry(&self) -> Option<TelemetrySnapshot> {
        self.core.lock().pending_telemetry.clone()
    }

    pub fn watchdog_state(&self) -> WatchdogState {
        self.watchdog.state()
    }

    pub fn watchdog(&self) -> WatchdogHandle {
        self.watchdog.handle()
    }

    pub fn describe(&self) -> ArmDescription {
        let core = self.core.lock();
        ArmDescription {
            base: core.kinematics.base,
            shoulder: core.kinematics.shoulder,
            length_shoulder_to_elbow: core.geometry.shoulder_to_elbow(),
            length_elbow_to_gripper: core.geometry.elbow_to_gripper(),
        }
    }

    /// Advance the arm by one tick.
    ///
    /// Returns the telemetry snapshot for this tick, or `None` when the arm
    /// is not running or its destination could not be solved (in which case
    /// the destination is rolled back and the watchdog is left alone).
    pub fn update(&self) -> Option<TelemetrySnapshot> {
        let mut guard = self.core.lock();
        let core = &mut *guard;

        if core.state != OperationState::Running {
            core.pending_telemetry = None;
            return None;
        }

        let goal = match solve(&core.geometry, core.kinematics.destination) {
            Ok(goal) => goal,
            Err(e) => {
                core.kinematics.rollback();
                warn!(
                    arm = %self.id,
                    error = %e,
                    fallback = %core.kinematics.destination,
                    "destination unreachable; rolled back"
                );
                return None;
            }
        };

        let k = &mut core.kinematics;
        (k.theta1, k.theta2) = core
            .controller
            .step((k.theta1, k.theta2), goal, core.sample_interval);
        k.commit_destination();

        let joints = k.joints(&core.geometry);
        let wrist_local = joints.wrist.sub(k.shoulder);
        if wrist_local.distance(k.destination) < core.goal_threshold
            && let Some(next) = core.pattern.advance()
        {
            debug!(arm = %self.id, reached = %k.destination, next = %next, "waypoint reached");
            k.destination = next;
        }

        self.watchdog.refresh();

        let snapshot = TelemetrySnapshot {
            id: self.id.clone(),
            base: k.base,
            shoulder: k.shoulder,
            elbow: joints.elbow,
            wrist: joints.wrist,
            theta1: k.theta1,
            theta2: k.theta2,
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        };
        core.pending_telemetry = Some(snapshot.clone());
        Some(snapshot)
    }

    /// Apply a control command given in its wire spelling.
    ///
    /// # Errors
    ///
    /// [`ArmError::InvalidCommand`] for anything other than `start`, `stop`
    /// or `off`; the arm is left untouched.
    pub fn apply_control(&self, command: &str) -> Result<OperationState, ArmError> {
        let command = command.parse::<ControlCommand>().inspect_err(|e| {
            warn!(arm = %self.id, error = %e, "control command rejected");
        })?;
        Ok(self.apply_command(command))
    }

    /// Apply a parsed control command and return the resulting state.
    pub fn apply_command(&self, command: ControlCommand) -> OperationState {
        let mut core = self.core.lock();
        self.watchdog.refresh();
        self.watchdog.resume();

        let previous = core.state;
        core.state = command.target_state();
        info!(
            arm = %self.id,
            command = %command,
            from = %previous,
            to = %core.state,
            "control applied"
        );
        core.state
    }

    /// Stop the watchdog and wait for its task to exit.  Idempotent.
    pub async fn shutdown(&self) {
        self.watchdog.stop().await;
        debug!(arm = %self.id, "arm shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LinkLengths, MotionConfig, PointConfig, WatchdogSettings};
    use std::time::Duration;
    use tokio::time::sleep;

    fn config(id: &str, waypoints: &[(f64, f64)]) -> ArmConfig {
        ArmConfig {
            id: id.to_string(),
            operation_state: OperationState::Running,
            goal_threshold: 0.01,
            arm: LinkLengths {
                shoulder_to_elbow: 1.0,
                elbow_to_gripper: 1.0,
            },
            base: PointConfig::default(),
            motion: MotionConfig {
                proportional_gain: 10.0,
                sample_interval: 0.01,
                waypoints: waypoints
                    .iter()
                    .map(|&(x, y)| PointConfig { x, y })
                    .collect(),
            },
            watchdog: WatchdogSettings {
                check_interval_ms: 10,
                trigger_delta_ms: 50,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn starts_on_first_waypoint() {
        let arm = RobotArm::spawn(&config("a", &[(1.0, 1.0), (1.5, 0.0)])).unwrap();
        let k = arm.kinematics();
        assert_eq!(k.destination, Vec2::new(1.0, 1.0));
        assert_eq!(k.previous_destination, k.destination);
        assert_eq!(arm.state(), OperationState::Running);
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pattern_holds_current_wrist() {
        let arm = RobotArm::spawn(&config("a", &[])).unwrap();
        assert_eq!(arm.kinematics().destination, Vec2::new(2.0, 0.0));
        for _ in 0..10 {
            let snap = arm.update().expect("running arm reports telemetry");
            assert!(snap.wrist.distance(Vec2::new(2.0, 0.0)) < 1e-9);
        }
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pattern_on_uneven_links_still_reports() {
        for (l1, l2) in [(0.7, 0.3), (0.3, 0.1)] {
            let mut cfg = config("a", &[]);
            cfg.arm = LinkLengths {
                shoulder_to_elbow: l1,
                elbow_to_gripper: l2,
            };
            let arm = RobotArm::spawn(&cfg).unwrap();
            let hold = Vec2::new(l1 + l2, 0.0);
            assert!(arm.kinematics().destination.distance(hold) < 1e-12);
            for _ in 0..5 {
                let snap = arm.update().expect("running arm reports telemetry");
                assert!(snap.wrist.distance(hold) < 1e-9);
            }
            assert_eq!(arm.recoveries(), 0);
            arm.shutdown().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn running_arm_reports_telemetry() {
        let arm = RobotArm::spawn(&config("arm-1", &[(1.5, 0.0)])).unwrap();
        let snap = arm.update().expect("telemetry");
        assert_eq!(snap.id, "arm-1");
        assert_eq!(snap.base, Vec2::zero());
        assert!(snap.theta1.is_finite() && snap.theta2.is_finite());
        assert!(snap.timestamp > 0);
        assert_eq!(arm.pending_telemetry(), Some(snap));
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn three_waypoint_pattern_wraps_to_first() {
        let waypoints = [(1.5, 0.0), (1.0, 1.0), (0.0, 1.5)];
        let arm = RobotArm::spawn(&config("a", &waypoints)).unwrap();

        let mut visited = vec![arm.kinematics().destination];
        for _ in 0..2_000 {
            arm.update();
            let destination = arm.kinematics().destination;
            if visited.last() != Some(&destination) {
                visited.push(destination);
            }
            if visited.len() == 4 {
                break;
            }
        }

        let expected: Vec<Vec2> = [waypoints[0], waypoints[1], waypoints[2], waypoints[0]]
            .iter()
            .map(|&(x, y)| Vec2::new(x, y))
            .collect();
        assert_eq!(visited, expected);
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_arm_produces_nothing() {
        let mut cfg = config("a", &[(1.5, 0.0)]);
        cfg.operation_state = OperationState::Stopped;
        let arm = RobotArm::spawn(&cfg).unwrap();
        assert!(arm.update().is_none());
        assert!(arm.pending_telemetry().is_none());

        arm.apply_command(ControlCommand::Start);
        assert!(arm.update().is_some());
        arm.apply_command(ControlCommand::Off);
        assert!(arm.update().is_none());
        assert!(arm.pending_telemetry().is_none(), "pending telemetry cleared once idle");
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_destination_rolls_back() {
        let arm = RobotArm::spawn(&config("a", &[(3.0, 0.0)])).unwrap();
        assert!(arm.update().is_none());
        let k = arm.kinematics();
        assert_eq!(k.destination, k.previous_destination);
        assert_eq!((k.theta1, k.theta2), (0.0, 0.0), "no motion on failure");
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_next_waypoint_falls_back_to_last_good_one() {
        let arm = RobotArm::spawn(&config("a", &[(1.5, 0.0), (5.0, 0.0)])).unwrap();
        for _ in 0..2_000 {
            arm.update();
            if arm.kinematics().destination == Vec2::new(5.0, 0.0) {
                break;
            }
        }
        assert_eq!(arm.kinematics().destination, Vec2::new(5.0, 0.0));

        assert!(arm.update().is_none());
        let k = arm.kinematics();
        assert_eq!(k.destination, Vec2::new(1.5, 0.0));
        assert_eq!(k.previous_destination, Vec2::new(1.5, 0.0));
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_twice_stays_stopped_and_refreshes() {
        let arm = RobotArm::spawn(&config("a", &[(1.5, 0.0)])).unwrap();
        let watchdog = arm.watchdog();

        sleep(Duration::from_millis(30)).await;
        assert_eq!(arm.apply_control("stop").unwrap(), OperationState::Stopped);
        let first = watchdog.last_refresh();
        assert!(first >= Duration::from_millis(30));

        sleep(Duration::from_millis(30)).await;
        assert_eq!(arm.apply_control("stop").unwrap(), OperationState::Stopped);
        assert!(watchdog.last_refresh() >= first + Duration::from_millis(30));
        assert_eq!(arm.state(), OperationState::Stopped);
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn bogus_command_changes_nothing() {
        let arm = RobotArm::spawn(&config("a", &[(1.5, 0.0)])).unwrap();
        let before = arm.kinematics();
        let err = arm.apply_control("bogus").unwrap_err();
        assert!(matches!(err, ArmError::InvalidCommand(ref s) if s == "bogus"));
        assert_eq!(arm.state(), OperationState::Running);
        assert_eq!(arm.kinematics(), before);
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_running_arm_recovers_onto_next_waypoint() {
        // First waypoint is out of reach, so ticks never refresh the watchdog.
        let arm = RobotArm::spawn(&config("a", &[(3.0, 0.0), (1.5, 0.0)])).unwrap();
        assert!(arm.update().is_none());

        sleep(Duration::from_millis(100)).await;
        assert!(arm.recoveries() >= 1);
        assert_eq!(arm.state(), OperationState::Running);
        assert_eq!(arm.kinematics().destination, Vec2::new(1.5, 0.0));
        assert!(arm.update().is_some());
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_never_restarts_a_stopped_arm() {
        let arm = RobotArm::spawn(&config("a", &[(1.5, 0.0)])).unwrap();
        arm.apply_command(ControlCommand::Stop);

        sleep(Duration::from_millis(300)).await;
        assert!(arm.watchdog().expiries() >= 1, "watchdog keeps running while stopped");
        assert_eq!(arm.recoveries(), 0);
        assert_eq!(arm.state(), OperationState::Stopped);
        arm.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_watchdog_and_is_idempotent() {
        let arm = RobotArm::spawn(&config("a", &[(1.5, 0.0)])).unwrap();
        arm.shutdown().await;
        assert_eq!(arm.watchdog_state(), WatchdogState::Stopped);
        arm.shutdown().await;
        assert_eq!(arm.watchdog_state(), WatchdogState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn off_racing_expiry_always_ends_off() {
        for round in 0..50 {
            let mut cfg = config(&format!("race-{round}"), &[(3.0, 0.0), (1.5, 0.0)]);
            cfg.watchdog = WatchdogSettings {
                check_interval_ms: 1,
                trigger_delta_ms: 1,
            };
            let arm = Arc::new(RobotArm::spawn(&cfg).unwrap());

            let switcher = {
                let arm = Arc::clone(&arm);
                tokio::spawn(async move {
                    sleep(Duration::from_millis(round % 5)).await;
                    arm.apply_control("off")
                })
            };
            for _ in 0..20 {
                arm.update();
                tokio::task::yield_now().await;
            }
            let state = switcher.await.expect("switcher task").expect("off is valid");
            assert_eq!(state, OperationState::Off);

            sleep(Duration::from_millis(5)).await;
            assert_eq!(arm.state(), OperationState::Off, "round {round}");
            arm.shutdown().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn describe_reports_static_geometry() {
        let mut cfg = config("a", &[(1.5, 0.0)]);
        cfg.base = PointConfig { x: 3.0, y: 4.0 };
        cfg.arm.elbow_to_gripper = 0.5;
        let arm = RobotArm::spawn(&cfg).unwrap();
        let d = arm.describe();
        assert_eq!(d.base, Vec2::new(3.0, 4.0));
        assert_eq!(d.shoulder, d.base);
        assert_eq!(d.length_shoulder_to_elbow, 1.0);
        assert_eq!(d.length_elbow_to_gripper, 0.5);
        arm.shutdown().await;
    }
}
