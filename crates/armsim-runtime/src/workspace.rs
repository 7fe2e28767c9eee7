//! [`Workspace`] – orchestrates every arm of the simulation.
//!
//! # Loop
//!
//! ```text
//!            ┌──────────── update_interval ────────────┐
//!            ▼                                         │
//!   tick(): for each arm (id order) ─► RobotArm::update ─► publish telemetry
//!
//!   control binding ─► route_control ─► RobotArm::apply_control
//!
//!   WorkspaceSignal::Reload(cfg) ─► rebuild(cfg)     Shutdown ─► shutdown()
//! ```
//!
//! [`Workspace::run`] drives all three from a single task, so ticks never
//! overlap and a rebuild never races a tick.  Each arm's watchdog runs on its
//! own task and reaches the arm through the arm's lock.
//!
//! # Failure isolation
//!
//! One arm can never fail a tick: unreachable destinations are handled
//! inside the arm and a failed publish is logged before moving on to the
//! next arm.  Malformed or misaddressed control messages are dropped with a
//! warning.  An invalid configuration on reload is rejected before any arm
//! is touched.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use armsim_memory::SnapshotStore;
use armsim_middleware::PubSub;
use armsim_types::{ArmError, ControlMessage, OperationState};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::arm::RobotArm;
use crate::config::WorkspaceConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to one inbound control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The command was applied and the arm is now in `state`.
    Applied { id: String, state: OperationState },
    /// Not UTF-8 JSON, or `id` / `control` missing.
    Malformed,
    /// No arm with this id exists in the workspace.
    UnknownArm(String),
    /// The arm exists but the command was not recognised.
    Rejected { id: String, reason: String },
    /// The routing key names a different arm than the message's `id`.
    Misaddressed { binding: String, id: String },
}

/// Out-of-band requests for a running [`Workspace::run`] loop.
#[derive(Debug, Clone)]
pub enum WorkspaceSignal {
    /// Replace every arm with the ones described by this configuration.
    Reload(WorkspaceConfig),
    /// Stop every arm and return from `run`.
    Shutdown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Workspace
// ─────────────────────────────────────────────────────────────────────────────

/// The set of arms plus the channels they talk on.
pub struct Workspace {
    arms: BTreeMap<String, RobotArm>,
    update_interval: Duration,
    telemetry_channel: String,
    control_bindings: Vec<String>,
    bus: Arc<dyn PubSub>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl Workspace {
    /// Validate `config` and construct every arm it describes.
    ///
    /// Nothing is started unless the whole document is valid.  Each arm's
    /// static description is written to `store` under `robot_<id>`; store
    /// failures are logged and do not fail the build.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(
        config: &WorkspaceConfig,
        bus: Arc<dyn PubSub>,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Self, ArmError> {
        config.validate()?;
        let arms = spawn_arms(config)?;

        let workspace = Self {
            arms,
            update_interval: config.update_interval(),
            telemetry_channel: config.protocol.telemetry_channel.clone(),
            control_bindings: config.protocol.control_bindings.clone(),
            bus,
            store,
        };
        workspace.write_descriptions();
        info!(
            arms = workspace.arms.len(),
            update_interval_ms = config.update_interval_ms,
            telemetry_channel = %workspace.telemetry_channel,
            "workspace built"
        );
        Ok(workspace)
    }

    pub fn arm(&self, id: &str) -> Option<&RobotArm> {
        self.arms.get(id)
    }

    /// Arm ids in tick order.
    pub fn arm_ids(&self) -> Vec<String> {
        self.arms.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn telemetry_channel(&self) -> &str {
        &self.telemetry_channel
    }

    pub fn control_bindings(&self) -> &[String] {
        &self.control_bindings
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// Update every arm once and publish the telemetry they produce.
    ///
    /// Returns the number of snapshots published.
    pub async fn tick(&self) -> usize {
        let mut published = 0;
        for (id, arm) in &self.arms {
            let Some(snapshot) = arm.update() else {
                continue;
            };
            let payload = match serde_json::to_vec(&snapshot) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(arm = %id, error = %e, "failed to encode telemetry");
                    continue;
                }
            };
            match self.bus.publish(&self.telemetry_channel, payload).await {
                Ok(()) => published += 1,
                Err(e) => warn!(arm = %id, error = %e, "failed to publish telemetry"),
            }
        }
        debug!(published, "tick complete");
        published
    }

    // ── Control routing ──────────────────────────────────────────────────────

    /// Decode one inbound control message and apply it to its arm.
    ///
    /// A message received on `<control binding>.<arm id>` must carry that
    /// same arm id; otherwise it is dropped.
    pub fn route_control(&self, binding: &str, payload: &[u8]) -> RouteOutcome {
        let message: ControlMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(binding, error = %e, "dropping malformed control message");
                return RouteOutcome::Malformed;
            }
        };

        if let Some(addressed) = self.addressed_arm(binding)
            && addressed != message.id
        {
            warn!(
                binding,
                arm = %message.id,
                addressed,
                "dropping control message routed to another arm"
            );
            return RouteOutcome::Misaddressed {
                binding: binding.to_string(),
                id: message.id,
            };
        }

        let Some(arm) = self.arms.get(&message.id) else {
            warn!(binding, arm = %message.id, "dropping control message for unknown arm");
            return RouteOutcome::UnknownArm(message.id);
        };

        match arm.apply_control(&message.control) {
            Ok(state) => RouteOutcome::Applied {
                id: message.id,
                state,
            },
            Err(e) => {
                warn!(binding, arm = %message.id, error = %e, "dropping control message");
                RouteOutcome::Rejected {
                    id: message.id,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Arm id carried as a routing-key suffix, e.g. `arm-1` in
    /// `control.robot.arm-1` under the binding `control.robot`.
    fn addressed_arm<'a>(&self, binding: &'a str) -> Option<&'a str> {
        self.control_bindings
            .iter()
            .filter_map(|b| binding.strip_prefix(b.as_str())?.strip_prefix('.'))
            .filter(|suffix| !suffix.is_empty())
            .min_by_key(|suffix| suffix.len())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Replace every arm with the ones described by `config`.
    ///
    /// The new document is validated first; if it is invalid the current
    /// arms keep running and the error is returned.  Otherwise every current
    /// watchdog is stopped and awaited before the new arms are created.
    ///
    /// The bus and the control bindings stay as they are; the update
    /// interval and the telemetry channel are taken from `config`.
    pub async fn rebuild(&mut self, config: &WorkspaceConfig) -> Result<(), ArmError> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "rejecting reload; keeping current arms");
            return Err(e);
        }
        if config.protocol.control_bindings != self.control_bindings {
            warn!(
                current = ?self.control_bindings,
                requested = ?config.protocol.control_bindings,
                "control bindings cannot change on reload; keeping current bindings"
            );
        }

        self.shutdown().await;
        self.arms.clear();

        self.arms = spawn_arms(config)?;
        self.update_interval = config.update_interval();
        self.telemetry_channel = config.protocol.telemetry_channel.clone();
        self.write_descriptions();
        info!(arms = self.arms.len(), "workspace rebuilt");
        Ok(())
    }

    /// Stop every arm's watchdog and wait for each to exit.
    pub async fn shutdown(&self) {
        for arm in self.arms.values() {
            arm.shutdown().await;
        }
        info!(arms = self.arms.len(), "workspace shut down");
    }

    /// Drive the workspace until [`WorkspaceSignal::Shutdown`] arrives or the
    /// signal sender is dropped.
    ///
    /// Subscribes to the control bindings once, then interleaves ticks,
    /// inbound control messages and signals on this task.
    pub async fn run(&mut self, mut signals: mpsc::Receiver<WorkspaceSignal>) {
        let mut inbound = self.bus.subscribe(&self.control_bindings);
        let mut control_open = true;
        let mut ticker = tick_interval(self.update_interval);
        info!(bindings = ?self.control_bindings, "workspace running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                message = inbound.next(), if control_open => match message {
                    Some(message) => {
                        self.route_control(&message.binding, &message.payload);
                    }
                    None => {
                        warn!("control subscription closed; ticking only");
                        control_open = false;
                    }
                },
                signal = signals.recv() => match signal {
                    Some(WorkspaceSignal::Reload(config)) => {
                        match self.rebuild(&config).await {
                            Ok(()) => ticker = tick_interval(self.update_interval),
                            Err(e) => error!(error = %e, "reload failed"),
                        }
                    }
                    Some(WorkspaceSignal::Shutdown) | None => break,
                },
            }
        }

        self.shutdown().await;
    }

    fn write_descriptions(&self) {
        let Some(store) = &self.store else {
            return;
        };
        for (id, arm) in &self.arms {
            let key = format!("robot_{id}");
            let value = match serde_json::to_string(&arm.describe()) {
                Ok(value) => value,
                Err(e) => {
                    warn!(arm = %id, error = %e, "failed to encode arm description");
                    continue;
                }
            };
            if let Err(e) = store.set(&key, &value) {
                warn!(arm = %id, error = %e, "failed to store arm description");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn spawn_arms(config: &WorkspaceConfig) -> Result<BTreeMap<String, RobotArm>, ArmError> {
    let mut arms = BTreeMap::new();
    for robot in &config.robots {
        arms.insert(robot.id.clone(), RobotArm::spawn(robot)?);
    }
    if arms.is_empty() {
        warn!("configuration describes no robots");
    }
    Ok(arms)
}

fn tick_interval(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
