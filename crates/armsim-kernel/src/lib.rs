//! `armsim-kernel` – Liveness Supervision
//!
//! # Modules
//!
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: an independently
//!   scheduled liveness timer per arm.  It runs as its own Tokio task,
//!   invokes a callback once per expiry window when nobody refreshes it in
//!   time, and shuts down deterministically.

pub mod watchdog;

pub use watchdog::{Watchdog, WatchdogConfig, WatchdogHandle, WatchdogState};
