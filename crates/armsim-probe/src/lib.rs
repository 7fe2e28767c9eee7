//! `armsim-probe` – Liveness Probe
//!
//! A TCP endpoint external supervisors poll to learn the simulator process
//! is alive.  It says nothing about the arms themselves.
//!
//! # Modules
//!
//! - [`health`] – [`HealthServer`]: answers every connection with `OK\n`
//!   and closes it.

pub mod health;

pub use health::{DEFAULT_PORT, HealthServer, RESPONSE};
