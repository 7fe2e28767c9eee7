//! `armsim-memory` – Workspace Snapshot Store.
//!
//! Key-value store the workspace writes each arm's static description to
//! when it is (re)built, so external tools can look up an arm's geometry
//! without subscribing to telemetry.
//!
//! # Modules
//!
//! - [`snapshot`] – the [`SnapshotStore`][snapshot::SnapshotStore] trait with
//!   a SQLite-backed and an in-memory implementation.

pub mod snapshot;

pub use snapshot::{InMemorySnapshotStore, SnapshotError, SnapshotStore, SqliteSnapshotStore};
