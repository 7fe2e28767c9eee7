//! Configuration file loading plus `ARMSIM_*` environment overrides.

use std::fs;
use std::path::Path;

use armsim_runtime::WorkspaceConfig;
use armsim_types::ArmError;

/// Read, parse and override a configuration file.
///
/// Values are not validated here; building the workspace does that.
pub fn load_from(path: &Path) -> Result<WorkspaceConfig, ArmError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        ArmError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg = WorkspaceConfig::from_toml_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `ARMSIM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMSIM_UPDATE_INTERVAL_MS` | `update_interval_ms` |
/// | `ARMSIM_HEALTH_PORT` | `health_server.port` |
/// | `ARMSIM_TELEMETRY_CHANNEL` | `protocol.telemetry_channel` |
/// | `ARMSIM_WEBSOCKET_PORT` | `protocol.websocket.port` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut WorkspaceConfig) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut WorkspaceConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ARMSIM_UPDATE_INTERVAL_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.update_interval_ms = ms;
    }
    if let Some(v) = lookup("ARMSIM_HEALTH_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.health_server.port = port;
    }
    if let Some(v) = lookup("ARMSIM_TELEMETRY_CHANNEL")
        && !v.is_empty()
    {
        cfg.protocol.telemetry_channel = v;
    }
    if let Some(v) = lookup("ARMSIM_WEBSOCKET_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.protocol.websocket.port = port;
    }
}
