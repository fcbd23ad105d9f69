//! Locating the config file.

use std::path::{Path, PathBuf};

use queue_core::ConfigError;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "QUEUE_MONITOR_CONFIG";

const FILE_NAME: &str = "config.yaml";

/// Per-user config location, `<config_dir>/queue-monitor/config.yaml`.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "queue-monitor")
        .map(|dirs| dirs.config_dir().join(FILE_NAME))
}

/// Pick the config file: the explicit path, then `$QUEUE_MONITOR_CONFIG`,
/// then the per-user file, then `./config.yaml`.
pub fn resolve(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let from_env = std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let candidates: Vec<PathBuf> = user_config_path()
        .into_iter()
        .chain(std::iter::once(PathBuf::from(FILE_NAME)))
        .collect();
    resolve_from(explicit, from_env, &candidates)
}

fn resolve_from(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    candidates: &[PathBuf],
) -> Result<PathBuf, ConfigError> {
    // Named paths are taken as-is; loading reports a missing file.
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = from_env {
        return Ok(path);
    }
    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }
    let hint = candidates
        .first()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| FILE_NAME.to_string());
    Err(ConfigError::NotFound(hint))
}
