//! Monitor configuration: timing knobs and named connection profiles.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default poll period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Polls never run faster than this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default age after which a job is presumed orphaned.
pub const DEFAULT_ORPHAN_THRESHOLD: Duration = Duration::from_secs(30 * 60);
/// Orphan thresholds below this are raised to it.
pub const MIN_ORPHAN_THRESHOLD: Duration = Duration::from_secs(60);
/// Default look-back window for recently deferred jobs.
pub const DEFAULT_LIVE_WINDOW: Duration = Duration::from_secs(60 * 60);
/// Live windows above this are lowered to it.
pub const MAX_LIVE_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_SSL_MODE: &str = "prefer";
pub const DEFAULT_QUEUE: &str = "default";

const SSL_MODES: [&str; 6] = [
    "disable",
    "allow",
    "prefer",
    "require",
    "verify-ca",
    "verify-full",
];

/// Configuration errors. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Reading config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Parsing config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("config: {0}")]
    Invalid(String),
    #[error("Invalid duration {0:?}")]
    Duration(String),
    #[error("Connection {0:?} not found")]
    UnknownConnection(String),
    #[error("No config file found; create one at {0} or pass --config")]
    NotFound(String),
}

/// A named store connection. Static once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    pub sslmode: String,
    pub default_queue: String,
}

impl ConnectionProfile {
    /// Connection URL without the password, for logs.
    pub fn display_url(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}?sslmode={}",
            self.username, self.host, self.port, self.database, self.sslmode
        )
    }
}

/// Validated monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub orphan_threshold: Duration,
    pub live_window: Duration,
    pub connections: Vec<ConnectionProfile>,
}

impl MonitorConfig {
    /// Read and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        raw.validate()
    }

    /// Find a connection profile by name.
    pub fn connection(&self, name: &str) -> Result<&ConnectionProfile, ConfigError> {
        self.connections
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ConfigError::UnknownConnection(name.to_string()))
    }

    /// Profile names in file order.
    pub fn connection_names(&self) -> Vec<String> {
        self.connections.iter().map(|c| c.name.clone()).collect()
    }
}

/// Durations as written in YAML: `5s`, `1h30m` or bare seconds.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn resolve(self) -> Result<Duration, ConfigError> {
        match self {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(text) => parse_duration(&text),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConnection {
    #[serde(default)]
    name: String,
    #[serde(default)]
    host: String,
    port: Option<u16>,
    #[serde(default)]
    database: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    sslmode: Option<String>,
    default_queue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    poll_interval: Option<RawDuration>,
    orphan_threshold: Option<RawDuration>,
    live_window: Option<RawDuration>,
    #[serde(default)]
    connections: Vec<RawConnection>,
}

impl RawConfig {
    fn validate(self) -> Result<MonitorConfig, ConfigError> {
        if self.connections.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one connection is required".into(),
            ));
        }

        let mut connections: Vec<ConnectionProfile> = Vec::with_capacity(self.connections.len());
        for (i, raw) in self.connections.into_iter().enumerate() {
            for (field, value) in [
                ("name", &raw.name),
                ("host", &raw.host),
                ("database", &raw.database),
                ("username", &raw.username),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "connections[{i}].{field} is required"
                    )));
                }
            }
            if connections.iter().any(|c| c.name == raw.name) {
                return Err(ConfigError::Invalid(format!(
                    "connections[{i}].name {:?} is already used",
                    raw.name
                )));
            }

            let sslmode = non_empty(raw.sslmode).unwrap_or_else(|| DEFAULT_SSL_MODE.to_string());
            if !SSL_MODES.contains(&sslmode.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "connections[{i}].sslmode {sslmode:?} is not one of {}",
                    SSL_MODES.join(", ")
                )));
            }

            connections.push(ConnectionProfile {
                name: raw.name,
                host: raw.host,
                port: raw.port.filter(|p| *p != 0).unwrap_or(DEFAULT_PORT),
                database: raw.database,
                username: raw.username,
                password: raw.password,
                sslmode,
                default_queue: non_empty(raw.default_queue)
                    .unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            });
        }

        let poll_interval = resolve_or(self.poll_interval, DEFAULT_POLL_INTERVAL)?;
        let orphan_threshold = resolve_or(self.orphan_threshold, DEFAULT_ORPHAN_THRESHOLD)?;
        let live_window = resolve_or(self.live_window, DEFAULT_LIVE_WINDOW)?;

        Ok(MonitorConfig {
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            orphan_threshold: orphan_threshold.max(MIN_ORPHAN_THRESHOLD),
            live_window: live_window.min(MAX_LIVE_WINDOW),
            connections,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn resolve_or(value: Option<RawDuration>, default: Duration) -> Result<Duration, ConfigError> {
    value.map_or(Ok(default), RawDuration::resolve)
}

/// Parse a duration such as `500ms`, `5s`, `30m` or `1h30m`.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::Duration(text.to_string());
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Some(Duration::from_millis(amount)),
            "s" => Some(Duration::from_secs(amount)),
            "m" => amount.checked_mul(60).map(Duration::from_secs),
            "h" => amount.checked_mul(3600).map(Duration::from_secs),
            _ => return Err(invalid()),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}
