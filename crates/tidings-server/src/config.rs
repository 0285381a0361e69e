//! Server configuration loading from file and environment variables.

use indexmap::IndexMap;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use tidings_types::Action;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Event delivery settings.
    #[serde(default)]
    pub events: EventsConfig,

    /// Listeners, called in the order they appear in the file.
    #[serde(default = "default_listeners")]
    pub listeners: IndexMap<String, ListenerConfig>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// How long a writer waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tidings_events=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Events buffered per `/events` subscriber before it starts lagging.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

/// Built-in listener implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerKind {
    /// One structured log line per event.
    Log,
    /// Fan-out to the `/events` stream.
    Broadcast,
}

/// One `[listeners.<name>]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListenerConfig {
    pub kind: ListenerKind,

    /// Actions to listen to; empty means all.
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Resource names to listen to; empty means all.
    #[serde(default)]
    pub resources: Vec<String>,
}

impl ListenerConfig {
    fn of(kind: ListenerKind) -> Self {
        Self {
            kind,
            actions: Vec::new(),
            resources: Vec::new(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "tidings.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_listeners() -> IndexMap<String, ListenerConfig> {
    IndexMap::from([
        ("log".to_string(), ListenerConfig::of(ListenerKind::Log)),
        ("stream".to_string(), ListenerConfig::of(ListenerKind::Broadcast)),
    ])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            events: EventsConfig::default(),
            listeners: default_listeners(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is syntactically fine but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Parses configuration from TOML text and validates it.
///
/// # Errors
///
/// `ConfigError::Parse` on malformed TOML, `ConfigError::Invalid` on values
/// the server cannot run with.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(contents)?;
    validate(&config)?;
    Ok(config)
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TIDINGS_HOST` overrides `server.host`
/// - `TIDINGS_PORT` overrides `server.port`
/// - `TIDINGS_DB_PATH` overrides `database.path`
/// - `TIDINGS_LOG_LEVEL` overrides `logging.level`
/// - `TIDINGS_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting configuration is invalid.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(host) = std::env::var("TIDINGS_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("TIDINGS_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("TIDINGS_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("TIDINGS_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("TIDINGS_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.events.broadcast_capacity == 0 {
        return Err(ConfigError::Invalid(
            "events.broadcast_capacity must be at least 1".to_string(),
        ));
    }
    if config.database.pool_max_size == 0 {
        return Err(ConfigError::Invalid(
            "database.pool_max_size must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.path, "tidings.db");
        assert_eq!(config.events.broadcast_capacity, 256);
        let names: Vec<_> = config.listeners.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["log", "stream"]);
    }

    #[test]
    fn listeners_keep_file_order_and_filters() {
        let config = parse_config(
            r#"
            [listeners.stream]
            kind = "broadcast"
            resources = ["widgets"]

            [listeners.audit]
            kind = "log"
            actions = ["create", "delete"]
            "#,
        )
        .unwrap();

        let names: Vec<_> = config.listeners.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["stream", "audit"]);
        assert_eq!(config.listeners["stream"].kind, ListenerKind::Broadcast);
        assert_eq!(config.listeners["stream"].resources, vec!["widgets"]);
        assert_eq!(
            config.listeners["audit"].actions,
            vec![Action::Create, Action::Delete]
        );
    }

    #[test]
    fn unknown_listener_kind_is_rejected() {
        let err = parse_config(
            r#"
            [listeners.pager]
            kind = "sms"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = parse_config("[events]\nbroadcast_capacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert!(!config.listeners.is_empty());
    }
}
