//! # Configuration Management
//!
//! Centralized configuration for the relay and the worker protocol constants.
//!
//! This module provides structured configuration for the SSH listener, the
//! trust roster synchronisation, the spawned worker and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Command-line and environment overrides applied by the binary
//!
//! ## Wire Constants
//! The worker protocol constants live here as well: magic numbers, the
//! protocol version, the `StderrLast` sentinel and the per-field string limits.

use crate::error::{constants, RelayError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Client magic sent first by the connecting Nix client ("cxin")
pub const WORKER_MAGIC_1: u64 = 0x6E69_7863;

/// Server magic answered by the worker ("ioxd")
pub const WORKER_MAGIC_2: u64 = 0x6478_696F;

/// Protocol version 1.34, encoded as major << 8 | minor
pub const PROTOCOL_VERSION: u64 = 1 << 8 | 34;

/// "No more log output for this step" ("stla")
pub const STDERR_LAST: u64 = 0x616C_7473;

/// Version string reported to clients during the handshake
pub const DAEMON_VERSION: &str = "2.11.2";

/// Maximum length of a single store path argument
pub const MAX_PATH_LEN: u64 = 1024 * 4;

/// Maximum length of each element of a string list
pub const MAX_LIST_ITEM_LEN: u64 = 2048;

/// Maximum length of a serialized realisation
pub const MAX_REALISATION_LEN: u64 = 1024 * 10;

/// Maximum length of the path fields of a narinfo record
pub const MAX_NARINFO_PATH_LEN: u64 = 1024 * 10;

/// Maximum length of the hash and content-address fields of a narinfo record
pub const MAX_NARINFO_HASH_LEN: u64 = 1024;

/// Fixed size estimates reported by QueryMissing
pub const PLACEHOLDER_DOWNLOAD_SIZE: u64 = 100;
pub const PLACEHOLDER_NAR_SIZE: u64 = 100;

/// Default GitHub GraphQL endpoint
pub const GITHUB_GRAPHQL_ENDPOINT: &str = "https://api.github.com/graphql";

/// Main relay configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RelayConfig {
    /// SSH listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Trust roster synchronisation
    #[serde(default)]
    pub roster: RosterConfig,

    /// Worker process configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| RelayError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| RelayError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| RelayError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.roster.validate());
        errors.extend(self.worker.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RelayError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// SSH listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:2222")
    pub listen_address: String,

    /// Path of the SSH host key
    pub host_key_path: PathBuf,

    /// Maximum number of concurrently admitted sessions
    pub max_sessions: usize,

    /// How long a new session may wait for a free slot
    #[serde(with = "duration_serde")]
    pub new_connection_timeout: Duration,

    /// Delay applied by the transport before answering a rejected login
    #[serde(with = "duration_serde")]
    pub auth_rejection_time: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from("0.0.0.0:2222"),
            host_key_path: PathBuf::from("./ssh_host_ed25519_key"),
            max_sessions: 2,
            new_connection_timeout: timeout::NEW_CONNECTION_TIMEOUT,
            auth_rejection_time: timeout::AUTH_REJECTION_TIME,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listen_address.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: '0.0.0.0:2222')",
                self.listen_address
            ));
        }

        if self.host_key_path.as_os_str().is_empty() {
            errors.push("Host key path cannot be empty".to_string());
        }

        if self.max_sessions == 0 {
            errors.push("Max sessions must be greater than 0".to_string());
        } else if self.max_sessions > 10_000 {
            errors.push(format!(
                "Max sessions very high: {} (each session runs a worker process)",
                self.max_sessions
            ));
        }

        if self.new_connection_timeout.is_zero() {
            errors.push("New connection timeout must be greater than 0".to_string());
        } else if self.new_connection_timeout.as_secs() > 300 {
            errors.push("New connection timeout too long (maximum: 300s)".to_string());
        }

        if self.auth_rejection_time.as_secs() > 10 {
            errors.push("Auth rejection time too long (maximum: 10s)".to_string());
        }

        errors
    }
}

/// Trust roster synchronisation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RosterConfig {
    /// Organization the team belongs to
    pub organization: String,

    /// Team whose members' keys are trusted
    pub team: String,

    /// API token; takes precedence over `token_path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// File the API token is read from on every refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_path: Option<PathBuf>,

    /// GraphQL endpoint
    pub endpoint: String,

    /// Interval between roster refreshes
    #[serde(with = "duration_serde")]
    pub refresh_interval: Duration,

    /// Deadline for each roster query
    #[serde(with = "duration_serde")]
    pub query_timeout: Duration,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            organization: String::new(),
            team: String::new(),
            token: None,
            token_path: None,
            endpoint: String::from(GITHUB_GRAPHQL_ENDPOINT),
            refresh_interval: timeout::ROSTER_REFRESH_INTERVAL,
            query_timeout: timeout::ROSTER_QUERY_TIMEOUT,
        }
    }
}

impl RosterConfig {
    /// Validate roster configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.organization.is_empty() {
            errors.push("GitHub organization is required".to_string());
        }

        if self.team.is_empty() {
            errors.push("GitHub team is required".to_string());
        }

        let has_token = self.token.as_deref().is_some_and(|t| !t.trim().is_empty());
        if !has_token && self.token_path.is_none() {
            errors.push(constants::ERR_MISSING_TOKEN.to_string());
        }

        if self.endpoint.is_empty() {
            errors.push("GraphQL endpoint cannot be empty".to_string());
        }

        if self.refresh_interval.as_secs() < 1 {
            errors.push("Refresh interval too short (minimum: 1s)".to_string());
        }

        if self.query_timeout.as_millis() < 100 {
            errors.push("Query timeout too short (minimum: 100ms)".to_string());
        }

        errors
    }

    /// Resolve the API token.
    ///
    /// The token file is read on every call so a rotated token is picked up on
    /// the next refresh. The file is expected to be replaced atomically.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.token.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(token.trim().to_string());
        }

        match &self.token_path {
            Some(path) => std::fs::read_to_string(path)
                .map(|token| token.trim().to_string())
                .map_err(|e| {
                    RelayError::ConfigError(format!(
                        "couldn't read token from {}: {e}",
                        path.display()
                    ))
                }),
            None => Err(RelayError::ConfigError(constants::ERR_MISSING_TOKEN.into())),
        }
    }
}

/// Worker process configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Program spawned per session; the running executable when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,

    /// Arguments passed to the worker program
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,
}

fn default_worker_args() -> Vec<String> {
    vec!["worker".to_string(), "--stdio".to_string()]
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: default_worker_args(),
        }
    }
}

impl WorkerConfig {
    /// Validate worker configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(program) = &self.program {
            if program.as_os_str().is_empty() {
                errors.push("Worker program cannot be empty".to_string());
            }
        }
        errors
    }

    /// The program to spawn, falling back to the running executable
    pub fn resolve_program(&self) -> Result<PathBuf> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().map_err(|e| {
                RelayError::ConfigError(format!("cannot locate current executable: {e}"))
            }),
        }
    }
}

/// Log output style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// Human-readable console output
    #[default]
    Development,
    /// JSON lines
    Production,
}

impl std::str::FromStr for LogMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(LogMode::Development),
            "production" => Ok(LogMode::Production),
            other => Err(RelayError::ConfigError(format!(
                "Invalid log mode: {other} (expected development or production)"
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub level: Level,

    /// Output style
    pub mode: LogMode,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            mode: LogMode::Development,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.mode == LogMode::Production && self.level == Level::TRACE {
            errors.push("WARNING: trace logging in production mode logs session payloads".to_string());
        }
        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
