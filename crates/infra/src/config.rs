//! Configuration loading and representation.
//!
//! Sources, in increasing precedence:
//! 1. Default values
//! 2. TOML configuration file (`--config`, `PINKE_CONFIG`, or `./config.toml`)
//! 3. `KEY=VALUE` lines of `./.env`, when present
//! 4. Process environment variables
//!
//! The configuration is loaded once at start-up and never mutated afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pinke_observability::{LogFormat, LoggingConfig};
use pinke_tasks::MIN_CYCLE_TIMEOUT;

/// Optional variables file read from the working directory.
pub const ENV_FILE: &str = ".env";

/// Largest batch a task may select per cycle.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub tasks: TasksConfig,
}

/// Run mode. Release mode refuses the in-memory backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Debug,
    Release,
}

impl RunMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "release" => Some(Self::Release),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub mode: RunMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL. Empty or `memory` selects the in-memory backend.
    #[serde(default)]
    pub url: String,

    /// Max connections in pool (default: 10)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Pool acquire timeout in milliseconds (default: 5000)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

/// Payment/refund provider endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Provider base URL. Empty selects the built-in sandbox gateway.
    #[serde(default)]
    pub base_url: String,

    /// Per-request timeout in milliseconds (default: 3000)
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
}

/// Background task settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Upper bound for `TaskManager::stop` (default: 10000)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub payment: PaymentTaskConfig,

    #[serde(default = "default_refund_schedule")]
    pub refund: TaskSchedule,

    #[serde(default = "default_group_schedule")]
    pub group: TaskSchedule,
}

/// Schedule shared by every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSchedule {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTaskConfig {
    #[serde(flatten)]
    pub schedule: TaskSchedule,

    /// Minimum payment age before it is reconciled (default: 60)
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,

    /// Age after which a still-pending payment is failed (default: 1800)
    #[serde(default = "default_expire_after_secs")]
    pub expire_after_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_gateway_timeout_ms() -> u64 {
    3_000
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    30_000
}

fn default_batch_size() -> usize {
    50
}

fn default_grace_window_secs() -> u64 {
    60
}

fn default_expire_after_secs() -> u64 {
    1_800
}

fn default_refund_schedule() -> TaskSchedule {
    TaskSchedule {
        interval_ms: 60_000,
        ..TaskSchedule::default()
    }
}

fn default_group_schedule() -> TaskSchedule {
    TaskSchedule {
        interval_ms: 60_000,
        batch_size: 100,
        ..TaskSchedule::default()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: RunMode::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: default_gateway_timeout_ms(),
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace_ms(),
            payment: PaymentTaskConfig::default(),
            refund: default_refund_schedule(),
            group: default_group_schedule(),
        }
    }
}

impl Default for TaskSchedule {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for PaymentTaskConfig {
    fn default() -> Self {
        Self {
            schedule: TaskSchedule::default(),
            grace_window_secs: default_grace_window_secs(),
            expire_after_secs: default_expire_after_secs(),
        }
    }
}

impl DatabaseConfig {
    /// True when no Postgres URL is configured.
    pub fn is_in_memory(&self) -> bool {
        let url = self.url.trim();
        url.is_empty() || url.eq_ignore_ascii_case("memory")
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl GatewayConfig {
    pub fn is_sandbox(&self) -> bool {
        self.base_url.trim().is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TasksConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl TaskSchedule {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl PaymentTaskConfig {
    pub fn grace_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_window_secs as i64)
    }

    pub fn expire_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expire_after_secs as i64)
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::Toml { path, source: e })
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Reads `path` when given, otherwise `./config.toml` if it exists, otherwise
    /// starts from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new("config.toml").exists() => Self::from_file("config.toml")?,
            None => Self::default(),
        };

        config.apply_env_overrides(Path::new(ENV_FILE))?;
        Ok(config)
    }

    /// Apply environment overrides: the process environment, falling back to
    /// the variables file at `env_file`. A missing file is not an error.
    ///
    /// Supported environment variables:
    /// - `PINKE_HOST`, `PINKE_PORT`, `PINKE_MODE`
    /// - `DATABASE_URL`, `PINKE_DB_MAX_CONNECTIONS`
    /// - `PINKE_LOG_LEVEL`, `PINKE_LOG_FORMAT`
    /// - `PINKE_GATEWAY_URL`
    pub fn apply_env_overrides(&mut self, env_file: &Path) -> Result<(), ConfigError> {
        let file_vars = read_env_file(env_file)?;
        self.apply_overrides_from(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_vars.get(key).cloned())
        });
        Ok(())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable numeric or enum values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PINKE_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("PINKE_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }

        if let Some(mode) = lookup("PINKE_MODE").and_then(|v| RunMode::parse(&v)) {
            self.server.mode = mode;
        }

        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(max) = lookup("PINKE_DB_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.database.max_connections = max;
        }

        if let Some(level) = lookup("PINKE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("PINKE_LOG_FORMAT").and_then(|v| LogFormat::parse(&v)) {
            self.logging.format = format;
        }

        if let Some(url) = lookup("PINKE_GATEWAY_URL") {
            self.gateway.base_url = url;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port must be non-zero".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be > 0".to_string(),
            ));
        }

        if self.server.mode == RunMode::Release && self.database.is_in_memory() {
            return Err(ConfigError::Validation(
                "database.url is required in release mode".to_string(),
            ));
        }

        if self.gateway.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "gateway.timeout_ms must be > 0".to_string(),
            ));
        }

        if self.tasks.shutdown_grace_ms == 0 {
            return Err(ConfigError::Validation(
                "tasks.shutdown_grace_ms must be > 0".to_string(),
            ));
        }

        for (name, schedule) in [
            ("payment", &self.tasks.payment.schedule),
            ("refund", &self.tasks.refund),
            ("group", &self.tasks.group),
        ] {
            if schedule.interval_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "tasks.{name}.interval_ms must be > 0"
                )));
            }
            if schedule.batch_size == 0 || schedule.batch_size > MAX_BATCH_SIZE {
                return Err(ConfigError::Validation(format!(
                    "tasks.{name}.batch_size must be between 1 and {MAX_BATCH_SIZE}"
                )));
            }
        }

        if !self.gateway.is_sandbox() {
            for (name, schedule) in [
                ("payment", &self.tasks.payment.schedule),
                ("refund", &self.tasks.refund),
            ] {
                let cycle_timeout = schedule.interval().max(MIN_CYCLE_TIMEOUT);
                if schedule.enabled && self.gateway.timeout() >= cycle_timeout {
                    return Err(ConfigError::Validation(format!(
                        "gateway.timeout_ms ({}) must be shorter than the tasks.{name} cycle timeout ({} ms)",
                        self.gateway.timeout_ms,
                        cycle_timeout.as_millis()
                    )));
                }
            }
        }

        if self.tasks.payment.expire_after_secs <= self.tasks.payment.grace_window_secs {
            return Err(ConfigError::Validation(
                "tasks.payment.expire_after_secs must exceed grace_window_secs".to_string(),
            ));
        }

        Ok(())
    }
}

/// Read `KEY=VALUE` lines from a dotenv-style file.
///
/// Blank lines and `#` comments are skipped, an `export ` prefix is accepted and
/// one pair of surrounding quotes is stripped from values.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(parse_env_file(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_env_file(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = unquote(value, '"')
                .or_else(|| unquote(value, '\''))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

fn unquote(value: &str, quote: char) -> Option<&str> {
    value.strip_prefix(quote)?.strip_suffix(quote)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML in {path:?}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
