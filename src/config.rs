//! Service configuration.
//!
//! Layered with figment: built-in defaults, then the TOML file
//! (`checkin.toml`, or the path in `CHECKIN_CONFIG`), then environment
//! variables prefixed `CHECKIN_` with `__` separating nested keys, e.g.
//! `CHECKIN_SERVICE__PORT=4000` or `CHECKIN_BOOKINGS__AUTO_DELETE=true`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Days, NaiveDate};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineOptions;
use crate::identity::StaticUser;
use crate::limits::{DEFAULT_RETENTION_DAYS, DEFAULT_TASK_INTERVAL};
use crate::model::Area;

pub const CONFIG_PATH_ENV: &str = "CHECKIN_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "checkin.toml";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub bookings: RetentionConfig,
    pub visitors: RetentionConfig,
    pub tracing: TracingConfig,
    pub settings: SettingsConfig,
    /// Areas upserted into the store at startup.
    pub areas: Vec<Area>,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind: String,
    pub port: u16,
    /// development, staging or production. Picks the log level.
    pub environment: String,
    /// How often the retention sweep runs, e.g. "15m" or "1h 30m".
    pub task_interval: String,
    pub max_connections: usize,
    pub store_timeout_secs: u64,
    pub metrics_port: Option<u16>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
            environment: "development".into(),
            task_interval: "15m".into(),
            max_connections: 256,
            store_timeout_secs: 10,
            metrics_port: None,
        }
    }
}

impl ServiceConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Sweep interval. Unparsable or zero values fall back to 15 minutes.
    pub fn task_interval(&self) -> Duration {
        match humantime::parse_duration(self.task_interval.trim()) {
            Ok(d) if !d.is_zero() => d,
            Ok(_) | Err(_) => {
                tracing::warn!(
                    task_interval = %self.task_interval,
                    "could not parse duration, using default 15 minute interval for tasks"
                );
                DEFAULT_TASK_INTERVAL
            }
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.environment.to_ascii_lowercase().as_str() {
            "development" | "dev" => "trace",
            "staging" => "debug",
            "production" | "prod" => "warn",
            _ => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Compact the WAL once this many appends accumulated.
    pub compact_threshold: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
        }
    }
}

impl StoreConfig {
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("checkin.wal")
    }
}

/// Retention policy for one kind of document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub auto_delete: bool,
    pub delete_after_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            auto_delete: false,
            delete_after_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl RetentionConfig {
    /// Retention age in days; non-positive values fall back to 14.
    pub fn retention_days(&self) -> u64 {
        if self.delete_after_days > 0 {
            self.delete_after_days as u64
        } else {
            DEFAULT_RETENTION_DAYS as u64
        }
    }

    /// Documents dated on or before this day are expired.
    pub fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(self.retention_days()))
            .unwrap_or(NaiveDate::MIN)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Contact tracing only accepts addresses with this suffix, e.g. "@example.org".
    pub mail_domain: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub location_managers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub users: Vec<StaticUser>,
}

// ── Loading ─────────────────────────────────────────────────────────

impl Config {
    /// Path of the TOML layer.
    pub fn path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CHECKIN_").split("__"))
    }

    /// Load from the default path and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(&Self::path()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.max_connections == 0 {
            return Err(invalid("service.max_connections", "must be at least 1"));
        }
        if self.service.store_timeout_secs == 0 {
            return Err(invalid("service.store_timeout_secs", "must be at least 1"));
        }
        if self.store.compact_threshold == 0 {
            return Err(invalid("store.compact_threshold", "must be at least 1"));
        }
        for area in &self.areas {
            if area.id.trim().is_empty() {
                return Err(invalid("areas", format!("area '{}' has no id", area.name)));
            }
        }
        for user in &self.identity.users {
            if user.token.is_empty() || user.user_id.is_empty() {
                return Err(invalid("identity.users", format!("user '{}' needs a token and a user_id", user.email)));
            }
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            store_timeout: self.service.store_timeout(),
            contact_trace_domain: self
                .tracing
                .mail_domain
                .as_deref()
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty()),
        }
    }
}
