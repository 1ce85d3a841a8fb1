//! Configuration types for the mentions sync layer.

use crate::backoff::BackoffConfig;
use crate::error::{Result, SyncError};
use crate::model::JanitorScope;
use crate::process::{AutoUpdatePolicy, JanitorPolicy, TokenMonitorPolicy, interval_secs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`ClockConfig::ping_token`].
pub const CLOCK_TOKEN_ENV: &str = "MENTIONS_SYNC_CLOCK_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Where ticks come from.
    pub clock: ClockConfig,
    /// Intervals of the tick-driven processes.
    pub schedule: ScheduleConfig,
    /// Storage scopes purged by janitors.
    pub janitor: JanitorConfig,
    /// Durable process state.
    pub state: StateConfig,
    /// Polling retry timings used by the client.
    pub backoff: BackoffSettings,
}

/// Tick source selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Free-running in-process interval timer.
    #[default]
    Local,
    /// Ticks arrive as authenticated HTTP pings from an external scheduler.
    External,
}

/// Clock configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub mode: ClockMode,
    /// Local clock period in milliseconds.
    pub tick_interval_ms: u64,
    /// Bind host for the ping endpoint.
    pub listen_host: String,
    /// Bind port for the ping endpoint (`0` picks a free port).
    pub listen_port: u16,
    /// Bearer token expected on `POST /clock/tick`.
    pub ping_token: Option<String>,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            mode: ClockMode::Local,
            tick_interval_ms: 1_000,
            listen_host: "127.0.0.1".to_owned(),
            listen_port: 7_431,
            ping_token: None,
        }
    }
}

impl ClockConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Ping token, preferring the environment over the file.
    pub fn resolved_ping_token(&self) -> Option<String> {
        std::env::var(CLOCK_TOKEN_ENV)
            .ok()
            .or_else(|| self.ping_token.clone())
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty())
    }
}

/// Intervals of the tick-driven processes, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub auto_update_interval_secs: u64,
    pub token_retry_interval_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            auto_update_interval_secs: 60,
            token_retry_interval_secs: 60,
            cleanup_interval_secs: 3_600,
        }
    }
}

impl ScheduleConfig {
    pub fn auto_update_policy(&self) -> AutoUpdatePolicy {
        AutoUpdatePolicy {
            interval: interval_secs(self.auto_update_interval_secs),
        }
    }

    pub fn token_monitor_policy(&self) -> TokenMonitorPolicy {
        TokenMonitorPolicy {
            retry_interval: interval_secs(self.token_retry_interval_secs),
        }
    }

    pub fn janitor_policy(&self) -> JanitorPolicy {
        JanitorPolicy {
            cleanup_interval: interval_secs(self.cleanup_interval_secs),
        }
    }
}

/// Janitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
    /// One janitor is registered per scope at startup.
    pub scopes: Vec<String>,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            scopes: vec!["default".to_owned()],
        }
    }
}

impl JanitorConfig {
    pub fn scope_keys(&self) -> Vec<JanitorScope> {
        self.scopes.iter().map(JanitorScope::new).collect()
    }
}

/// Durable state location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory for per-kind JSON state files. `None` keeps state in memory.
    pub dir: Option<PathBuf>,
}

/// Backoff timings as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub growth_factor: f64,
    pub time_limit_secs: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            min_delay_ms: 250,
            max_delay_ms: 8_000,
            growth_factor: 2.0,
            time_limit_secs: 30,
        }
    }
}

impl BackoffSettings {
    /// Validated retry timing.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Backoff`] for inconsistent timings.
    pub fn to_backoff(&self) -> Result<BackoffConfig> {
        BackoffConfig::builder()
            .min_delay(Duration::from_millis(self.min_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .growth_factor(self.growth_factor)
            .time_limit(Duration::from_secs(self.time_limit_secs))
            .build()
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/mentions-sync/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config)
                .join("mentions-sync")
                .join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("mentions-sync")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/mentions-sync-config/config.toml")
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.clock.mode == ClockMode::Local && self.clock.tick_interval_ms == 0 {
            return Err(SyncError::Config(
                "clock.tick_interval_ms must be non-zero".to_owned(),
            ));
        }
        if self.clock.mode == ClockMode::External && self.clock.resolved_ping_token().is_none() {
            return Err(SyncError::Config(format!(
                "external clock needs clock.ping_token or {CLOCK_TOKEN_ENV}"
            )));
        }
        if self.janitor.scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(SyncError::Config(
                "janitor.scopes must not contain empty names".to_owned(),
            ));
        }
        self.backoff
            .to_backoff()
            .map_err(|e| SyncError::Config(format!("backoff: {e}")))?;
        Ok(())
    }
}
