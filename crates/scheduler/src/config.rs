use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How evaluation passes are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// A background tick evaluates tasks every `tick_interval_ms`.
    #[default]
    Automatic,
    /// Only explicit `trigger_tasks()` calls evaluate tasks.
    Manual,
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(Self::Automatic),
            "manual" => Ok(Self::Manual),
            other => Err(ConfigError::Invalid(format!("unknown execution mode '{other}'"))),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval of the automatic-mode tick, in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Simultaneous running bodies. 0 = available parallelism.
    #[serde(default)]
    pub max_concurrent_tasks: usize,
    /// Worker pool size. 0 = match the concurrency limit. Never smaller than it.
    #[serde(default)]
    pub worker_threads: usize,
    /// Mode the scheduler starts in.
    #[serde(default)]
    pub start_mode: ExecutionMode,
}

fn default_tick_interval() -> u64 { 50 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            max_concurrent_tasks: 0,
            worker_threads: 0,
            start_mode: ExecutionMode::default(),
        }
    }
}

impl SchedulerConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Resolve the concurrency limit (0 means use available parallelism).
    pub fn resolved_max_concurrent(&self) -> usize {
        if self.max_concurrent_tasks == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent_tasks
        }
    }

    /// Resolve the worker pool size: at least the concurrency limit.
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads.max(self.resolved_max_concurrent())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `STARGAZE_TICK_INTERVAL_MS` -> `tick_interval_ms`
    /// - `STARGAZE_MAX_CONCURRENT_TASKS` -> `max_concurrent_tasks`
    /// - `STARGAZE_WORKER_THREADS` -> `worker_threads`
    /// - `STARGAZE_START_MODE` -> `start_mode` (`automatic` | `manual`)
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse("STARGAZE_TICK_INTERVAL_MS")? {
            self.tick_interval_ms = v;
        }
        if let Some(v) = env_parse("STARGAZE_MAX_CONCURRENT_TASKS")? {
            self.max_concurrent_tasks = v;
        }
        if let Some(v) = env_parse("STARGAZE_WORKER_THREADS")? {
            self.worker_threads = v;
        }
        if let Ok(v) = std::env::var("STARGAZE_START_MODE") {
            self.start_mode = v.parse()?;
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Scheduler config:");
        tracing::info!("  tick:        {}ms", self.tick_interval_ms);
        tracing::info!("  concurrency: {}", self.resolved_max_concurrent());
        tracing::info!("  workers:     {}", self.resolved_worker_threads());
        tracing::info!("  start mode:  {:?}", self.start_mode);
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{key}={v} is not a valid number"))),
        _ => Ok(None),
    }
}
