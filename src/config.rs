use eyre::{Context, Result};
use paraflow::ExecutorConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
}

impl Config {
    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let executor = &mut self.executor;

        if let Some(n) = parse_var::<usize>(&lookup, "MAX_PARALLEL_TASKS") {
            executor.max_concurrent_tasks = n;
        }
        if parse_flag(&lookup, "ENABLE_PARALLEL_EXECUTION") == Some(false) {
            executor.max_concurrent_tasks = 1;
        }
        if let Some(secs) = parse_var::<f64>(&lookup, "TASK_TIMEOUT") {
            if secs > 0.0 && secs.is_finite() {
                executor.task_timeout_ms = Some((secs * 1000.0).round() as u64);
            } else {
                log::warn!("Ignoring TASK_TIMEOUT={}: must be a positive number of seconds", secs);
            }
        }
        if let Some(enabled) = parse_flag(&lookup, "ENABLE_RATE_LIMITING") {
            executor.enable_rate_limiting = enabled;
        }
        if let Some(rpm) = parse_var::<u32>(&lookup, "REQUESTS_PER_MINUTE") {
            executor.rate_limit.requests_per_minute = rpm;
        }
        if let Some(burst) = parse_var::<u32>(&lookup, "BURST_CAPACITY") {
            executor.rate_limit.burst_capacity = burst;
        }
    }

    /// Combined view of the parallel execution and rate limiting settings
    pub fn to_json(&self) -> Value {
        let executor = &self.executor;
        let rate_limit = &executor.rate_limit;
        json!({
            "parallel_execution": {
                "enable_parallel_execution": executor.max_concurrent_tasks > 1,
                "max_parallel_tasks": executor.max_concurrent_tasks,
                "task_timeout": executor.task_timeout().map(|t| t.as_secs_f64()),
                "enable_adaptive_scheduling": executor.enable_adaptive_scheduling,
                "backoff_base_ms": executor.backoff_base_ms,
                "max_backoff_ms": executor.max_backoff_ms,
            },
            "rate_limiting": {
                "enable_rate_limiting": executor.enable_rate_limiting,
                "requests_per_minute": rate_limit.requests_per_minute,
                "burst_capacity": rate_limit.burst_capacity,
                "adaptive_adjustment": rate_limit.adaptive_adjustment,
                "min_requests_per_minute": rate_limit.min_requests_per_minute,
                "max_requests_per_minute": rate_limit.max_requests_per_minute,
            },
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => {
            log::warn!("Ignoring {}={:?}: not a boolean", key, raw);
            None
        }
    }
}
