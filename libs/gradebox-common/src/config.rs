// Sandbox configuration for the grading worker
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/sandbox.json";

const MIN_MEMORY_LIMIT_MB: u32 = 4;
const MIN_STACK_KB: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock ceiling per test case.
    pub timeout_ms: u64,
    /// Heap ceiling per execution context.
    pub memory_limit_mb: u32,
    pub max_stack_kb: u32,
    /// Upper bound on contexts alive at the same time.
    pub max_parallel_tests: usize,
    pub max_source_bytes: usize,
    /// Extra time the host waits past `timeout_ms` before it stops waiting
    /// on a context that ignored its interrupt.
    pub teardown_grace_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            memory_limit_mb: 128,
            max_stack_kb: 1024,
            max_parallel_tests: 4,
            max_source_bytes: 1024 * 1024,
            teardown_grace_ms: 1000,
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let path = config_path.display().to_string();
        let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        let config: SandboxConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;

        config.validate()?;
        Ok(config)
    }

    /// Load `config/sandbox.json` if present, built-in defaults otherwise,
    /// then apply `GRADEBOX_*` environment overrides.
    pub fn load_default() -> Result<Self, ConfigError> {
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        let mut config = if default_path.exists() {
            Self::load(default_path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from any key/value source (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("GRADEBOX_TIMEOUT_MS") {
            self.timeout_ms = parse_override("GRADEBOX_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("GRADEBOX_MEMORY_LIMIT_MB") {
            self.memory_limit_mb = parse_override("GRADEBOX_MEMORY_LIMIT_MB", &value)?;
        }
        if let Some(value) = lookup("GRADEBOX_MAX_PARALLEL_TESTS") {
            self.max_parallel_tests = parse_override("GRADEBOX_MAX_PARALLEL_TESTS", &value)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".to_string()));
        }
        if self.memory_limit_mb < MIN_MEMORY_LIMIT_MB {
            return Err(ConfigError::Invalid(format!(
                "memory_limit_mb must be at least {}",
                MIN_MEMORY_LIMIT_MB
            )));
        }
        if self.max_stack_kb < MIN_STACK_KB {
            return Err(ConfigError::Invalid(format!(
                "max_stack_kb must be at least {}",
                MIN_STACK_KB
            )));
        }
        if self.max_parallel_tests == 0 {
            return Err(ConfigError::Invalid(
                "max_parallel_tests must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_mb as usize * 1024 * 1024
    }

    pub fn max_stack_bytes(&self) -> usize {
        self.max_stack_kb as usize * 1024
    }
}

fn parse_override<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            key,
            value: value.to_string(),
        })
}
