use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use convoy::{FileSource, MigratorConfig, RedisBackendConfig};

pub const CONFIG_FILE: &str = "convoy.toml";

/// Project context for convoy operations
pub struct ProjectContext {
    /// Directory holding convoy.toml
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub config: ConvoyConfig,
}

/// Configuration stored in convoy.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvoyConfig {
    #[serde(default)]
    pub migrations: MigrationsSettings,
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub lock: LockSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationsSettings {
    #[serde(default = "default_migrations_dir")]
    pub dir: String,
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for MigrationsSettings {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
            extension: default_extension(),
        }
    }
}

fn default_migrations_dir() -> String {
    "migrations".to_string()
}

fn default_extension() -> String {
    "lua".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            namespace: default_namespace(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

fn default_redis_url() -> String {
    "${REDIS_URL}".to_string()
}

fn default_namespace() -> String {
    RedisBackendConfig::DEFAULT_NAMESPACE.to_string()
}

fn default_lock_ttl_secs() -> u64 {
    RedisBackendConfig::DEFAULT_LOCK_TTL.as_secs()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// 0 retries until the lock is free
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            max_attempts: 0,
        }
    }
}

fn default_retry_interval_ms() -> u64 {
    MigratorConfig::DEFAULT_LOCK_RETRY_INTERVAL.as_millis() as u64
}

impl ProjectContext {
    /// Find and load project context from current directory or ancestors
    pub fn find() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::find_from(&current_dir)
    }

    /// Find project context starting from the given directory
    pub fn find_from(start: &Path) -> Result<Self> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(CONFIG_FILE).is_file() {
                return Self::from_root(current);
            }
            if !current.pop() {
                anyhow::bail!(
                    "Could not find {CONFIG_FILE} in {start:?} or any parent directory. \
                     Run 'convoy init' first."
                );
            }
        }
    }

    /// Load context from a directory containing convoy.toml
    pub fn from_root(project_root: PathBuf) -> Result<Self> {
        let config_path = project_root.join(CONFIG_FILE);
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: ConvoyConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Self {
            project_root,
            config_path,
            config,
        })
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.project_root.join(&self.config.migrations.dir)
    }

    pub fn source(&self) -> FileSource {
        FileSource::new(self.migrations_dir(), self.config.migrations.extension.as_str())
    }

    /// Redis URL from the command line if given, else from the config file
    pub fn redis_url(&self, cli_url: Option<&str>) -> Result<String> {
        match cli_url {
            Some(url) => Ok(url.to_string()),
            None => expand_env(&self.config.redis.url),
        }
    }

    pub fn redis_config(&self) -> RedisBackendConfig {
        RedisBackendConfig::default()
            .with_namespace(self.config.redis.namespace.as_str())
            .with_lock_ttl(Duration::from_secs(self.config.redis.lock_ttl_secs))
    }

    pub fn migrator_config(&self, max_attempts: Option<u32>) -> MigratorConfig {
        let max_attempts = max_attempts.unwrap_or(self.config.lock.max_attempts);
        MigratorConfig::default()
            .with_lock_retry_interval(Duration::from_millis(self.config.lock.retry_interval_ms))
            .with_max_lock_attempts(NonZeroU32::new(max_attempts))
    }
}

/// Replace every `${VAR}` with the value of the environment variable.
pub fn expand_env(value: &str) -> Result<String> {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unterminated ${{...}} in {value:?}"))?;
        let var_name = &after[..end];
        let var_value =
            std::env::var(var_name).with_context(|| format!("Environment variable {var_name} not set"))?;
        expanded.push_str(&var_value);
        rest = &after[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}
