use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use lockctl_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Connection string used when nothing else is configured
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/lockctl";

/// `.env` files seen by [`load_dotenv`]
///
/// Loading happens before tracing is initialized, so the outcome is kept
/// and logged afterwards.
#[derive(Debug, Default)]
pub struct DotenvFiles {
    pub loaded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl DotenvFiles {
    pub fn log(&self) {
        for (path, err) in &self.failed {
            debug!("Failed to load {}: {}", path.display(), err);
        }
        if self.loaded.is_empty() {
            debug!("No .env files found (current dir or ~/.lockctl)");
        } else {
            let paths: Vec<_> = self.loaded.iter().map(|p| p.display().to_string()).collect();
            info!("Loaded environment from: {}", paths.join(", "));
        }
    }
}

/// Load environment variables from .env files
///
/// Priority order (highest to lowest):
/// 1. Environment variables already set
/// 2. Current directory .env
/// 3. ~/.lockctl/.env
pub fn load_dotenv() -> DotenvFiles {
    let mut files = DotenvFiles::default();

    if let Ok(path) = dotenvy::dotenv() {
        files.loaded.push(path);
    }

    if let Some(env_file) = config_dir().map(|dir| dir.join(".env")) {
        if env_file.exists() {
            // dotenvy doesn't overwrite existing vars
            match dotenvy::from_path(&env_file) {
                Ok(()) => files.loaded.push(env_file),
                Err(e) => files.failed.push((env_file, e.to_string())),
            }
        }
    }

    files
}

/// Get the lockctl config directory path (~/.lockctl)
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lockctl"))
}

// ============================================================================
// TOML Configuration
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockctlConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string (overridden by --database-url / DATABASE_URL)
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub max_connections: Option<u32>,

    /// Row-lock wait limit per transaction
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub base_delay_ms: Option<u64>,

    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

impl LockctlConfig {
    /// Default config file path: ~/.lockctl/config.toml
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load config from an explicit path (must exist) or the default path (optional).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid TOML")
    }

    /// Resolve the connection string: flag/env first, then file, then default.
    pub fn database_url(&self, from_cli: Option<&str>) -> String {
        from_cli
            .map(str::to_owned)
            .or_else(|| self.database.url.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
    }

    pub fn max_connections(&self) -> u32 {
        self.database
            .max_connections
            .unwrap_or(lockctl_pg::DEFAULT_MAX_CONNECTIONS)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.database.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Retry policy with file overrides applied over the library defaults
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self
                .retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: self
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }
}
