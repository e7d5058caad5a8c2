/*!
common/src/lib.rs

Shared configuration types and DB helper functions for the news deframer.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default file with an optional override file
- Environment overrides (`DATABASE_FILE`, `SOURCE`, `AI_URL`, `AI_MODEL`, `HTTP_PORT`)
- A helper to initialize the SQLite connection pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/deframer.db")
    pub path: String,
}

/// Location of the source document (feeds + prompt templates, JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: String,
}

/// Rendered-feed cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// A cached feed younger than this is not downloaded again
    pub max_age_minutes: Option<u64>,
}

/// Background refresh worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub interval_minutes: Option<u64>,
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub fetch_timeout_seconds: Option<u64>,
    pub user_agent: Option<String>,
    pub max_retries: Option<u32>,
}

/// Completion endpoint config (OpenAI-compatible chat API, e.g. LM Studio or Ollama)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    /// Name of the env var holding the API key. Local servers usually need none.
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Attempts per item before the item is published unrevised
    pub max_attempts: Option<u32>,
}

/// HTTP listener
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub cache: Option<CacheConfig>,
    pub scheduler: Option<SchedulerConfig>,
    pub politeness: Option<PolitenessConfig>,
    pub llm: Option<LlmConfig>,
    pub server: Option<ServerConfig>,
}

pub const DEFAULT_MAX_AGE_MINUTES: u64 = 90;
pub const DEFAULT_INTERVAL_MINUTES: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

impl Config {
    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("DATABASE_FILE") {
            self.database.path = path;
        }
        if let Some(path) = lookup("SOURCE") {
            self.source.path = path;
        }
        if let Some(url) = lookup("AI_URL") {
            self.llm.get_or_insert_with(LlmConfig::default).api_url = Some(url);
        }
        if let Some(model) = lookup("AI_MODEL") {
            self.llm.get_or_insert_with(LlmConfig::default).model = Some(model);
        }
        if let Some(port) = lookup("HTTP_PORT") {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("HTTP_PORT is not a port number: {}", port))?;
            self.server
                .get_or_insert_with(ServerConfig::default)
                .port = Some(port);
        }
        Ok(())
    }

    /// Cheap sanity checks run once after loading.
    pub fn validate(&self) -> Result<()> {
        if let Some(api_url) = self.llm.as_ref().and_then(|l| l.api_url.as_deref()) {
            url::Url::parse(api_url).with_context(|| format!("llm.api_url is not a valid URL: {}", api_url))?;
        }
        if self.max_age_minutes() == 0 {
            anyhow::bail!("cache.max_age_minutes must be greater than zero");
        }
        if self.interval_minutes() == 0 {
            anyhow::bail!("scheduler.interval_minutes must be greater than zero");
        }
        Ok(())
    }

    pub fn max_age_minutes(&self) -> u64 {
        self.cache
            .as_ref()
            .and_then(|c| c.max_age_minutes)
            .unwrap_or(DEFAULT_MAX_AGE_MINUTES)
    }

    pub fn interval_minutes(&self) -> u64 {
        self.scheduler
            .as_ref()
            .and_then(|s| s.interval_minutes)
            .unwrap_or(DEFAULT_INTERVAL_MINUTES)
    }

    pub fn max_attempts(&self) -> u32 {
        self.llm
            .as_ref()
            .and_then(|l| l.max_attempts)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
            .max(1)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// This function will create the parent directory if necessary and return a configured
/// `SqlitePool` in WAL mode. The pool is kept small: the deframer writes from a single
/// worker and the HTTP routes only read.
///
/// Schema creation is the caller's job (`deframer::storage::ensure_schema`).
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    tracing::debug!(path, "sqlite pool ready");
    Ok(pool)
}
