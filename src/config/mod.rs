//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::coordinator::CoordinatorSettings;
use crate::application::reindex::ReindexSettings;

pub use cli::{
    ByTagArgs, CliArgs, Command, CreateArgs, GetArgs, GlobalOverrides, SearchArgs, UpdateArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "postsync";
const ENV_PREFIX: &str = "POSTSYNC";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CACHE_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_TIMEOUT_MS: u64 = 250;
const DEFAULT_SEARCH_URL: &str = "http://127.0.0.1:9200";
const DEFAULT_SEARCH_INDEX: &str = "posts";
const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_REINDEX_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_REINDEX_WORKERS: u64 = 2;
const DEFAULT_REINDEX_QUEUE_CAPACITY: u64 = 1_024;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub search: SearchSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub url: String,
    pub ttl: Duration,
    pub timeout: Duration,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub enabled: bool,
    pub url: String,
    pub index: String,
    pub timeout: Duration,
    pub reindex_timeout: Duration,
    pub reindex_workers: NonZeroUsize,
    pub reindex_queue_capacity: NonZeroUsize,
    /// How long shutdown waits for queued reindex jobs.
    pub shutdown_grace: Duration,
}

impl Settings {
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            cache_ttl: self.cache.ttl,
            cache_timeout: self.cache.timeout,
            cache_key_prefix: self.cache.key_prefix.clone(),
            store_timeout: self.database.timeout,
            search_timeout: self.search.timeout,
            reindex: ReindexSettings {
                timeout: self.search.reindex_timeout,
                workers: self.search.reindex_workers,
                queue_capacity: self.search.reindex_queue_capacity,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    search: RawSearchSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(url) = overrides.cache_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(url) = overrides.search_url.as_ref() {
            self.search.url = Some(url.clone());
        }
        if let Some(enabled) = overrides.search_enabled {
            self.search.enabled = Some(enabled);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            search,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;
        let search = build_search_settings(search)?;

        Ok(Self {
            logging,
            database,
            cache,
            search,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;
    let timeout = millis(
        database.timeout_ms.unwrap_or(DEFAULT_DB_TIMEOUT_MS),
        "database.timeout_ms",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let url = non_blank(cache.url).unwrap_or_else(|| DEFAULT_CACHE_URL.to_string());

    let ttl_secs = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }
    let timeout = millis(
        cache.timeout_ms.unwrap_or(DEFAULT_CACHE_TIMEOUT_MS),
        "cache.timeout_ms",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        url,
        ttl: Duration::from_secs(ttl_secs),
        timeout,
        key_prefix: cache.key_prefix.unwrap_or_default(),
    })
}

fn build_search_settings(search: RawSearchSettings) -> Result<SearchSettings, LoadError> {
    let url = non_blank(search.url).unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string());

    let index = non_blank(search.index).unwrap_or_else(|| DEFAULT_SEARCH_INDEX.to_string());
    if index.contains('/') || index.chars().any(char::is_uppercase) {
        return Err(LoadError::invalid(
            "search.index",
            "index names must be lowercase and must not contain `/`",
        ));
    }

    let timeout = millis(
        search.timeout_ms.unwrap_or(DEFAULT_SEARCH_TIMEOUT_MS),
        "search.timeout_ms",
    )?;
    let reindex_timeout = millis(
        search
            .reindex_timeout_ms
            .unwrap_or(DEFAULT_REINDEX_TIMEOUT_MS),
        "search.reindex_timeout_ms",
    )?;
    let reindex_workers = non_zero_usize(
        search.reindex_workers.unwrap_or(DEFAULT_REINDEX_WORKERS),
        "search.reindex_workers",
    )?;
    let reindex_queue_capacity = non_zero_usize(
        search
            .reindex_queue_capacity
            .unwrap_or(DEFAULT_REINDEX_QUEUE_CAPACITY),
        "search.reindex_queue_capacity",
    )?;
    let shutdown_grace = millis(
        search
            .shutdown_grace_ms
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS),
        "search.shutdown_grace_ms",
    )?;

    Ok(SearchSettings {
        enabled: search.enabled.unwrap_or(true),
        url,
        index,
        timeout,
        reindex_timeout,
        reindex_workers,
        reindex_queue_capacity,
        shutdown_grace,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    url: Option<String>,
    ttl_seconds: Option<u64>,
    timeout_ms: Option<u64>,
    key_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSearchSettings {
    enabled: Option<bool>,
    url: Option<String>,
    index: Option<String>,
    timeout_ms: Option<u64>,
    reindex_timeout_ms: Option<u64>,
    reindex_workers: Option<u64>,
    reindex_queue_capacity: Option<u64>,
    shutdown_grace_ms: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
