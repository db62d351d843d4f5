//! TOML configuration with per-section defaults and environment overrides.

use crate::models::TransactionType;
use crate::scrapers::types::IndexConfig;
use crate::scrapers::{BrowserOptions, ExtractTimings};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Read, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// `MONGO_URI` and `MONGO_DB_NAME` win over the file
    pub fn apply_env(&mut self) {
        if let Ok(uri) = std::env::var("MONGO_URI") {
            if !uri.trim().is_empty() {
                self.store.mongo_uri = Some(uri);
            }
        }
        if let Ok(name) = std::env::var("MONGO_DB_NAME") {
            if !name.trim().is_empty() {
                self.store.mongo_database = name;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        match self.store.backend {
            StoreBackend::Sqlite => {
                if self.store.sqlite_path.as_os_str().is_empty() {
                    errors.push("store.sqlite_path must not be empty".to_string());
                }
            }
            StoreBackend::Mongo => {
                if self.store.mongo_uri.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    errors.push("store.mongo_uri (or MONGO_URI) is required for the mongo backend".to_string());
                }
                if self.store.mongo_database.is_empty() {
                    errors.push("store.mongo_database must not be empty".to_string());
                }
                if self.store.mongo_collection.is_empty() {
                    errors.push("store.mongo_collection must not be empty".to_string());
                }
            }
        }

        if self.harvest.max_pages == 0 {
            errors.push("harvest.max_pages must be positive".to_string());
        }
        if self.harvest.stop_after_known == 0 {
            errors.push("harvest.stop_after_known must be positive".to_string());
        }
        if self.harvest.indices.is_empty() {
            errors.push("harvest.indices must list at least one index".to_string());
        }
        for index in &self.harvest.indices {
            if url::Url::parse(&index.url).is_err() {
                errors.push(format!("harvest index url '{}' is not a valid URL", index.url));
            }
        }

        if self.browser.window_width == 0 || self.browser.window_height == 0 {
            errors.push("browser window size must be positive".to_string());
        }
        if self.timeouts.index_wait_secs == 0 {
            errors.push("timeouts.index_wait_secs must be positive".to_string());
        }
        if self.timeouts.http_timeout_secs == 0 || self.timeouts.image_timeout_secs == 0 {
            errors.push("HTTP timeouts must be positive".to_string());
        }
        if self.schedule.interval_secs == Some(0) {
            errors.push("schedule.interval_secs must be positive when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Mongo,
}

/// Which backend holds the listings and how to reach it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    #[serde(default)]
    pub mongo_uri: Option<String>,
    #[serde(default = "default_mongo_database")]
    pub mongo_database: String,
    #[serde(default = "default_mongo_collection")]
    pub mongo_collection: String,
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("listings.db")
}

fn default_mongo_database() -> String {
    "coldbot".to_string()
}

fn default_mongo_collection() -> String {
    "listings".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: default_sqlite_path(),
            mongo_uri: None,
            mongo_database: default_mongo_database(),
            mongo_collection: default_mongo_collection(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Index pages walked per index and run
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub save_images: bool,
    #[serde(default = "default_images_root")]
    pub images_root: PathBuf,
    /// Consecutive unchanged known listings that end an index walk
    #[serde(default = "default_stop_after_known")]
    pub stop_after_known: u32,
    #[serde(default = "default_indices")]
    pub indices: Vec<IndexConfig>,
}

fn default_max_pages() -> u32 {
    2
}

fn default_images_root() -> PathBuf {
    PathBuf::from("images")
}

fn default_stop_after_known() -> u32 {
    1
}

/// Newest-first sale and rent indices of both sites
pub fn default_indices() -> Vec<IndexConfig> {
    vec![
        IndexConfig::new(
            "https://www.athome.lu/vente/?tr=buy&sort=date_desc",
            TransactionType::Sale,
        ),
        IndexConfig::new(
            "https://www.athome.lu/location/?tr=rent&sort=date_desc",
            TransactionType::Rent,
        ),
        IndexConfig::new(
            "https://www.immotop.lu/vente-maisons-appartements/luxembourg-pays/?criterio=dataModifica&ordine=desc",
            TransactionType::Sale,
        ),
        IndexConfig::new(
            "https://www.immotop.lu/location-maisons-appartements/luxembourg-pays/?criterio=dataModifica&ordine=desc",
            TransactionType::Rent,
        ),
    ]
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            save_images: false,
            images_root: default_images_root(),
            stop_after_known: default_stop_after_known(),
            indices: default_indices(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_true() -> bool {
    true
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: default_window_width(),
            window_height: default_window_height(),
            user_agent: default_user_agent(),
        }
    }
}

impl BrowserConfig {
    pub fn options(&self, timeouts: &TimeoutsConfig) -> BrowserOptions {
        BrowserOptions {
            headless: self.headless,
            window_width: self.window_width,
            window_height: self.window_height,
            user_agent: self.user_agent.clone(),
            call_timeout: Duration::from_secs(timeouts.index_wait_secs.max(timeouts.http_timeout_secs) + 10),
        }
    }
}

/// Every bounded wait in the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_index_wait_secs")]
    pub index_wait_secs: u64,
    #[serde(default = "default_title_wait_secs")]
    pub title_wait_secs: u64,
    #[serde(default = "default_title_fallback_delay_ms")]
    pub title_fallback_delay_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_click_settle_ms")]
    pub click_settle_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,
}

fn default_index_wait_secs() -> u64 {
    20
}

fn default_title_wait_secs() -> u64 {
    5
}

fn default_title_fallback_delay_ms() -> u64 {
    2000
}

fn default_settle_ms() -> u64 {
    300
}

fn default_click_settle_ms() -> u64 {
    500
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_image_timeout_secs() -> u64 {
    12
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            index_wait_secs: default_index_wait_secs(),
            title_wait_secs: default_title_wait_secs(),
            title_fallback_delay_ms: default_title_fallback_delay_ms(),
            settle_ms: default_settle_ms(),
            click_settle_ms: default_click_settle_ms(),
            http_timeout_secs: default_http_timeout_secs(),
            image_timeout_secs: default_image_timeout_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn extract_timings(&self) -> ExtractTimings {
        ExtractTimings {
            title_wait: Duration::from_secs(self.title_wait_secs),
            title_fallback_delay: Duration::from_millis(self.title_fallback_delay_ms),
            settle: Duration::from_millis(self.settle_ms),
            click_settle: Duration::from_millis(self.click_settle_ms),
        }
    }

    pub fn index_wait(&self) -> Duration {
        Duration::from_secs(self.index_wait_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Re-run every N seconds; absent means a single run
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

/// Log output format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Log severity level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}
