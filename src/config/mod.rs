//! Configuration management for flipstore
//!
//! Loads from TOML/YAML files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub persistence: PersistenceConfig,
    pub view: ViewConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Bucket width in seconds (one week by default)
    pub window_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding one flip CSV per display name
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewConfig {
    /// Flips per page
    pub page_size: usize,
    /// Only count flips closed in the last N days (0 = all history)
    pub lookback_days: u32,
    /// Restrict to one display name (unset = all accounts)
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (FLIPSTORE_*)
            .add_source(Environment::with_prefix("FLIPSTORE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Built-in defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        Self::builder()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("store.window_secs", crate::store::WEEK_SECS)?
            .set_default("persistence.data_dir", "./data")?
            .set_default("view.page_size", 20)?
            .set_default("view.lookback_days", 0)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?)
    }

    /// Reject values the store cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.store.window_secs <= 0 {
            bail!(
                "store.window_secs must be positive, got {}",
                self.store.window_secs
            );
        }
        if self.view.page_size == 0 {
            bail!("view.page_size must be at least 1");
        }
        Ok(())
    }

    /// Interval start for the configured lookback, relative to `now`
    pub fn view_start_time(&self, now: i64) -> i64 {
        if self.view.lookback_days == 0 {
            0
        } else {
            now - i64::from(self.view.lookback_days) * 24 * 60 * 60
        }
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "window_secs={} data_dir={} page_size={} lookback_days={} display_name={}",
            self.store.window_secs,
            self.persistence.data_dir,
            self.view.page_size,
            self.view.lookback_days,
            self.view.display_name.as_deref().unwrap_or("all")
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
