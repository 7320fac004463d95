// Startup configuration
// defaults < optional TOML file < BITBOT__SECTION__KEY environment variables

use crate::indicators::VpciParams;
use crate::models::CandleInterval;
use crate::poller::FeedPolicy;
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::time::Duration;

const ENV_PREFIX: &str = "BITBOT";
const DEFAULT_CONFIG_NAME: &str = "bitbot";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub scanner: ScannerSettings,
    pub vpci: VpciParams,
    pub exchange: ExchangeSettings,
}

/// Which markets to track and how to poll them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScannerSettings {
    /// Explicit allow-list of market names, empty means filter by base asset and volume
    pub pairs: Vec<String>,
    /// Base asset markets must start with when no allow-list is given
    pub base_asset: String,
    /// Minimum 24h base volume when no allow-list is given
    pub min_daily_volume: Decimal,
    pub interval: CandleInterval,
    /// Historical samples to prefill, 0 sizes prefill to the longest window
    pub prefill_count: usize,
    /// Consecutive hits before a signal is sent to the notifier, 0 notifies every hit
    pub notification_threshold: u32,
    pub feed_policy: FeedPolicy,
    pub broadcast_timeout_secs: u64,
    pub notify_timeout_secs: u64,
    pub stop_timeout_secs: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            base_asset: "BTC".to_string(),
            min_daily_volume: Decimal::ZERO,
            interval: CandleInterval::ThirtyMin,
            prefill_count: 0,
            notification_threshold: 0,
            feed_policy: FeedPolicy::default(),
            broadcast_timeout_secs: 10,
            notify_timeout_secs: 10,
            stop_timeout_secs: 10,
        }
    }
}

impl ScannerSettings {
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_secs(self.broadcast_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Exchange endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExchangeSettings {
    /// Public v1.1 API (markets, summaries)
    pub api_url: String,
    /// v2 API serving candles
    pub ticks_url: String,
    pub requests_per_minute: u32,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_url: "https://bittrex.com/api/v1.1/public".to_string(),
            ticks_url: "https://bittrex.com/Api/v2.0/pub/market".to_string(),
            requests_per_minute: 60,
        }
    }
}

impl Settings {
    /// Load and validate settings
    ///
    /// Without `path`, `bitbot.toml` in the working directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scanner.pairs"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would produce meaningless signals
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vpci
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let scanner = &self.scanner;
        if scanner.min_daily_volume < Decimal::ZERO {
            return Err(ConfigError::Validation(format!(
                "min_daily_volume must be a non-negative number, got {}",
                scanner.min_daily_volume
            )));
        }
        if scanner.pairs.is_empty() && scanner.base_asset.is_empty() {
            return Err(ConfigError::Validation(
                "either pairs or base_asset must be set".to_string(),
            ));
        }
        for (name, secs) in [
            ("broadcast_timeout_secs", scanner.broadcast_timeout_secs),
            ("notify_timeout_secs", scanner.notify_timeout_secs),
            ("stop_timeout_secs", scanner.stop_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Validation(format!("{} must be positive", name)));
            }
        }
        if self.exchange.requests_per_minute == 0 {
            return Err(ConfigError::Validation(
                "requests_per_minute must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Samples to prefill each indicator with
    pub fn prefill_len(&self) -> usize {
        self.scanner.prefill_count.max(self.vpci.longest_window())
    }
}
