use super::MarketDataSource;
use crate::config::ExchangeSettings;
use crate::models::{Candle, CandleInterval, Market, MarketSummary, Sample};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
const REQUEST_TIMEOUT_SECS: u64 = 15;

type BittrexRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Client for the Bittrex public API
///
/// Markets and summaries come from the v1.1 API, candles from v2.
/// Cloneable, all clones share the rate limiter.
#[derive(Clone)]
pub struct BittrexClient {
    client: Client,
    api_url: String,
    ticks_url: String,
    rate_limiter: Arc<BittrexRateLimiter>,
    initial_backoff: Duration,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MarketRaw {
    market_currency: String,
    base_currency: String,
    market_name: String,
    is_active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SummaryRaw {
    market_name: String,
    #[serde(default)]
    volume: Option<Decimal>,
    #[serde(default)]
    base_volume: Option<Decimal>,
    #[serde(default)]
    last: Option<Decimal>,
    time_stamp: String,
}

#[derive(Debug, Deserialize)]
struct CandleRaw {
    #[serde(rename = "O")]
    open: Decimal,
    #[serde(rename = "H")]
    high: Decimal,
    #[serde(rename = "L")]
    low: Decimal,
    #[serde(rename = "C")]
    close: Decimal,
    #[serde(rename = "V")]
    volume: Decimal,
    #[serde(rename = "T")]
    timestamp: String,
    #[serde(rename = "BV", default)]
    base_volume: Decimal,
}

impl From<MarketRaw> for Market {
    fn from(raw: MarketRaw) -> Self {
        Market {
            name: raw.market_name,
            market_asset: raw.market_currency,
            base_asset: raw.base_currency,
            active: raw.is_active,
        }
    }
}

impl TryFrom<SummaryRaw> for MarketSummary {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(raw: SummaryRaw) -> Result<Self> {
        Ok(MarketSummary {
            timestamp: parse_timestamp(&raw.time_stamp)?,
            name: raw.market_name,
            base_volume: raw.base_volume.unwrap_or_default(),
            volume: raw.volume.unwrap_or_default(),
            last_price: raw.last.unwrap_or_default(),
        })
    }
}

impl TryFrom<CandleRaw> for Candle {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(raw: CandleRaw) -> Result<Self> {
        Ok(Candle {
            timestamp: parse_timestamp(&raw.timestamp)?,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
            base_volume: raw.base_volume,
        })
    }
}

/// Bittrex timestamps are UTC without offset, sometimes with a fraction
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim_end_matches('Z');
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| format!("invalid timestamp {:?}: {}", raw, e))?;
    Ok(naive.and_utc())
}

enum Attempt<T> {
    Done(T),
    Retry(String),
}

impl BittrexClient {
    pub fn new(settings: &ExchangeSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let rpm = NonZeroU32::new(settings.requests_per_minute)
            .ok_or("requests_per_minute must be positive")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            ticks_url: settings.ticks_url.trim_end_matches('/').to_string(),
            rate_limiter,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first retry delay (doubles on each further attempt)
    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Rate limited GET with retry on network errors, 429 and 5xx
    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.fetch_once(url, query).await? {
                Attempt::Done(result) => {
                    if attempt > 1 {
                        tracing::info!("✓ {} succeeded after {} attempts", url, attempt);
                    }
                    return Ok(result);
                }
                Attempt::Retry(reason) => {
                    last_error = reason;
                    if attempt < MAX_RETRIES {
                        let backoff = self.initial_backoff * 2_u32.pow(attempt - 1);
                        tracing::warn!(
                            "Attempt {}/{} failed for {}: {}. Retrying in {:?}...",
                            attempt,
                            MAX_RETRIES,
                            url,
                            last_error,
                            backoff
                        );
                        sleep(backoff).await;
                    }
                }
            }
        }

        Err(format!("{} failed after {} attempts: {}", url, MAX_RETRIES, last_error).into())
    }

    async fn fetch_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Attempt<T>> {
        let response = match self.client.get(url).query(query).send().await {
            Ok(response) => response,
            Err(e) => return Ok(Attempt::Retry(format!("network error: {}", e))),
        };

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Ok(Attempt::Retry(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(format!("Bittrex API error ({}) for {}", status, url).into());
        }

        let envelope: Envelope<T> = response.json().await?;
        if !envelope.success {
            return Err(format!("Bittrex rejected request: {}", envelope.message).into());
        }

        envelope
            .result
            .map(Attempt::Done)
            .ok_or_else(|| format!("Bittrex response for {} has no result", url).into())
    }

    async fn get_candles(
        &self,
        endpoint: &str,
        market: &str,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/{}", self.ticks_url, endpoint);
        let raw: Vec<CandleRaw> = self
            .get(
                &url,
                &[("marketName", market), ("tickInterval", interval.as_str())],
            )
            .await?;

        raw.into_iter().map(Candle::try_from).collect()
    }
}

#[async_trait]
impl MarketDataSource for BittrexClient {
    async fn list_markets(&self) -> Result<Vec<Market>> {
        let url = format!("{}/getmarkets", self.api_url);
        let raw: Vec<MarketRaw> = self.get(&url, &[]).await?;
        Ok(raw.into_iter().map(Market::from).collect())
    }

    async fn get_summary(&self, market: &str) -> Result<MarketSummary> {
        let url = format!("{}/getmarketsummary", self.api_url);
        let raw: Vec<SummaryRaw> = self.get(&url, &[("market", market)]).await?;
        let summary = raw
            .into_iter()
            .next()
            .ok_or_else(|| format!("no summary for {}", market))?;
        MarketSummary::try_from(summary)
    }

    async fn get_historical_samples(
        &self,
        market: &str,
        interval: CandleInterval,
    ) -> Result<Vec<Sample>> {
        let mut candles = self.get_candles("GetTicks", market, interval).await?;
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles.iter().map(Candle::to_sample).collect())
    }

    async fn get_latest_sample(&self, market: &str, interval: CandleInterval) -> Result<Sample> {
        let candles = self.get_candles("GetLatestTick", market, interval).await?;
        candles
            .first()
            .map(Candle::to_sample)
            .ok_or_else(|| format!("no latest tick for {}", market).into())
    }
}
