pub mod bittrex;

pub use bittrex::BittrexClient;

use crate::models::{CandleInterval, Market, MarketSummary, Sample};
use crate::Result;
use async_trait::async_trait;

/// Exchange data consumed by the scanner and pollers
///
/// Every call is fallible; callers decide whether an error skips a market,
/// a cycle, or aborts.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn list_markets(&self) -> Result<Vec<Market>>;

    async fn get_summary(&self, market: &str) -> Result<MarketSummary>;

    /// Candles for the interval, oldest first, the newest one still open
    async fn get_historical_samples(
        &self,
        market: &str,
        interval: CandleInterval,
    ) -> Result<Vec<Sample>>;

    /// Current (open) candle of the interval
    async fn get_latest_sample(&self, market: &str, interval: CandleInterval) -> Result<Sample>;
}
