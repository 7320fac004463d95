use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A tradable exchange market, e.g. `BTC-ETH`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Market {
    pub name: String,
    pub market_asset: String,
    pub base_asset: String,
    pub active: bool,
}

/// 24h summary of a market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub name: String,
    pub base_volume: Decimal,
    pub volume: Decimal,
    pub last_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// OHLCV candlestick as served by the exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub base_volume: Decimal,
}

impl Candle {
    /// Reduce the candle to the (close, volume) pair the indicators consume
    pub fn to_sample(&self) -> Sample {
        Sample {
            timestamp: self.timestamp,
            price: self.close,
            volume: self.volume,
        }
    }
}

/// One (price, volume) observation for a candle period
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Decimal,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, price: Decimal, volume: Decimal) -> Self {
        Self {
            timestamp,
            price,
            volume,
        }
    }

    /// A sample is only new if its period starts strictly after `other`'s
    pub fn is_newer_than(&self, other: &Sample) -> bool {
        self.timestamp > other.timestamp
    }
}

/// Candle period, serialized with the exchange's names
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CandleInterval {
    #[serde(rename = "oneMin")]
    OneMin,
    #[serde(rename = "fiveMin")]
    FiveMin,
    #[serde(rename = "thirtyMin")]
    ThirtyMin,
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "day")]
    Day,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMin => "oneMin",
            CandleInterval::FiveMin => "fiveMin",
            CandleInterval::ThirtyMin => "thirtyMin",
            CandleInterval::Hour => "hour",
            CandleInterval::Day => "day",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            CandleInterval::OneMin => Duration::from_secs(60),
            CandleInterval::FiveMin => Duration::from_secs(5 * 60),
            CandleInterval::ThirtyMin => Duration::from_secs(30 * 60),
            CandleInterval::Hour => Duration::from_secs(60 * 60),
            CandleInterval::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Action {
    Buy,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
        }
    }
}

/// Emitted when an indicator crosses its trigger threshold
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub action: Action,
    pub market: String,
    pub consecutive_hits: u32,
    pub total_hits: u32,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} - consecutive: {}, total: {}",
            self.action,
            self.market,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.consecutive_hits,
            self.total_hits
        )
    }
}
