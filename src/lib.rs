// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod indicators;
pub mod models;
pub mod notifier;
pub mod poller;
pub mod scanner;

// Re-export commonly used types
pub use api::{BittrexClient, MarketDataSource};
pub use config::Settings;
pub use indicators::{Indicator, Vpci};
pub use models::*;
pub use notifier::{LogNotifier, Notifier};
pub use poller::{FeedPolicy, MarketPoller};
pub use scanner::{AnalysisReport, Scanner};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
