// Streaming technical indicators
// VPCI with a Bollinger style trigger, built on rolling decimal windows

pub mod broadcast;
pub mod rolling_window;
pub mod threshold;
pub mod vpci;
pub mod window_triple;

pub use broadcast::{BroadcastReport, Broadcaster, SubscriberId};
pub use rolling_window::RollingWindow;
pub use threshold::{population_std_dev, Threshold};
pub use vpci::{Evaluation, HitCounter, Vpci, VpciParams};
pub use window_triple::WindowTriple;

use crate::models::{Sample, Signal};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised while building or evaluating an indicator
///
/// Evaluation errors only ever cost the current cycle; the poller logs them
/// and moves on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("window capacity must be at least 1, got {0}")]
    InvalidWindow(usize),

    #[error("invalid indicator parameters: {0}")]
    InvalidParams(String),

    #[error("division by zero computing {0}")]
    DivisionByZero(&'static str),

    #[error("decimal overflow computing {0}")]
    Overflow(&'static str),

    #[error("standard deviation of an empty window")]
    EmptyWindow,

    #[error("square root of negative variance")]
    Numeric,
}

/// An indicator that consumes one sample per closed period and notifies
/// subscribers whenever it triggers.
///
/// Pollers only talk to this trait, so new indicator kinds plug in without
/// touching the polling loop.
#[async_trait]
pub trait Indicator: Send + Sync {
    /// Name of the tracked market
    fn name(&self) -> &str;

    /// Human readable description including parameters
    fn describe(&self) -> String;

    /// Number of historical samples needed before live evaluation is meaningful
    fn warmup_len(&self) -> usize;

    /// Register a sink for this indicator's signals
    fn subscribe(&self, sink: mpsc::Sender<Signal>) -> SubscriberId;

    fn unsubscribe(&self, id: SubscriberId);

    /// Feed one sample
    ///
    /// With `fill_only` the windows are updated but the trigger is not
    /// evaluated. On a hit the signal is broadcast to subscribers and returned.
    async fn add_sample(
        &mut self,
        sample: &Sample,
        fill_only: bool,
    ) -> Result<Option<Signal>, IndicatorError>;
}
