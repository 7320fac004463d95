use super::{
    Broadcaster, Indicator, IndicatorError, RollingWindow, SubscriberId, Threshold, WindowTriple,
};
use crate::models::{Action, Sample, Signal};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Duration;

/// Parameters of the Volume Price Confirmation Indicator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VpciParams {
    /// Short term moving average length
    pub short_window: usize,
    /// Long term moving average length
    pub long_window: usize,
    /// Number of past VPCI values the trigger band is computed over
    pub deviation_window: usize,
    /// Band width in standard deviations
    pub multiplier: f64,
}

impl Default for VpciParams {
    fn default() -> Self {
        Self {
            short_window: 5,
            long_window: 20,
            deviation_window: 20,
            multiplier: 2.5,
        }
    }
}

impl VpciParams {
    pub fn validate(&self) -> Result<(), IndicatorError> {
        if self.short_window == 0 {
            return Err(IndicatorError::InvalidParams(
                "short_window must be positive".to_string(),
            ));
        }
        if self.long_window <= self.short_window {
            return Err(IndicatorError::InvalidParams(format!(
                "long_window ({}) must be greater than short_window ({})",
                self.long_window, self.short_window
            )));
        }
        if self.deviation_window == 0 {
            return Err(IndicatorError::InvalidParams(
                "deviation_window must be positive".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(IndicatorError::InvalidParams(format!(
                "multiplier must be a positive number, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Longest lookback of any window
    pub fn longest_window(&self) -> usize {
        self.long_window
            .max(self.short_window)
            .max(self.deviation_window)
    }
}

/// Consecutive and total trigger counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HitCounter {
    pub consecutive: u32,
    pub total: u32,
}

impl HitCounter {
    pub fn record(&mut self, hit: bool) {
        if hit {
            self.consecutive += 1;
            self.total += 1;
        } else {
            self.consecutive = 0;
        }
    }
}

/// Result of feeding one sample
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub vpc: Decimal,
    pub vpr: Decimal,
    pub vm: Decimal,
    pub vpci: Decimal,
    /// `None` for fill-only evaluations
    pub threshold: Option<Threshold>,
    pub hit: bool,
}

/// Volume Price Confirmation Indicator with a Bollinger band trigger
///
/// ```text
/// vpc  = vwap(long) - sma(long)
/// vpr  = vwap(short) / sma(short)
/// vm   = avg volume(short) / avg volume(long)
/// vpci = vpc * vpr * vm
/// ```
///
/// A hit is `vpci > mean(last vpcis) + k * stddev(last vpcis)`.
///
/// Owned by a single poller, so only the subscriber list needs locking.
pub struct Vpci {
    market: String,
    short: WindowTriple,
    long: WindowTriple,
    deviations: RollingWindow,
    multiplier: Decimal,
    params: VpciParams,
    hits: HitCounter,
    broadcaster: Broadcaster,
}

impl Vpci {
    pub fn new(
        market: impl Into<String>,
        params: &VpciParams,
        broadcast_timeout: Duration,
    ) -> Result<Self, IndicatorError> {
        params.validate()?;
        let multiplier = Decimal::try_from(params.multiplier).map_err(|e| {
            IndicatorError::InvalidParams(format!("multiplier {}: {}", params.multiplier, e))
        })?;

        Ok(Self {
            market: market.into(),
            short: WindowTriple::new(params.short_window)?,
            long: WindowTriple::new(params.long_window)?,
            deviations: RollingWindow::new(params.deviation_window)?,
            multiplier,
            params: params.clone(),
            hits: HitCounter::default(),
            broadcaster: Broadcaster::new(broadcast_timeout),
        })
    }

    /// Run one evaluation and update state
    ///
    /// Windows are advanced on copies and committed only if every term could
    /// be computed, so an error leaves the indicator exactly as it was.
    pub fn evaluate(
        &mut self,
        sample: &Sample,
        fill_only: bool,
    ) -> Result<Evaluation, IndicatorError> {
        let mut short = self.short.clone();
        let mut long = self.long.clone();
        short.add(sample.price, sample.volume)?;
        long.add(sample.price, sample.volume)?;

        let (vpc, vpr, vm) = components(&short, &long)?;
        let vpci = vpc
            .checked_mul(vpr)
            .and_then(|v| v.checked_mul(vm))
            .ok_or(IndicatorError::Overflow("vpci"))?;

        let mut deviations = self.deviations.clone();
        deviations.add(vpci);

        let threshold = if fill_only {
            None
        } else {
            Some(Threshold::from_window(&deviations, self.multiplier)?)
        };

        self.short = short;
        self.long = long;
        self.deviations = deviations;

        let hit = threshold.is_some_and(|t| t.exceeded_by(vpci));
        if !fill_only {
            self.hits.record(hit);
        }

        Ok(Evaluation {
            vpc,
            vpr,
            vm,
            vpci,
            threshold,
            hit,
        })
    }

    pub fn hits(&self) -> HitCounter {
        self.hits
    }

    pub fn short(&self) -> &WindowTriple {
        &self.short
    }

    pub fn long(&self) -> &WindowTriple {
        &self.long
    }

    pub fn deviations(&self) -> &RollingWindow {
        &self.deviations
    }
}

fn components(
    short: &WindowTriple,
    long: &WindowTriple,
) -> Result<(Decimal, Decimal, Decimal), IndicatorError> {
    let vpc = long
        .vwap()?
        .ok_or(IndicatorError::DivisionByZero("vpc"))?
        .checked_sub(long.price().average()?)
        .ok_or(IndicatorError::Overflow("vpc"))?;

    let vpr = short
        .vwap()?
        .ok_or(IndicatorError::DivisionByZero("vpr"))?
        .checked_div(short.price().average()?)
        .ok_or(IndicatorError::DivisionByZero("vpr"))?;

    let vm = short
        .volume()
        .average()?
        .checked_div(long.volume().average()?)
        .ok_or(IndicatorError::DivisionByZero("vm"))?;

    Ok((vpc, vpr, vm))
}

/// Committed windows always average, the fallback only guards logging
fn average_of(window: &RollingWindow) -> Decimal {
    window.average().unwrap_or_default()
}

#[async_trait]
impl Indicator for Vpci {
    fn name(&self) -> &str {
        &self.market
    }

    fn describe(&self) -> String {
        format!(
            "VPCI({}/{}, band {} x{}) on {}",
            self.params.short_window,
            self.params.long_window,
            self.params.deviation_window,
            self.params.multiplier,
            self.market
        )
    }

    fn warmup_len(&self) -> usize {
        self.params.longest_window()
    }

    fn subscribe(&self, sink: mpsc::Sender<Signal>) -> SubscriberId {
        self.broadcaster.subscribe(sink)
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.broadcaster.unsubscribe(id)
    }

    async fn add_sample(
        &mut self,
        sample: &Sample,
        fill_only: bool,
    ) -> Result<Option<Signal>, IndicatorError> {
        let evaluation = self.evaluate(sample, fill_only)?;
        if fill_only {
            return Ok(None);
        }

        if let Some(threshold) = &evaluation.threshold {
            tracing::debug!(
                market = %self.market,
                timestamp = %sample.timestamp,
                price = %sample.price,
                volume = %sample.volume,
                ma_p = %format!("{} / {}", average_of(self.short.price()), average_of(self.long.price())),
                ma_v = %format!("{} / {}", average_of(self.short.volume()), average_of(self.long.volume())),
                vpc = %evaluation.vpc,
                vpr = %evaluation.vpr,
                vm = %evaluation.vm,
                vpci = %evaluation.vpci,
                basis = %threshold.basis,
                dev = %threshold.deviation,
                "VPCI evaluated"
            );
        }

        if !evaluation.hit {
            return Ok(None);
        }

        let signal = Signal {
            action: Action::Buy,
            market: self.market.clone(),
            consecutive_hits: self.hits.consecutive,
            total_hits: self.hits.total,
            timestamp: sample.timestamp,
        };

        tracing::info!(
            "{:>12} HIT - consecutive: {}, total: {:>3}",
            self.market,
            self.hits.consecutive,
            self.hits.total
        );

        self.broadcaster.broadcast(&signal).await;
        Ok(Some(signal))
    }
}
