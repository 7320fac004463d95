use crate::api::MarketDataSource;
use crate::config::Settings;
use crate::indicators::{Indicator, Vpci};
use crate::models::{Market, Signal};
use crate::notifier::Notifier;
use crate::poller::{stopped, MarketPoller, StopHandle};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

const SIGNAL_BUFFER: usize = 256;

/// Outcome of replaying history through a fresh indicator
#[derive(Debug, Clone, Default)]
pub struct AnalysisReport {
    /// Samples before `from`, fed fill-only to warm the windows up
    pub warmup: usize,
    pub evaluated: usize,
    pub skipped: usize,
    pub signals: Vec<Signal>,
}

enum Tracked {
    Ready(Box<MarketPoller>),
    Running {
        stop: StopHandle,
        task: JoinHandle<MarketPoller>,
    },
}

struct Dispatcher {
    stop: StopHandle,
    task: JoinHandle<mpsc::Receiver<Signal>>,
}

/// Discovers markets, runs one poller per market and forwards their signals
/// to the notifier
pub struct Scanner {
    settings: Settings,
    source: Arc<dyn MarketDataSource>,
    notifier: Arc<dyn Notifier>,
    markets: HashMap<String, Tracked>,
    signal_tx: mpsc::Sender<Signal>,
    signal_rx: Option<mpsc::Receiver<Signal>>,
    dispatcher: Option<Dispatcher>,
}

impl Scanner {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        settings: Settings,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        Self {
            settings,
            source,
            notifier,
            markets: HashMap::new(),
            signal_tx,
            signal_rx: Some(signal_rx),
            dispatcher: None,
        }
    }

    /// Names of the tracked markets, sorted
    pub fn tracked(&self) -> Vec<String> {
        let mut names: Vec<String> = self.markets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Active markets passing the allow-list, or the base asset and volume filter
    pub async fn discover(&self) -> crate::Result<Vec<Market>> {
        let scanner = &self.settings.scanner;
        let markets = self.source.list_markets().await?;
        tracing::info!("🔍 Exchange lists {} markets", markets.len());

        let mut candidates = Vec::new();
        for market in markets {
            if !market.active {
                tracing::debug!("{} skipped: inactive", market.name);
                continue;
            }
            if !scanner.pairs.is_empty() {
                if scanner.pairs.contains(&market.name) {
                    candidates.push(market);
                } else {
                    tracing::debug!("{} skipped: not in pairs", market.name);
                }
                continue;
            }
            if market.name.starts_with(&format!("{}-", scanner.base_asset)) {
                candidates.push(market);
            } else {
                tracing::debug!("{} skipped: base asset", market.name);
            }
        }

        // An explicit allow-list bypasses the volume filter
        if !scanner.pairs.is_empty() {
            return Ok(candidates);
        }

        let min_volume = scanner.min_daily_volume;
        let summaries = join_all(
            candidates
                .iter()
                .map(|market| self.source.get_summary(&market.name)),
        )
        .await;

        let mut selected = Vec::new();
        for (market, summary) in candidates.into_iter().zip(summaries) {
            match summary {
                Ok(summary) if summary.base_volume >= min_volume => selected.push(market),
                Ok(summary) => tracing::debug!(
                    "{} skipped: 24h volume {} below {}",
                    market.name,
                    summary.base_volume,
                    min_volume
                ),
                Err(e) => tracing::warn!("⚠️  {} skipped: summary failed: {}", market.name, e),
            }
        }

        Ok(selected)
    }

    /// Create the indicator and poller for a market and prefill it from history
    ///
    /// Tracking an already tracked market is a no-op. When the scanner is
    /// running the poller starts right away.
    pub async fn track(&mut self, market: &str) -> crate::Result<()> {
        if self.markets.contains_key(market) {
            tracing::debug!("{} already tracked", market);
            return Ok(());
        }

        let scanner = &self.settings.scanner;
        let vpci = Vpci::new(market, &self.settings.vpci, scanner.broadcast_timeout())?;
        vpci.subscribe(self.signal_tx.clone());

        let mut poller = MarketPoller::new(
            market,
            scanner.interval,
            scanner.feed_policy,
            self.source.clone(),
            Box::new(vpci),
        );

        match self
            .source
            .get_historical_samples(market, scanner.interval)
            .await
        {
            Ok(history) => {
                let fed = poller.prefill(&history, self.settings.prefill_len()).await;
                if fed < poller.indicator().warmup_len() {
                    tracing::warn!(
                        "{} prefilled with {} samples, warm-up needs {}",
                        market,
                        fed,
                        poller.indicator().warmup_len()
                    );
                }
            }
            Err(e) => tracing::warn!("⚠️  {} prefill failed, starting cold: {}", market, e),
        }

        tracing::info!("📈 Tracking {}", poller.indicator().describe());
        let tracked = if self.is_running() {
            spawn_poller(poller)
        } else {
            Tracked::Ready(Box::new(poller))
        };
        self.markets.insert(market.to_string(), tracked);
        Ok(())
    }

    /// Track every market, returns how many are tracked afterwards
    pub async fn track_all(&mut self, markets: &[Market]) -> usize {
        for market in markets {
            if let Err(e) = self.track(&market.name).await {
                tracing::warn!("⚠️  Could not track {}: {}", market.name, e);
            }
        }
        self.markets.len()
    }

    /// Stop and forget a market, returns whether it was tracked
    pub async fn untrack(&mut self, market: &str) -> bool {
        let Some(tracked) = self.markets.remove(market) else {
            return false;
        };

        if let Tracked::Running { stop, task } = tracked {
            stop.stop();
            await_poller(market, task, self.settings.scanner.stop_timeout()).await;
        }
        tracing::info!("Untracked {}", market);
        true
    }

    /// Start the dispatcher and every poller not yet running, returns immediately
    pub fn start_all(&mut self) {
        if self.dispatcher.is_none() {
            self.start_dispatcher();
        }

        let ready: Vec<String> = self
            .markets
            .iter()
            .filter(|(_, tracked)| matches!(tracked, Tracked::Ready(_)))
            .map(|(name, _)| name.clone())
            .collect();

        for name in &ready {
            if let Some(Tracked::Ready(poller)) = self.markets.remove(name) {
                self.markets.insert(name.clone(), spawn_poller(*poller));
            }
        }

        tracing::info!("🚀 Started {} pollers", ready.len());
    }

    fn start_dispatcher(&mut self) {
        let rx = match self.signal_rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
                self.signal_tx = tx;
                rx
            }
        };

        let stop = StopHandle::new();
        let task = tokio::spawn(dispatch(
            rx,
            self.notifier.clone(),
            self.settings.scanner.notification_threshold,
            self.settings.scanner.notify_timeout(),
            stop.clone(),
        ));
        self.dispatcher = Some(Dispatcher { stop, task });
    }

    /// Stop every poller, wait for them bounded by the stop timeout, then stop
    /// the dispatcher
    ///
    /// Stopped pollers are dropped from tracking. Calling it again is a no-op.
    pub async fn stop_all(&mut self) {
        if self.markets.is_empty() && self.dispatcher.is_none() {
            return;
        }

        let stop_timeout = self.settings.scanner.stop_timeout();
        let mut waits = Vec::new();
        for (name, tracked) in self.markets.drain() {
            if let Tracked::Running { stop, task } = tracked {
                stop.stop();
                waits.push(async move { await_poller(&name, task, stop_timeout).await });
            }
        }
        let stopped = waits.len();
        join_all(waits).await;

        if let Some(Dispatcher { stop, mut task }) = self.dispatcher.take() {
            stop.stop();
            match timeout(stop_timeout, &mut task).await {
                Ok(Ok(rx)) => self.signal_rx = Some(rx),
                Ok(Err(e)) => tracing::error!("❌ Signal dispatcher failed: {}", e),
                Err(_) => {
                    task.abort();
                    tracing::warn!("⚠️  Signal dispatcher did not stop within {:?}", stop_timeout);
                }
            }
        }

        if self.signal_rx.is_none() {
            let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
            self.signal_tx = tx;
            self.signal_rx = Some(rx);
        }

        tracing::info!("🛑 Stopped {} pollers", stopped);
    }

    /// Replay `[from, to)` of a market's history through a fresh indicator
    ///
    /// Samples before `from` only warm the windows up.
    pub async fn analyze_range(
        &self,
        market: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> crate::Result<AnalysisReport> {
        tracing::info!("Starting market analysis for {}", market);
        if let Some(from) = from {
            tracing::info!("from: {}", from);
        }
        if let Some(to) = to {
            tracing::info!("  to: {}", to);
        }

        let scanner = &self.settings.scanner;
        let mut vpci = Vpci::new(market, &self.settings.vpci, scanner.broadcast_timeout())?;
        let history = self
            .source
            .get_historical_samples(market, scanner.interval)
            .await?;

        let mut report = AnalysisReport::default();
        for sample in &history {
            if to.is_some_and(|to| sample.timestamp >= to) {
                break;
            }
            let fill_only = from.is_some_and(|from| sample.timestamp < from);

            match vpci.add_sample(sample, fill_only).await {
                Ok(_) if fill_only => report.warmup += 1,
                Ok(signal) => {
                    report.evaluated += 1;
                    if let Some(signal) = signal {
                        report.signals.push(signal);
                    }
                }
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!("{} @ {} skipped: {}", market, sample.timestamp, e);
                }
            }
        }

        tracing::info!(
            "Analysis of {} done: {} evaluated, {} skipped, {} signals",
            market,
            report.evaluated,
            report.skipped,
            report.signals.len()
        );
        Ok(report)
    }
}

fn spawn_poller(poller: MarketPoller) -> Tracked {
    let stop = poller.stop_handle();
    let task = tokio::spawn(poller.run());
    Tracked::Running { stop, task }
}

async fn await_poller(market: &str, mut task: JoinHandle<MarketPoller>, limit: Duration) {
    match timeout(limit, &mut task).await {
        Ok(Ok(poller)) => tracing::debug!("{} stopped in state {:?}", market, poller.state()),
        Ok(Err(e)) => tracing::error!("❌ {} poller failed: {}", market, e),
        Err(_) => {
            task.abort();
            tracing::warn!("⚠️  {} poller did not stop within {:?}, aborted", market, limit);
        }
    }
}

/// Forward signals to the notifier until stopped, hands the receiver back
async fn dispatch(
    mut rx: mpsc::Receiver<Signal>,
    notifier: Arc<dyn Notifier>,
    threshold: u32,
    notify_timeout: Duration,
    stop: StopHandle,
) -> mpsc::Receiver<Signal> {
    let mut stop_rx = stop.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut stop_rx) => break,
            signal = rx.recv() => match signal {
                Some(signal) => deliver(notifier.as_ref(), &signal, threshold, notify_timeout).await,
                None => break,
            },
        }
    }
    rx
}

async fn deliver(notifier: &dyn Notifier, signal: &Signal, threshold: u32, limit: Duration) {
    tracing::info!("🎯 {}", signal);
    if signal.consecutive_hits < threshold {
        tracing::debug!(
            "{} below notification threshold ({} < {})",
            signal.market,
            signal.consecutive_hits,
            threshold
        );
        return;
    }

    let context = format!("{} signal", signal.action);
    match timeout(limit, notifier.notify(&context, &signal.to_string())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("⚠️  Notification for {} failed: {}", signal.market, e),
        Err(_) => tracing::warn!(
            "⚠️  Notification for {} timed out after {:?}",
            signal.market,
            limit
        ),
    }
}
