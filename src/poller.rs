use crate::api::MarketDataSource;
use crate::indicators::Indicator;
use crate::models::{CandleInterval, Sample};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

/// Lifecycle of a poller, `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

/// How long to sleep before the next fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Waiting for the current period to close
    Short,
    /// A fresh period was just captured, back off
    Long,
}

impl PollMode {
    pub fn delay(&self, interval: Duration) -> Duration {
        match self {
            PollMode::Short => short_poll(interval),
            PollMode::Long => long_poll(interval),
        }
    }
}

pub fn short_poll(interval: Duration) -> Duration {
    interval / 30
}

pub fn long_poll(interval: Duration) -> Duration {
    interval * 4 / 5
}

/// Which sample is evaluated when a new period is detected
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedPolicy {
    /// Evaluate the previously accepted sample, i.e. the period that just
    /// closed, as it looked when it was captured. Signals lag one period.
    #[default]
    ClosedPeriod,
    /// Evaluate the freshly fetched sample of the period that just opened
    Latest,
}

/// Cancellation flag shared between a poller and whoever stops it
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop, calling it again is a no-op
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once a stop was requested
pub async fn stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Polls one market and feeds each closed period to its indicator
pub struct MarketPoller {
    market: String,
    interval: CandleInterval,
    policy: FeedPolicy,
    source: Arc<dyn MarketDataSource>,
    indicator: Box<dyn Indicator>,
    last_accepted: Option<Sample>,
    last_seen: Option<Sample>,
    mode: PollMode,
    state: PollerState,
    stop: StopHandle,
}

impl MarketPoller {
    pub fn new(
        market: impl Into<String>,
        interval: CandleInterval,
        policy: FeedPolicy,
        source: Arc<dyn MarketDataSource>,
        indicator: Box<dyn Indicator>,
    ) -> Self {
        Self {
            market: market.into(),
            interval,
            policy,
            source,
            indicator,
            last_accepted: None,
            last_seen: None,
            mode: PollMode::Short,
            state: PollerState::Idle,
            stop: StopHandle::new(),
        }
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn last_accepted(&self) -> Option<&Sample> {
        self.last_accepted.as_ref()
    }

    pub fn last_seen(&self) -> Option<&Sample> {
        self.last_seen.as_ref()
    }

    pub fn indicator(&self) -> &dyn Indicator {
        self.indicator.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Delay before the next fetch in the current mode
    pub fn next_delay(&self) -> Duration {
        self.mode.delay(self.interval.duration())
    }

    /// Seed the indicator with up to `count` closed historical samples
    ///
    /// `history` is oldest first and its newest entry is the still open period.
    /// Returns the number of samples fed.
    pub async fn prefill(&mut self, history: &[Sample], count: usize) -> usize {
        let Some((newest, closed)) = history.split_last() else {
            return 0;
        };

        let mut fed = 0;
        for sample in &closed[closed.len().saturating_sub(count)..] {
            match self.indicator.add_sample(sample, true).await {
                Ok(_) => fed += 1,
                Err(e) => tracing::warn!(
                    market = %self.market,
                    timestamp = %sample.timestamp,
                    "Skipping prefill sample: {}",
                    e
                ),
            }
        }

        // Under ClosedPeriod the open period gets evaluated once the next one starts
        self.last_accepted = match self.policy {
            FeedPolicy::ClosedPeriod => Some(*newest),
            FeedPolicy::Latest => closed.last().copied(),
        };
        self.last_seen = self.last_accepted;

        tracing::debug!(market = %self.market, "Prefilled {} samples", fed);
        fed
    }

    /// One fetch/evaluate cycle, returns the mode deciding the next delay
    pub async fn poll_once(&mut self) -> PollMode {
        let sample = match self
            .source
            .get_latest_sample(&self.market, self.interval)
            .await
        {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(market = %self.market, "GetLatestTick failed: {}", e);
                self.mode = PollMode::Short;
                return self.mode;
            }
        };

        self.last_seen = Some(sample);

        let is_new = self
            .last_accepted
            .map_or(true, |last| sample.is_newer_than(&last));
        if !is_new {
            self.mode = PollMode::Short;
            return self.mode;
        }

        let to_evaluate = match self.policy {
            FeedPolicy::ClosedPeriod => self.last_accepted,
            FeedPolicy::Latest => Some(sample),
        };
        self.last_accepted = Some(sample);

        if let Some(to_evaluate) = to_evaluate {
            if let Err(e) = self.indicator.add_sample(&to_evaluate, false).await {
                tracing::warn!(
                    market = %self.market,
                    timestamp = %to_evaluate.timestamp,
                    "Skipping evaluation: {}",
                    e
                );
            }
        }

        self.mode = PollMode::Long;
        self.mode
    }

    /// Poll until stopped
    ///
    /// A stop during a sleep or a fetch ends the loop before any further fetch.
    pub async fn run(mut self) -> Self {
        if self.state == PollerState::Stopped {
            return self;
        }

        let mut stop_rx = self.stop.subscribe();
        self.state = PollerState::Running;
        tracing::info!(
            "🔄 Polling {} every {} ({})",
            self.market,
            self.interval,
            self.indicator.describe()
        );

        while !self.stop.is_stopped() {
            tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                _ = self.poll_once() => {}
            }

            let delay = self.next_delay();
            tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                _ = sleep(delay) => {}
            }
        }

        self.state = PollerState::Stopped;
        tracing::info!("{} polling stopped", self);
        self
    }
}

impl std::fmt::Display for MarketPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.last_accepted {
            Some(sample) => write!(
                f,
                "{}@{}",
                self.market,
                sample.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => write!(f, "{}", self.market),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{IndicatorError, SubscriberId, Vpci, VpciParams};
    use crate::models::{Market, MarketSummary, Signal};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hour)
    }

    fn sample(hour: i64, price: i64, volume: i64) -> Sample {
        Sample::new(at(hour), Decimal::from(price), Decimal::from(volume))
    }

    /// Serves queued latest samples, repeating the last one when the queue runs dry
    #[derive(Default)]
    struct ScriptedSource {
        latest: Mutex<VecDeque<Option<Sample>>>,
        current: Mutex<Option<Sample>>,
        fetches: AtomicUsize,
        hang: bool,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<Sample>>) -> Self {
            Self {
                latest: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Default::default()
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn list_markets(&self) -> crate::Result<Vec<Market>> {
            Ok(Vec::new())
        }

        async fn get_summary(&self, market: &str) -> crate::Result<MarketSummary> {
            Err(format!("no summary for {}", market).into())
        }

        async fn get_historical_samples(
            &self,
            _market: &str,
            _interval: CandleInterval,
        ) -> crate::Result<Vec<Sample>> {
            Ok(Vec::new())
        }

        async fn get_latest_sample(
            &self,
            _market: &str,
            _interval: CandleInterval,
        ) -> crate::Result<Sample> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }

            let next = self.latest.lock().pop_front();
            match next {
                Some(Some(sample)) => {
                    *self.current.lock() = Some(sample);
                    Ok(sample)
                }
                Some(None) => Err("connection reset".into()),
                None => (*self.current.lock()).ok_or_else(|| "no data".into()),
            }
        }
    }

    /// Records every sample it is fed
    struct RecordingIndicator {
        fed: Arc<Mutex<Vec<(Sample, bool)>>>,
    }

    #[async_trait]
    impl Indicator for RecordingIndicator {
        fn name(&self) -> &str {
            "BTC-ETH"
        }

        fn describe(&self) -> String {
            "recorder".to_string()
        }

        fn warmup_len(&self) -> usize {
            0
        }

        fn subscribe(&self, _sink: mpsc::Sender<Signal>) -> SubscriberId {
            unimplemented!()
        }

        fn unsubscribe(&self, _id: SubscriberId) {}

        async fn add_sample(
            &mut self,
            sample: &Sample,
            fill_only: bool,
        ) -> Result<Option<Signal>, IndicatorError> {
            self.fed.lock().push((*sample, fill_only));
            Ok(None)
        }
    }

    fn recording_poller(
        source: Arc<ScriptedSource>,
        policy: FeedPolicy,
    ) -> (MarketPoller, Arc<Mutex<Vec<(Sample, bool)>>>) {
        let fed = Arc::new(Mutex::new(Vec::new()));
        let indicator = RecordingIndicator { fed: fed.clone() };
        let poller = MarketPoller::new(
            "BTC-ETH",
            CandleInterval::Hour,
            policy,
            source,
            Box::new(indicator),
        );
        (poller, fed)
    }

    #[test]
    fn test_poll_delays() {
        let hour = Duration::from_secs(3600);
        assert_eq!(short_poll(hour), Duration::from_secs(120));
        assert_eq!(long_poll(hour), Duration::from_secs(2880));
        assert_eq!(PollMode::Short.delay(hour), short_poll(hour));
        assert_eq!(PollMode::Long.delay(hour), long_poll(hour));
    }

    #[tokio::test]
    async fn test_mode_switch() {
        let source = Arc::new(ScriptedSource::new(vec![
            Some(sample(0, 100, 10)),
            Some(sample(0, 101, 12)),
            None,
            Some(sample(1, 102, 11)),
        ]));
        let (mut poller, _) = recording_poller(source, FeedPolicy::ClosedPeriod);
        let hour = Duration::from_secs(3600);

        // New sample => long poll
        assert_eq!(poller.poll_once().await, PollMode::Long);
        assert_eq!(poller.next_delay(), hour * 4 / 5);

        // Same period => short poll
        assert_eq!(poller.poll_once().await, PollMode::Short);
        assert_eq!(poller.next_delay(), hour / 30);
        assert_eq!(poller.last_seen().unwrap().price, Decimal::from(101));
        assert_eq!(poller.last_accepted().unwrap().price, Decimal::from(100));

        // Fetch error => short poll, state kept
        assert_eq!(poller.poll_once().await, PollMode::Short);
        assert_eq!(poller.last_accepted().unwrap().timestamp, at(0));

        assert_eq!(poller.poll_once().await, PollMode::Long);
        assert_eq!(poller.last_accepted().unwrap().timestamp, at(1));
    }

    #[tokio::test]
    async fn test_older_sample_is_not_new() {
        let source = Arc::new(ScriptedSource::new(vec![
            Some(sample(5, 100, 10)),
            Some(sample(4, 100, 10)),
        ]));
        let (mut poller, fed) = recording_poller(source, FeedPolicy::Latest);

        assert_eq!(poller.poll_once().await, PollMode::Long);
        assert_eq!(poller.poll_once().await, PollMode::Short);
        assert_eq!(fed.lock().len(), 1);
        assert_eq!(poller.last_accepted().unwrap().timestamp, at(5));
    }

    #[tokio::test]
    async fn test_closed_period_feeds_previous_sample() {
        let source = Arc::new(ScriptedSource::new(vec![
            Some(sample(0, 100, 10)),
            Some(sample(1, 101, 11)),
            Some(sample(2, 102, 12)),
        ]));
        let (mut poller, fed) = recording_poller(source, FeedPolicy::ClosedPeriod);

        for _ in 0..3 {
            poller.poll_once().await;
        }

        let fed = fed.lock();
        let timestamps: Vec<_> = fed.iter().map(|(s, _)| s.timestamp).collect();
        assert_eq!(timestamps, vec![at(0), at(1)]);
        assert!(fed.iter().all(|(_, fill_only)| !fill_only));
    }

    #[tokio::test]
    async fn test_latest_feeds_fetched_sample() {
        let source = Arc::new(ScriptedSource::new(vec![
            Some(sample(0, 100, 10)),
            Some(sample(1, 101, 11)),
            Some(sample(2, 102, 12)),
        ]));
        let (mut poller, fed) = recording_poller(source, FeedPolicy::Latest);

        for _ in 0..3 {
            poller.poll_once().await;
        }

        let timestamps: Vec<_> = fed.lock().iter().map(|(s, _)| s.timestamp).collect();
        assert_eq!(timestamps, vec![at(0), at(1), at(2)]);
    }

    #[tokio::test]
    async fn test_prefill_closed_period() {
        let history: Vec<Sample> = (0..10).map(|h| sample(h, 100, 10)).collect();
        let source = Arc::new(ScriptedSource::new(vec![Some(sample(10, 100, 10))]));
        let (mut poller, fed) = recording_poller(source, FeedPolicy::ClosedPeriod);

        assert_eq!(poller.prefill(&history, 5).await, 5);
        {
            let fed = fed.lock();
            let timestamps: Vec<_> = fed.iter().map(|(s, _)| s.timestamp).collect();
            assert_eq!(timestamps, vec![at(4), at(5), at(6), at(7), at(8)]);
            assert!(fed.iter().all(|(_, fill_only)| *fill_only));
        }
        assert_eq!(poller.last_accepted().unwrap().timestamp, at(9));

        // The open period from the history is evaluated once the next one starts
        poller.poll_once().await;
        let last = *fed.lock().last().unwrap();
        assert_eq!(last, (sample(9, 100, 10), false));
    }

    #[tokio::test]
    async fn test_prefill_latest() {
        let history: Vec<Sample> = (0..10).map(|h| sample(h, 100, 10)).collect();
        let source = Arc::new(ScriptedSource::new(vec![Some(sample(9, 100, 10))]));
        let (mut poller, fed) = recording_poller(source, FeedPolicy::Latest);

        assert_eq!(poller.prefill(&history, 100).await, 9);
        assert_eq!(poller.last_accepted().unwrap().timestamp, at(8));

        // The open period is picked up by the first live fetch
        assert_eq!(poller.poll_once().await, PollMode::Long);
        let last = *fed.lock().last().unwrap();
        assert_eq!(last, (sample(9, 100, 10), false));
    }

    #[tokio::test]
    async fn test_prefill_empty_history() {
        let source = Arc::new(ScriptedSource::default());
        let (mut poller, _) = recording_poller(source, FeedPolicy::ClosedPeriod);
        assert_eq!(poller.prefill(&[], 10).await, 0);
        assert!(poller.last_accepted().is_none());
    }

    async fn signal_cycle(policy: FeedPolicy) -> (usize, Signal) {
        // Flat market, then a volume confirmed breakout at hour 30, then flat again
        let mut script: Vec<Option<Sample>> = (0..30).map(|h| Some(sample(h, 100, 10))).collect();
        script.push(Some(sample(30, 110, 100)));
        script.extend((31..35).map(|h| Some(sample(h, 100, 10))));
        let cycles = script.len();

        let source = Arc::new(ScriptedSource::new(script));
        let vpci = Vpci::new("BTC-ETH", &VpciParams::default(), Duration::from_millis(100)).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        vpci.subscribe(tx);

        let mut poller = MarketPoller::new(
            "BTC-ETH",
            CandleInterval::Hour,
            policy,
            source,
            Box::new(vpci),
        );

        for cycle in 0..cycles {
            poller.poll_once().await;
            if let Ok(signal) = rx.try_recv() {
                return (cycle, signal);
            }
        }
        panic!("no signal emitted");
    }

    #[tokio::test]
    async fn test_signal_timing_per_policy() {
        let (latest_cycle, latest_signal) = signal_cycle(FeedPolicy::Latest).await;
        assert_eq!(latest_cycle, 30);
        assert_eq!(latest_signal.timestamp, at(30));

        // Same breakout, reported one polling cycle later
        let (closed_cycle, closed_signal) = signal_cycle(FeedPolicy::ClosedPeriod).await;
        assert_eq!(closed_cycle, 31);
        assert_eq!(closed_signal.timestamp, at(30));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let handle = StopHandle::new();
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_before_run_never_fetches() {
        let source = Arc::new(ScriptedSource::new(vec![Some(sample(0, 100, 10))]));
        let (poller, _) = recording_poller(source.clone(), FeedPolicy::ClosedPeriod);
        let handle = poller.stop_handle();
        handle.stop();

        let poller = poller.run().await;
        assert_eq!(poller.state(), PollerState::Stopped);
        assert_eq!(source.fetches(), 0);

        // Running a stopped poller again is a no-op
        handle.stop();
        let poller = poller.run().await;
        assert_eq!(poller.state(), PollerState::Stopped);
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn test_stop_during_sleep() {
        let source = Arc::new(ScriptedSource::new(vec![Some(sample(0, 100, 10))]));
        let (poller, _) = recording_poller(source.clone(), FeedPolicy::ClosedPeriod);
        assert_eq!(poller.state(), PollerState::Idle);
        let handle = poller.stop_handle();

        let task = tokio::spawn(poller.run());
        while source.fetches() == 0 {
            sleep(Duration::from_millis(5)).await;
        }

        // Poller is now in a 48 minute long poll
        handle.stop();
        let poller = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poller did not stop")
            .unwrap();

        assert_eq!(poller.state(), PollerState::Stopped);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_stop_during_fetch() {
        let source = Arc::new(ScriptedSource::hanging());
        let (poller, _) = recording_poller(source.clone(), FeedPolicy::ClosedPeriod);
        let handle = poller.stop_handle();

        let task = tokio::spawn(poller.run());
        while source.fetches() == 0 {
            sleep(Duration::from_millis(5)).await;
        }

        handle.stop();
        let poller = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poller did not stop")
            .unwrap();

        assert_eq!(poller.state(), PollerState::Stopped);
        assert_eq!(source.fetches(), 1);
    }
}
