use crate::models::Signal;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub timed_out: usize,
    pub closed: usize,
}

/// Best-effort fan-out of signals to subscriber channels
///
/// Every subscriber gets the same grace period to accept a signal. Slow
/// subscribers miss that signal, subscribers whose receiver was dropped are
/// removed.
pub struct Broadcaster {
    subscribers: Mutex<Vec<(SubscriberId, mpsc::Sender<Signal>)>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl Broadcaster {
    pub fn new(timeout: Duration) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn subscribe(&self, sink: mpsc::Sender<Signal>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, sink));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().retain(|(sub, _)| *sub != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Send `signal` to every subscriber concurrently
    ///
    /// Returns once every send completed or hit the grace period, so the call
    /// never takes much longer than `timeout`.
    pub async fn broadcast(&self, signal: &Signal) -> BroadcastReport {
        // Sends happen outside the lock so subscribe/unsubscribe never wait on a slow sink
        let subscribers = self.subscribers.lock().clone();

        let sends = subscribers.into_iter().map(|(id, sink)| {
            let signal = signal.clone();
            async move { (id, timeout(self.timeout, sink.send(signal)).await) }
        });

        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(_)) => closed.push(id),
                Err(_) => report.timed_out += 1,
            }
        }

        if report.timed_out > 0 {
            tracing::warn!(
                market = %signal.market,
                "{} subscriber(s) missed signal, broadcast timed out after {:?}",
                report.timed_out,
                self.timeout
            );
        }

        if !closed.is_empty() {
            report.closed = closed.len();
            self.subscribers
                .lock()
                .retain(|(id, _)| !closed.contains(id));
            tracing::debug!(market = %signal.market, "Dropped {} closed subscriber(s)", report.closed);
        }

        report
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_TIMEOUT)
    }
}
