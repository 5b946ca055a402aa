use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use trickle_protocol::TransferSnapshot;

use crate::TransferRecord;

/// Default progress notification interval.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Callback invoked with a transfer snapshot.
pub type ProgressCallback = Box<dyn Fn(TransferSnapshot) + Send + Sync>;

/// Tracks transfers and notifies callbacks periodically.
pub struct ProgressTracker {
    inner: Arc<RwLock<TrackerInner>>,
    stop: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

struct TrackerInner {
    callbacks: Vec<ProgressCallback>,
    records: HashMap<String, Arc<TransferRecord>>,
    interval: Duration,
}

impl TrackerInner {
    fn emit(&self, record: &TransferRecord) {
        let snapshot = record.snapshot();
        for cb in &self.callbacks {
            cb(snapshot.clone());
        }
    }
}

impl ProgressTracker {
    /// Creates a new tracker with the given notification interval.
    ///
    /// If `interval` is `None`, defaults to 500 ms.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TrackerInner {
                callbacks: Vec::new(),
                records: HashMap::new(),
                interval: interval.unwrap_or(DEFAULT_INTERVAL),
            })),
            stop: Mutex::new(None),
        }
    }

    /// Registers a progress callback.
    pub fn on_progress(&self, callback: ProgressCallback) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.callbacks.push(callback);
    }

    /// Begins tracking a transfer.
    pub fn track(&self, record: Arc<TransferRecord>) {
        let id = record.id().to_string();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.records.insert(id, record);
    }

    /// Stops tracking a transfer.
    pub fn untrack(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.records.remove(id);
    }

    /// Sends a one-time notification for a transfer, whatever its status.
    pub fn notify_now(&self, id: &str) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = inner.records.get(id) {
            inner.emit(record);
        }
    }

    /// Starts periodic notifications for active transfers in a background
    /// tokio task.
    ///
    /// Call [`stop`](Self::stop) to cancel.
    pub fn start(&self) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
            // Dropping the previous sender stops any existing task.
            *stop = Some(tx);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let interval = inner
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .interval;
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let i = inner.read().unwrap_or_else(PoisonError::into_inner);
                        for record in i.records.values().filter(|r| r.is_active()) {
                            i.emit(record);
                        }
                    }
                    _ = &mut rx => break,
                }
            }
        });
    }

    /// Stops the periodic notification task.
    pub fn stop(&self) {
        let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
        drop(stop.take());
    }
}

// ---------------------------------------------------------------------------
// SpeedSampler
// ---------------------------------------------------------------------------

/// Cumulative-average throughput over active time.
///
/// Paused intervals are excluded from the denominator. A sample is produced
/// at most once per `interval` of running time.
#[derive(Debug)]
pub struct SpeedSampler {
    interval: Duration,
    /// Active time accumulated before the current run.
    banked: Duration,
    /// Start of the current run, `None` while paused.
    running_since: Option<Instant>,
    last_sample: Instant,
}

impl SpeedSampler {
    /// Creates a sampler that starts running now.
    pub fn start(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            banked: Duration::ZERO,
            running_since: Some(now),
            last_sample: now,
        }
    }

    /// Stops the active-time clock. No-op if already paused.
    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.banked += since.elapsed();
        }
    }

    /// Restarts the active-time clock. No-op if already running.
    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            let now = Instant::now();
            self.running_since = Some(now);
            self.last_sample = now;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Removes `idle` from the current run, for a pause that began and
    /// ended while the sampler kept running.
    pub fn discount(&mut self, idle: Duration) {
        if let Some(since) = self.running_since {
            self.running_since = Some((since + idle).min(Instant::now()));
        }
    }

    /// Active time so far.
    pub fn active_elapsed(&self) -> Duration {
        self.banked + self.running_since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    /// Returns a new rate for `transferred` bytes if the sample interval
    /// has passed since the last one.
    pub fn sample(&mut self, transferred: u64) -> Option<f64> {
        self.running_since?;
        let now = Instant::now();
        if now.duration_since(self.last_sample) < self.interval {
            return None;
        }
        self.last_sample = now;

        let secs = self.active_elapsed().as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        Some(transferred as f64 / secs)
    }
}
