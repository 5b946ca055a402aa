//! The execution loop driving one transfer.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trickle_protocol::TransferStatus;

use crate::types::PauseStats;
use crate::{
    ChunkSource, RateWindow, Sink, SinkError, SinkHandle, SpeedSampler, TransferRecord,
    TransferSettings,
};

/// Error recorded on transfers stopped by registry shutdown.
pub(crate) const INTERRUPTED: &str = "interrupted by shutdown";

/// Error recorded when a worker unwinds or is dropped mid-transfer.
pub(crate) const WORKER_LOST: &str = "worker stopped unexpectedly";

/// Outcome of a chunk-boundary status check.
enum Checkpoint {
    Proceed,
    Canceled,
    Shutdown,
    /// Already terminal without a cancel.
    Halted,
}

/// Writes one payload to the sink, honoring the record's status between
/// chunks. Exactly one task runs per record.
pub(crate) struct TransferTask {
    record: Arc<TransferRecord>,
    sink: Arc<dyn Sink>,
    source: ChunkSource,
    shutdown: CancellationToken,
    sample_interval: Duration,
    pause_poll_interval: Duration,
    window: RateWindow,
    sampler: SpeedSampler,
    /// Pause bookkeeping as of the last window reset.
    seen: PauseStats,
}

/// Leaves the record terminal and flagged as exited however the worker
/// stops, including a panic inside the sink.
struct ExitGuard(Arc<TransferRecord>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let record = &self.0;
        if record.fail(WORKER_LOST) {
            tracing::error!(
                transfer_id = %record.id(),
                bytes = record.transferred(),
                error = WORKER_LOST,
                "transfer failed"
            );
        }
        record.mark_exited();
    }
}

impl TransferTask {
    pub(crate) fn new(
        record: Arc<TransferRecord>,
        sink: Arc<dyn Sink>,
        payload: Vec<u8>,
        settings: &TransferSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            record,
            sink,
            source: ChunkSource::new(payload, settings.effective_chunk_size()),
            shutdown,
            sample_interval: settings.sample_interval,
            pause_poll_interval: settings.pause_poll_interval,
            window: RateWindow::new(0),
            sampler: SpeedSampler::start(settings.sample_interval),
            seen: PauseStats::default(),
        }
    }

    /// Runs to a terminal state, then marks the record's worker as exited.
    pub(crate) async fn run(mut self) {
        let _exit = ExitGuard(Arc::clone(&self.record));
        self.execute().await;
    }

    async fn execute(&mut self) {
        let opened = match self.sink.open(self.record.artifact()).await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(&format!("failed to open {}: {e}", self.record.artifact()));
                return;
            }
        };
        let mut handle = Some(opened);

        // Clocks start once the artifact is open.
        self.window.reset(0);
        self.sampler = SpeedSampler::start(self.sample_interval);
        self.seen = self.record.pause_stats();

        loop {
            match self.checkpoint().await {
                Checkpoint::Proceed => {}
                Checkpoint::Canceled => return self.roll_back(&mut handle).await,
                Checkpoint::Shutdown => return self.interrupt(&mut handle).await,
                Checkpoint::Halted => {
                    if let Err(e) = release(&mut handle).await {
                        tracing::warn!(transfer_id = %self.record.id(), error = %e, "failed to close artifact");
                    }
                    return;
                }
            }

            let Some(open) = handle.as_mut() else {
                // Payload exhausted and closed. A pause that raced the close
                // keeps the transfer here until it is resumed or canceled.
                if self.record.complete() {
                    tracing::info!(
                        transfer_id = %self.record.id(),
                        bytes = self.record.transferred(),
                        "transfer completed"
                    );
                    return;
                }
                continue;
            };

            match self.source.next_chunk() {
                Some(chunk) => {
                    let len = chunk.len() as u64;
                    if let Err(e) = open.write_chunk(chunk).await {
                        if let Err(close_err) = release(&mut handle).await {
                            tracing::warn!(
                                transfer_id = %self.record.id(),
                                error = %close_err,
                                "failed to close artifact after write error"
                            );
                        }
                        self.fail(&format!("write failed: {e}"));
                        return;
                    }
                    self.record.add_progress(len);
                    self.sync_resume();
                    self.sample();
                    self.throttle().await;
                }
                None => {
                    if let Err(e) = release(&mut handle).await {
                        self.fail(&format!("close failed: {e}"));
                        return;
                    }
                }
            }
        }
    }

    /// Blocks while paused and reports what the loop should do next.
    async fn checkpoint(&mut self) -> Checkpoint {
        let record = Arc::clone(&self.record);
        loop {
            let notified = record.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match record.status() {
                TransferStatus::Canceled => return Checkpoint::Canceled,
                TransferStatus::Completed | TransferStatus::Failed => return Checkpoint::Halted,
                _ if self.shutdown.is_cancelled() => return Checkpoint::Shutdown,
                TransferStatus::Pending | TransferStatus::InProgress => {
                    self.sync_resume();
                    return Checkpoint::Proceed;
                }
                TransferStatus::Paused => {
                    if self.sampler.is_running() {
                        self.sampler.pause();
                        tracing::debug!(
                            transfer_id = %record.id(),
                            bytes = record.transferred(),
                            "worker suspended"
                        );
                    }
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(self.pause_poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Sleeps off any rate-limit debt. Returns early if the status changes.
    async fn throttle(&mut self) {
        let record = Arc::clone(&self.record);
        loop {
            let notified = record.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if record.status() != TransferStatus::InProgress || self.shutdown.is_cancelled() {
                return;
            }
            self.sync_resume();
            let delay = self.window.delay(record.target_rate(), record.transferred());
            if delay.is_zero() {
                return;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = &mut notified => {}
                _ = tokio::time::sleep(delay) => return,
            }
        }
    }

    /// Restarts the clocks after any resume since the last look. A pause
    /// and resume that both landed during one write or sleep are caught
    /// here even though the worker never saw Paused.
    fn sync_resume(&mut self) {
        let stats = self.record.pause_stats();
        let running = self.sampler.is_running();
        if running && stats.resumes == self.seen.resumes {
            return;
        }
        if running {
            self.sampler
                .discount(stats.paused_total.saturating_sub(self.seen.paused_total));
        } else {
            self.sampler.resume();
        }
        // Paused time never counts toward the rate window.
        self.window.reset(self.record.transferred());
        self.seen = stats;
        tracing::debug!(
            transfer_id = %self.record.id(),
            resumes = stats.resumes,
            "worker resumed"
        );
    }

    fn sample(&mut self) {
        let transferred = self.record.transferred();
        if let Some(rate) = self.sampler.sample(transferred) {
            self.record.publish_rate(rate);
            tracing::debug!(
                transfer_id = %self.record.id(),
                bytes = transferred,
                total = self.record.total_size(),
                rate,
                "transfer progress"
            );
        }
    }

    /// Cancel path: close the artifact, then remove it.
    async fn roll_back(&self, handle: &mut Option<Box<dyn SinkHandle>>) {
        let id = self.record.id();
        if let Err(e) = release(handle).await {
            tracing::warn!(transfer_id = %id, error = %e, "failed to close canceled artifact");
        }
        match self.sink.delete(self.record.artifact()).await {
            Ok(()) => tracing::info!(
                transfer_id = %id,
                bytes = self.record.transferred(),
                "transfer canceled, artifact removed"
            ),
            Err(e) => tracing::warn!(
                transfer_id = %id,
                error = %e,
                "failed to remove canceled artifact"
            ),
        }
    }

    /// Shutdown path: stop as a failure and keep the partial artifact.
    async fn interrupt(&self, handle: &mut Option<Box<dyn SinkHandle>>) {
        if let Err(e) = release(handle).await {
            tracing::warn!(
                transfer_id = %self.record.id(),
                error = %e,
                "failed to close interrupted artifact"
            );
        }
        self.fail(INTERRUPTED);
    }

    fn fail(&self, error: &str) {
        if self.record.fail(error) {
            tracing::error!(
                transfer_id = %self.record.id(),
                bytes = self.record.transferred(),
                error,
                "transfer failed"
            );
        }
    }
}

/// Closes the handle if it is still open.
async fn release(handle: &mut Option<Box<dyn SinkHandle>>) -> Result<(), SinkError> {
    match handle.take() {
        Some(mut h) => h.close().await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemorySink, SinkFuture};
    use tokio::time::Instant;

    fn settings(chunk_size: usize) -> TransferSettings {
        TransferSettings {
            chunk_size,
            ..Default::default()
        }
    }

    /// Wraps a [`MemorySink`] with fixed write and close latency.
    struct SlowSink {
        inner: MemorySink,
        write_delay: Duration,
        close_delay: Duration,
    }

    impl Sink for SlowSink {
        fn open<'a>(&'a self, name: &'a str) -> SinkFuture<'a, Box<dyn SinkHandle>> {
            Box::pin(async move {
                let inner = self.inner.open(name).await?;
                Ok(Box::new(SlowHandle {
                    inner,
                    write_delay: self.write_delay,
                    close_delay: self.close_delay,
                }) as Box<dyn SinkHandle>)
            })
        }

        fn delete<'a>(&'a self, name: &'a str) -> SinkFuture<'a, ()> {
            self.inner.delete(name)
        }

        fn exists<'a>(&'a self, name: &'a str) -> SinkFuture<'a, bool> {
            self.inner.exists(name)
        }
    }

    struct SlowHandle {
        inner: Box<dyn SinkHandle>,
        write_delay: Duration,
        close_delay: Duration,
    }

    impl SinkHandle for SlowHandle {
        fn write_chunk<'a>(&'a mut self, data: &'a [u8]) -> SinkFuture<'a, ()> {
            Box::pin(async move {
                if !self.write_delay.is_zero() {
                    tokio::time::sleep(self.write_delay).await;
                }
                self.inner.write_chunk(data).await
            })
        }

        fn close(&mut self) -> SinkFuture<'_, ()> {
            Box::pin(async move {
                if !self.close_delay.is_zero() {
                    tokio::time::sleep(self.close_delay).await;
                }
                self.inner.close().await
            })
        }
    }

    fn slow_setup(
        size: usize,
        rate: i64,
        write_delay: Duration,
        close_delay: Duration,
    ) -> (Arc<TransferRecord>, MemorySink, TransferTask, Vec<u8>) {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let record = Arc::new(TransferRecord::new(
            "t1".into(),
            "data.bin".into(),
            size as u64,
            rate,
            String::new(),
        ));
        record.start().unwrap();
        let inner = MemorySink::new();
        let sink = SlowSink {
            inner: inner.clone(),
            write_delay,
            close_delay,
        };
        let task = TransferTask::new(
            Arc::clone(&record),
            Arc::new(sink),
            payload.clone(),
            &settings(1000),
            CancellationToken::new(),
        );
        (record, inner, task, payload)
    }

    fn setup(
        size: usize,
        rate: i64,
        chunk_size: usize,
    ) -> (Arc<TransferRecord>, MemorySink, TransferTask, Vec<u8>) {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let record = Arc::new(TransferRecord::new(
            "t1".into(),
            "data.bin".into(),
            size as u64,
            rate,
            String::new(),
        ));
        record.start().unwrap();
        let sink = MemorySink::new();
        let task = TransferTask::new(
            Arc::clone(&record),
            Arc::new(sink.clone()),
            payload.clone(),
            &settings(chunk_size),
            CancellationToken::new(),
        );
        (record, sink, task, payload)
    }

    #[tokio::test(start_paused = true)]
    async fn throttles_to_target_rate() {
        let (record, sink, task, payload) = setup(5000, 1000, 1000);
        let started = Instant::now();
        task.run().await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "took {elapsed:?}");
        assert!(elapsed < Duration::from_millis(5100), "took {elapsed:?}");
        assert_eq!(record.status(), TransferStatus::Completed);
        assert_eq!(record.transferred(), 5000);
        assert_eq!(sink.contents("t1_data.bin").unwrap(), payload);
        assert_eq!(sink.write_count(), 5);
        assert_eq!(sink.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_rate_does_not_sleep() {
        let (record, _sink, task, _) = setup(5000, 0, 1000);
        let started = Instant::now();
        task.run().await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(record.status(), TransferStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_rate_while_running() {
        let (record, _sink, task, _) = setup(5000, 1000, 1000);
        let worker = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let snap = record.snapshot();
        assert_eq!(snap.transferred_size, 3000);
        assert!(snap.current_rate > 0.0);

        worker.await.unwrap();
        assert_eq!(record.snapshot().current_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_progress_and_resume_continues() {
        let (record, sink, task, payload) = setup(5000, 1000, 1000);
        let worker = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        record.pause().unwrap();
        let held = record.transferred();
        assert_eq!(held, 2000);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(record.transferred(), held);
        assert_eq!(record.status(), TransferStatus::Paused);

        let resumed_at = Instant::now();
        record.resume(Some(2000)).unwrap();
        worker.await.unwrap();

        // 3000 bytes left at 2000 B/s, no burst from the pause.
        assert!(resumed_at.elapsed() >= Duration::from_millis(1500));
        assert_eq!(record.status(), TransferStatus::Completed);
        assert_eq!(sink.contents("t1_data.bin").unwrap(), payload);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_removes_artifact() {
        let (record, sink, task, _) = setup(5000, 1000, 1000);
        let worker = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(sink.exists("t1_data.bin").await.unwrap());
        record.cancel().unwrap();
        worker.await.unwrap();

        assert_eq!(record.status(), TransferStatus::Canceled);
        assert!(!sink.exists("t1_data.bin").await.unwrap());
        assert_eq!(sink.write_count(), 2);
        assert_eq!(sink.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_paused_removes_artifact() {
        let (record, sink, task, _) = setup(5000, 1000, 1000);
        let worker = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        record.pause().unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        record.cancel().unwrap();
        worker.await.unwrap();

        assert_eq!(record.status(), TransferStatus::Canceled);
        assert!(sink.artifact_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_fails_without_writes() {
        let (record, sink, task, _) = setup(5000, 1000, 1000);
        sink.fail_open("read-only store");
        task.run().await;

        let snap = record.snapshot();
        assert_eq!(snap.status, TransferStatus::Failed);
        assert!(snap.error.contains("read-only store"));
        assert_eq!(snap.transferred_size, 0);
        assert_eq!(sink.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_keeps_partial_artifact() {
        let (record, sink, task, _) = setup(5000, 0, 1000);
        sink.fail_after_writes(2);
        task.run().await;

        let snap = record.snapshot();
        assert_eq!(snap.status, TransferStatus::Failed);
        assert!(snap.error.starts_with("write failed"));
        assert_eq!(snap.transferred_size, 2000);
        assert_eq!(sink.contents("t1_data.bin").unwrap().len(), 2000);
        assert_eq!(sink.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_payload_completes() {
        let (record, sink, task, _) = setup(0, 1000, 1000);
        task.run().await;
        assert_eq!(record.status(), TransferStatus::Completed);
        assert_eq!(sink.contents("t1_data.bin").unwrap(), Vec::<u8>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_paused_worker() {
        let payload = vec![1u8; 3000];
        let record = Arc::new(TransferRecord::new(
            "t2".into(),
            "x".into(),
            3000,
            1000,
            String::new(),
        ));
        record.start().unwrap();
        let sink = MemorySink::new();
        let token = CancellationToken::new();
        let task = TransferTask::new(
            Arc::clone(&record),
            Arc::new(sink.clone()),
            payload,
            &settings(1000),
            token.clone(),
        );
        let worker = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        record.pause().unwrap();
        token.cancel();
        worker.await.unwrap();

        let snap = record.snapshot();
        assert_eq!(snap.status, TransferStatus::Failed);
        assert_eq!(snap.error, INTERRUPTED);
        // Partial artifact is kept.
        assert_eq!(sink.contents("t2_x").unwrap().len(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn close_failure_fails_and_keeps_artifact() {
        let (record, sink, task, payload) = setup(3000, 0, 1000);
        sink.fail_close("flush failed");
        task.run().await;

        let snap = record.snapshot();
        assert_eq!(snap.status, TransferStatus::Failed);
        assert!(snap.error.starts_with("close failed"), "{}", snap.error);
        assert!(snap.error.contains("flush failed"));
        assert_eq!(snap.transferred_size, 3000);
        assert_eq!(sink.contents("t1_data.bin").unwrap(), payload);
        assert_eq!(sink.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_reported_over_close_failure() {
        let (record, sink, task, _) = setup(5000, 0, 1000);
        sink.fail_after_writes(1);
        sink.fail_close("flush failed");
        task.run().await;

        let snap = record.snapshot();
        assert_eq!(snap.status, TransferStatus::Failed);
        assert!(snap.error.starts_with("write failed"), "{}", snap.error);
        assert_eq!(snap.transferred_size, 1000);
        assert_eq!(sink.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_with_close_failure_still_interrupts() {
        let (record, sink, task, _) = setup(3000, 1000, 1000);
        sink.fail_close("flush failed");
        let token = task.shutdown.clone();
        let worker = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();
        worker.await.unwrap();

        let snap = record.snapshot();
        assert_eq!(snap.status, TransferStatus::Failed);
        assert_eq!(snap.error, INTERRUPTED);
        assert_eq!(sink.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_after_last_chunk_waits_then_completes() {
        let (record, sink, task, payload) =
            slow_setup(2000, 0, Duration::ZERO, Duration::from_secs(1));
        let worker = tokio::spawn(task.run());

        // Both chunks are written; the worker is closing the artifact.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(record.transferred(), 2000);
        record.pause().unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(record.status(), TransferStatus::Paused);
        assert_eq!(record.transferred(), 2000);
        assert_eq!(sink.open_handles(), 0);
        assert!(!worker.is_finished());

        record.resume(None).unwrap();
        worker.await.unwrap();
        assert_eq!(record.status(), TransferStatus::Completed);
        assert_eq!(sink.contents("t1_data.bin").unwrap(), payload);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_last_chunk_removes_artifact() {
        let (record, sink, task, _) = slow_setup(2000, 0, Duration::ZERO, Duration::from_secs(1));
        let worker = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        record.pause().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sink.exists("t1_data.bin").await.unwrap());

        record.cancel().unwrap();
        worker.await.unwrap();
        assert_eq!(record.status(), TransferStatus::Canceled);
        assert!(sink.artifact_names().is_empty());
        assert_eq!(sink.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_during_write_restarts_rate_window() {
        let (record, sink, task, payload) =
            slow_setup(4000, 1000, Duration::from_millis(100), Duration::ZERO);
        let started = Instant::now();
        let worker = tokio::spawn(task.run());

        // Third chunk is mid-write. Pause and resume both land before it
        // returns, so the worker never observes Paused.
        tokio::time::sleep(Duration::from_millis(2050)).await;
        record.pause().unwrap();
        record.resume(Some(100)).unwrap();
        worker.await.unwrap();

        // The last 1000 bytes go out at 100 B/s from the resume, without a
        // 40 s penalty for the bytes sent at the old rate.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(12), "took {elapsed:?}");
        assert!(elapsed < Duration::from_secs(13), "took {elapsed:?}");
        assert_eq!(record.status(), TransferStatus::Completed);
        assert_eq!(sink.contents("t1_data.bin").unwrap(), payload);
    }
}
