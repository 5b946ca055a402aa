use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::futures::Notified;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use trickle_protocol::{TransferSnapshot, TransferStatus, progress_percentage};

use crate::TransferError;

/// Shared state of one transfer (thread-safe).
///
/// Status, progress and rates live behind a single lock so every reader
/// sees a consistent combination. Commands flip the status and wake the
/// worker; the worker is the only writer of progress.
#[derive(Debug)]
pub struct TransferRecord {
    id: String,
    name: String,
    artifact: String,
    total_size: u64,
    checksum: String,
    created_at: DateTime<Utc>,
    inner: RwLock<RecordInner>,
    wake: Notify,
    exited: watch::Sender<bool>,
}

#[derive(Debug)]
struct RecordInner {
    status: TransferStatus,
    transferred: u64,
    current_rate: f64,
    target_rate: i64,
    error: String,
    paused_since: Option<Instant>,
    paused_total: Duration,
    resumes: u64,
}

/// Resume bookkeeping read by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct PauseStats {
    pub(crate) resumes: u64,
    /// Time spent paused across all completed pauses.
    pub(crate) paused_total: Duration,
}

impl TransferRecord {
    /// Creates a pending record. The artifact is named `{id}_{name}`.
    pub fn new(
        id: String,
        name: String,
        total_size: u64,
        target_rate: i64,
        checksum: String,
    ) -> Self {
        let artifact = format!("{id}_{name}");
        let (exited, _) = watch::channel(false);
        Self {
            id,
            name,
            artifact,
            total_size,
            checksum,
            created_at: Utc::now(),
            inner: RwLock::new(RecordInner {
                status: TransferStatus::Pending,
                transferred: 0,
                current_rate: 0.0,
                target_rate,
                error: String::new(),
                paused_since: None,
                paused_total: Duration::ZERO,
                resumes: 0,
            }),
            wake: Notify::new(),
            exited,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RecordInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RecordInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalid(&self, status: TransferStatus, action: &'static str) -> TransferError {
        TransferError::InvalidTransition {
            id: self.id.clone(),
            status,
            action,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the artifact in the sink.
    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// SHA-256 hex digest of the payload.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn status(&self) -> TransferStatus {
        self.read().status
    }

    pub fn target_rate(&self) -> i64 {
        self.read().target_rate
    }

    pub fn transferred(&self) -> u64 {
        self.read().transferred
    }

    /// Returns `true` until the transfer reaches a terminal state.
    pub fn is_active(&self) -> bool {
        !self.status().is_terminal()
    }

    /// Pending -> InProgress.
    pub fn start(&self) -> Result<(), TransferError> {
        let mut s = self.write();
        if s.status != TransferStatus::Pending {
            return Err(self.invalid(s.status, "start"));
        }
        s.status = TransferStatus::InProgress;
        Ok(())
    }

    /// InProgress -> Paused.
    pub fn pause(&self) -> Result<(), TransferError> {
        {
            let mut s = self.write();
            if s.status != TransferStatus::InProgress {
                return Err(self.invalid(s.status, "pause"));
            }
            s.status = TransferStatus::Paused;
            s.current_rate = 0.0;
            s.paused_since = Some(Instant::now());
        }
        self.wake.notify_waiters();
        Ok(())
    }

    /// Paused -> InProgress, replacing the target rate in the same update
    /// when `new_rate` is given. Returns the effective target rate.
    pub fn resume(&self, new_rate: Option<i64>) -> Result<i64, TransferError> {
        let rate = {
            let mut s = self.write();
            if s.status != TransferStatus::Paused {
                return Err(self.invalid(s.status, "resume"));
            }
            s.status = TransferStatus::InProgress;
            if let Some(since) = s.paused_since.take() {
                s.paused_total += since.elapsed();
            }
            s.resumes += 1;
            if let Some(rate) = new_rate {
                s.target_rate = rate;
            }
            s.target_rate
        };
        self.wake.notify_waiters();
        Ok(rate)
    }

    /// InProgress | Paused -> Canceled.
    pub fn cancel(&self) -> Result<(), TransferError> {
        {
            let mut s = self.write();
            if !matches!(s.status, TransferStatus::InProgress | TransferStatus::Paused) {
                return Err(self.invalid(s.status, "cancel"));
            }
            s.status = TransferStatus::Canceled;
            s.current_rate = 0.0;
        }
        self.wake.notify_waiters();
        Ok(())
    }

    /// Counts `bytes` written by the worker. Ignored once terminal.
    pub fn add_progress(&self, bytes: u64) {
        let mut s = self.write();
        if s.status.is_terminal() {
            return;
        }
        debug_assert!(s.transferred + bytes <= self.total_size);
        s.transferred = (s.transferred + bytes).min(self.total_size);
    }

    /// Publishes a sampled rate. Only takes effect while InProgress.
    pub fn publish_rate(&self, rate: f64) {
        let mut s = self.write();
        if s.status == TransferStatus::InProgress {
            s.current_rate = rate;
        }
    }

    /// InProgress -> Completed. Returns `false` if a command got there first.
    pub fn complete(&self) -> bool {
        let mut s = self.write();
        if s.status != TransferStatus::InProgress {
            return false;
        }
        s.status = TransferStatus::Completed;
        s.current_rate = 0.0;
        true
    }

    /// Any non-terminal state -> Failed with `error`.
    pub fn fail(&self, error: &str) -> bool {
        let mut s = self.write();
        if s.status.is_terminal() {
            return false;
        }
        s.status = TransferStatus::Failed;
        s.current_rate = 0.0;
        s.error = error.to_string();
        true
    }

    /// Returns a consistent point-in-time snapshot.
    pub fn snapshot(&self) -> TransferSnapshot {
        let s = self.read();
        TransferSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: s.status,
            transferred_size: s.transferred,
            total_size: self.total_size,
            current_rate: s.current_rate,
            target_rate: s.target_rate,
            error: s.error.clone(),
            checksum: self.checksum.clone(),
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            percentage: progress_percentage(s.transferred, self.total_size),
        }
    }

    pub(crate) fn pause_stats(&self) -> PauseStats {
        let s = self.read();
        PauseStats {
            resumes: s.resumes,
            paused_total: s.paused_total,
        }
    }

    /// Future completing on the next status command.
    ///
    /// Enable it before re-reading the status so a command issued in
    /// between is not missed.
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }

    pub(crate) fn mark_exited(&self) {
        self.exited.send_replace(true);
    }

    /// Resolves once the worker has exited and finished cleanup.
    pub async fn wait_exited(&self) {
        let mut rx = self.exited.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }
}
