use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use trickle_protocol::TransferSnapshot;

use crate::task::TransferTask;
use crate::{Sink, TransferError, TransferRecord, TransferSettings, checksum_bytes};

/// Owns every transfer record and the worker spawned for each.
///
/// Records are kept for the lifetime of the registry, whatever their
/// status. Lookups never wait on a worker's I/O.
pub struct TransferRegistry {
    sink: Arc<dyn Sink>,
    settings: TransferSettings,
    records: RwLock<HashMap<String, Arc<TransferRecord>>>,
    workers: Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
}

impl TransferRegistry {
    pub fn new(sink: Arc<dyn Sink>, settings: TransferSettings) -> Self {
        Self {
            sink,
            settings,
            records: RwLock::new(HashMap::new()),
            workers: Mutex::new(JoinSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Registers a transfer and spawns its worker.
    ///
    /// The record is already InProgress when this returns. `target_rate`
    /// falls back to the configured default. Must be called within a Tokio
    /// runtime.
    pub fn create(
        &self,
        payload: Vec<u8>,
        name: &str,
        target_rate: Option<i64>,
    ) -> Result<Arc<TransferRecord>, TransferError> {
        crate::validate_transfer_name(name)?;

        let id = uuid::Uuid::new_v4().to_string();
        let rate = target_rate.unwrap_or(self.settings.default_rate);
        let record = Arc::new(TransferRecord::new(
            id.clone(),
            name.to_string(),
            payload.len() as u64,
            rate,
            checksum_bytes(&payload),
        ));
        record.start()?;

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shutdown.is_cancelled() {
            return Err(TransferError::ShuttingDown);
        }
        // Reap workers that already finished.
        while let Some(result) = workers.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "transfer worker panicked");
            }
        }

        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::clone(&record));

        let task = TransferTask::new(
            Arc::clone(&record),
            Arc::clone(&self.sink),
            payload,
            &self.settings,
            self.shutdown.child_token(),
        );
        workers.spawn(task.run());

        tracing::info!(
            transfer_id = %id,
            name,
            total = record.total_size(),
            rate,
            "transfer created"
        );
        Ok(record)
    }

    /// Looks up a transfer by id.
    pub fn get(&self, id: &str) -> Result<Arc<TransferRecord>, TransferError> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| TransferError::NotFound(id.to_string()))
    }

    /// Snapshots of all known transfers, in no particular order.
    pub fn list(&self) -> Vec<TransferSnapshot> {
        let records: Vec<Arc<TransferRecord>> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.iter().map(|r| r.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until the transfer's worker has exited, then returns its
    /// final snapshot.
    pub async fn wait(&self, id: &str) -> Result<TransferSnapshot, TransferError> {
        let record = self.get(id)?;
        record.wait_exited().await;
        Ok(record.snapshot())
    }

    /// Stops all workers and waits for them to exit.
    ///
    /// Transfers still in progress or paused end as Failed and keep their
    /// partial artifacts. Later creates fail with
    /// [`TransferError::ShuttingDown`].
    pub async fn shutdown(&self) {
        let mut workers = {
            let mut guard = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            self.shutdown.cancel();
            std::mem::take(&mut *guard)
        };

        let pending = workers.len();
        tracing::info!(workers = pending, "shutting down transfer registry");
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "transfer worker panicked");
            }
        }
    }
}
