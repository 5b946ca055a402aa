use std::sync::Arc;

use trickle_protocol::{
    CreateTransferRequest, CreateTransferResponse, ListTransfersResponse, ResumeTransferRequest,
    ResumeTransferResponse, StatusResponse, TransferSnapshot,
};

use crate::{TransferError, TransferRegistry};

/// Applies control commands and queries to the registry's transfers.
///
/// Every operation returns immediately: commands only flip the shared
/// record, and the worker observes the change at its next chunk boundary
/// or wake-up. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<TransferRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<TransferRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// Starts a transfer of `payload`.
    pub fn create(
        &self,
        payload: Vec<u8>,
        req: CreateTransferRequest,
    ) -> Result<CreateTransferResponse, TransferError> {
        let record = self.registry.create(payload, &req.name, req.target_rate)?;
        let snap = record.snapshot();
        Ok(CreateTransferResponse {
            id: snap.id,
            status: snap.status,
            total_size: snap.total_size,
            target_rate: snap.target_rate,
            checksum: snap.checksum,
        })
    }

    /// Legal only while InProgress.
    pub fn pause(&self, id: &str) -> Result<StatusResponse, TransferError> {
        let record = self.registry.get(id)?;
        record.pause()?;
        tracing::info!(
            transfer_id = %id,
            bytes = record.transferred(),
            "transfer paused"
        );
        Ok(StatusResponse {
            status: record.status(),
        })
    }

    /// Legal only while Paused. A rate in `req` replaces the target rate in
    /// the same update as the status change.
    pub fn resume(
        &self,
        id: &str,
        req: ResumeTransferRequest,
    ) -> Result<ResumeTransferResponse, TransferError> {
        let record = self.registry.get(id)?;
        let rate = record.resume(req.target_rate)?;
        tracing::info!(transfer_id = %id, rate, "transfer resumed");
        Ok(ResumeTransferResponse {
            status: record.status(),
            target_rate: rate,
        })
    }

    /// Legal while InProgress or Paused. The worker removes the partial
    /// artifact before it exits.
    pub fn cancel(&self, id: &str) -> Result<StatusResponse, TransferError> {
        let record = self.registry.get(id)?;
        record.cancel()?;
        tracing::info!(transfer_id = %id, "transfer cancel requested");
        Ok(StatusResponse {
            status: record.status(),
        })
    }

    pub fn status(&self, id: &str) -> Result<TransferSnapshot, TransferError> {
        Ok(self.registry.get(id)?.snapshot())
    }

    pub fn list(&self) -> ListTransfersResponse {
        ListTransfersResponse {
            transfers: self.registry.list(),
        }
    }
}
