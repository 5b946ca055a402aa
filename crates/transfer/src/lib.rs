//! Throttled, pausable, resumable, cancelable transfer tasks.
//!
//! A [`TransferRegistry`] owns every transfer record and spawns one worker
//! per transfer. The worker writes the buffered payload to a [`Sink`] in
//! bounded chunks, throttled to the target rate, while the
//! [`CommandDispatcher`] pauses, resumes and cancels it from other callers.

mod chunked;
mod commands;
mod progress;
mod rate;
mod registry;
mod settings;
mod sink;
mod task;
mod types;
mod validation;

pub use chunked::{ChunkSource, checksum_bytes};
pub use commands::CommandDispatcher;
pub use progress::{ProgressCallback, ProgressTracker, SpeedSampler};
pub use rate::{RateWindow, throttle_delay};
pub use registry::TransferRegistry;
pub use settings::TransferSettings;
pub use sink::{FileSink, MemorySink, Sink, SinkError, SinkFuture, SinkHandle};
pub use types::TransferRecord;
pub use validation::validate_transfer_name;

use trickle_protocol::TransferStatus;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default target rate: 1 MiB/s.
pub const DEFAULT_TARGET_RATE: i64 = 1024 * 1024;

/// Errors returned synchronously by registry and command operations.
///
/// Sink failures inside a running transfer never surface here; they are
/// recorded on the transfer and reported through status queries.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer not found: {0}")]
    NotFound(String),

    #[error("cannot {action} transfer {id} while {status}")]
    InvalidTransition {
        id: String,
        status: TransferStatus,
        action: &'static str,
    },

    #[error("invalid transfer name: {0}")]
    InvalidName(String),

    #[error("registry is shutting down")]
    ShuttingDown,
}

impl TransferError {
    /// `true` for an unknown transfer id.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound(_))
    }

    /// `true` when a command is illegal for the transfer's current status.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, TransferError::InvalidTransition { .. })
    }
}
