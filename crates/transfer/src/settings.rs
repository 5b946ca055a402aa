use std::time::Duration;

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_TARGET_RATE};

/// Tunables consumed by the registry and its workers.
///
/// Loading these from files or the environment is the host's job.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSettings {
    /// Bytes written per sink call. 0 selects [`DEFAULT_CHUNK_SIZE`].
    pub chunk_size: usize,
    /// Target rate applied when a create request carries none.
    pub default_rate: i64,
    /// Minimum spacing between published rate samples.
    pub sample_interval: Duration,
    /// Longest a paused worker sleeps before re-checking its status.
    pub pause_poll_interval: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_rate: DEFAULT_TARGET_RATE,
            sample_interval: Duration::from_secs(1),
            pause_poll_interval: Duration::from_secs(1),
        }
    }
}

impl TransferSettings {
    pub fn effective_chunk_size(&self) -> usize {
        match self.chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            n => n,
        }
    }
}
