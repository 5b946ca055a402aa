use std::fmt;

use serde::{Deserialize, Serialize};

/// Current state of a transfer.
///
/// `Pending -> InProgress <-> Paused`, then one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "canceled")]
    Canceled,
}

impl TransferStatus {
    /// Returns `true` for states with no legal transition out.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Canceled
        )
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::InProgress => "in_progress",
            TransferStatus::Paused => "paused",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consistent point-in-time view of one transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub id: String,
    pub name: String,
    pub status: TransferStatus,
    pub transferred_size: u64,
    pub total_size: u64,
    /// Bytes per second, sampled while in progress; 0 otherwise.
    pub current_rate: f64,
    /// Bytes per second ceiling; 0 or negative means unlimited.
    pub target_rate: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    pub created_at: String,
    /// Progress in percent (0-100), derived from the two sizes.
    #[serde(default)]
    pub percentage: f64,
}

/// Returns `transferred` as a percentage (0-100) of `total`; 0 when the
/// total is 0.
pub fn progress_percentage(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    transferred as f64 / total as f64 * 100.0
}

impl TransferSnapshot {
    /// Returns `true` if the throttle is disabled for this transfer.
    pub fn is_unlimited(&self) -> bool {
        self.target_rate <= 0
    }
}
