use serde::{Deserialize, Serialize};

use crate::types::{TransferSnapshot, TransferStatus};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new transfer. The payload bytes travel alongside this header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransferRequest {
    pub name: String,
    /// Bytes per second; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_rate: Option<i64>,
}

/// Resumes a paused transfer, optionally with a new target rate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeTransferRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_rate: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransferResponse {
    pub id: String,
    pub status: TransferStatus,
    pub total_size: u64,
    pub target_rate: i64,
    /// Hex SHA-256 of the submitted payload.
    pub checksum: String,
}

/// Returned by pause and cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: TransferStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeTransferResponse {
    pub status: TransferStatus,
    pub target_rate: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListTransfersResponse {
    pub transfers: Vec<TransferSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_rate_is_optional() {
        let req: CreateTransferRequest = serde_json::from_str(r#"{"name":"a.bin"}"#).unwrap();
        assert_eq!(req.name, "a.bin");
        assert!(req.target_rate.is_none());

        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("target_rate"));
    }

    #[test]
    fn resume_request_defaults_to_keep_rate() {
        let req: ResumeTransferRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, ResumeTransferRequest::default());

        let req: ResumeTransferRequest =
            serde_json::from_str(r#"{"target_rate":2000000}"#).unwrap();
        assert_eq!(req.target_rate, Some(2_000_000));
    }

    #[test]
    fn create_response_shape() {
        let resp = CreateTransferResponse {
            id: "abc".into(),
            status: TransferStatus::InProgress,
            total_size: 5_000_000,
            target_rate: 1_000_000,
            checksum: "00".into(),
        };
        let v: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["status"], "in_progress");
        assert_eq!(v["total_size"], 5_000_000);
        assert_eq!(v["target_rate"], 1_000_000);
    }

    #[test]
    fn status_response_shape() {
        let v = serde_json::to_value(StatusResponse {
            status: TransferStatus::Paused,
        })
        .unwrap();
        assert_eq!(v, serde_json::json!({ "status": "paused" }));
    }
}
