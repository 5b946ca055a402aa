//! Wire types for the trickle throttled transfer service.
//!
//! These are transport-agnostic: any binding (HTTP, WebSocket, CLI) can
//! serialize them with serde.

pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    CreateTransferRequest, CreateTransferResponse, ListTransfersResponse, ResumeTransferRequest,
    ResumeTransferResponse, StatusResponse,
};
pub use types::{TransferSnapshot, TransferStatus, progress_percentage};
