//! Error types for the gattlink library
//!
//! `GattError` is both the synchronous result of the caller-facing API and the
//! failure half of every operation outcome delivered to the listener.

use crate::gatt::state::ConnectionState;
use crate::gatt::types::GattStatus;
use crate::uuid::Uuid;
use thiserror::Error;

/// Errors from GATT operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Connection is not ready for GATT operations")]
    NotReady,

    #[error(
        "Attribute not found: service {service}, characteristic {characteristic}{}",
        descriptor_suffix(.descriptor)
    )]
    AttributeNotFound {
        service: Uuid,
        characteristic: Uuid,
        descriptor: Option<Uuid>,
    },

    #[error("Transport rejected the submission: {0}")]
    SubmissionRejected(String),

    #[error("Operation failed with status {0}")]
    OperationFailed(GattStatus),

    #[error("Operation cancelled by disconnect")]
    Cancelled,

    #[error("Operation timed out")]
    Timeout,

    #[error("Not permitted in state {0:?}")]
    InvalidState(ConnectionState),

    #[error("Operations are still queued")]
    Busy,

    #[error("Attribute operation not permitted")]
    NotPermitted,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<TransportError> for GattError {
    fn from(err: TransportError) -> Self {
        GattError::SubmissionRejected(err.to_string())
    }
}

/// Synchronous refusal of a submission by the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{0}")]
    Rejected(String),

    #[error("link not connected")]
    NotConnected,
}

fn descriptor_suffix(descriptor: &Option<Uuid>) -> String {
    descriptor
        .map(|d| format!(", descriptor {d}"))
        .unwrap_or_default()
}

pub type GattResult<T> = Result<T, GattError>;
