//! Error types for sharing and revocation.

use carevault_core::{CoreError, RecordId};
use carevault_store::StoreError;
use thiserror::Error;

/// Errors that can occur during share and ledger operations.
#[derive(Debug, Error)]
pub enum ShareError {
    /// The record already has a revocation entry.
    #[error("record {0} is already revoked")]
    AlreadyRevoked(RecordId),

    /// No published verifying key of the owner accepts the attestation.
    #[error("sender attestation does not verify")]
    InvalidAttestation,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for share operations.
pub type Result<T> = std::result::Result<T, ShareError>;
