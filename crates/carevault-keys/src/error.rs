//! Error types for key management.

use carevault_core::{CoreError, StorageTier, UserId};
use carevault_store::StoreError;
use thiserror::Error;

use crate::attestation::AttestationError;

/// Errors raised by the key vault and its storage tiers.
#[derive(Debug, Error)]
pub enum KeysError {
    /// The private key cannot be resolved in this execution context.
    ///
    /// The key may still be usable on the device or session that created it.
    #[error("private key not available: {0}")]
    NotAvailable(String),

    /// The user has never published a key.
    #[error("no published key for user {0}")]
    NotFound(UserId),

    /// Every configured storage tier failed its probe or refused to seal.
    #[error("no usable key storage tier")]
    NoUsableTier,

    /// A tier did not answer within the probe timeout.
    #[error("{0} tier timed out")]
    TierTimeout(StorageTier),

    #[error("authenticator error: {0}")]
    Authenticator(String),

    #[error("attestation rejected: {0}")]
    Attestation(#[from] AttestationError),

    /// A sealed slot blob could not be decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl KeysError {
    /// True when the failure means "try on the original device".
    pub fn is_not_available(&self) -> bool {
        matches!(self, KeysError::NotAvailable(_) | KeysError::TierTimeout(_))
    }
}

/// Result type for key operations.
pub type Result<T> = std::result::Result<T, KeysError>;
