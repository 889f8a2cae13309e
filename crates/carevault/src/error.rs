//! Error types for the vault.

use carevault_core::{CoreError, KeyKind, RecordId, ShareId, UserId};
use carevault_keys::KeysError;
use carevault_share::ShareError;
use carevault_store::StoreError;
use thiserror::Error;

/// How a caller should treat an error.
///
/// A routing layer maps `Bug` to 5xx and the others to 4xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Something is broken: storage, corrupted or tampered data.
    Bug,
    /// Retrying elsewhere can succeed, e.g. on the device holding the key.
    Recoverable,
    /// The request itself was refused.
    Business,
}

/// Errors returned by every vault operation.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A key did not have the length its algorithm mandates.
    #[error("{kind} must be {expected} bytes, got {actual}")]
    KeyFormat {
        kind: KeyKind,
        expected: usize,
        actual: usize,
    },

    /// The caller's private key cannot be resolved here.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// Authenticated decryption failed. Never retried with weaker schemes.
    #[error("authentication failed")]
    Authentication,

    /// The recipient has no published key.
    #[error("recipient {0} has no published key")]
    RecipientKeyUnavailable(UserId),

    #[error("record {0} is already revoked")]
    AlreadyRevoked(RecordId),

    #[error("share {0} has been revoked")]
    ShareRevoked(ShareId),

    /// Every decoding strategy that accepts the payload failed.
    #[error("record cannot be decrypted: {0}")]
    UndecryptableRecord(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The recipient already holds a share of this record.
    #[error("record already shared with recipient as {existing}")]
    DuplicateShare { existing: ShareId },

    #[error("share attestation does not verify")]
    InvalidAttestation,

    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    pub fn class(&self) -> ErrorClass {
        match self {
            // A key of the wrong size never comes from a correct peer.
            VaultError::KeyFormat { .. }
            | VaultError::Store(_)
            | VaultError::Internal(_)
            | VaultError::Authentication
            | VaultError::UndecryptableRecord(_)
            | VaultError::InvalidAttestation => ErrorClass::Bug,

            VaultError::KeyUnavailable(_) | VaultError::RecipientKeyUnavailable(_) => {
                ErrorClass::Recoverable
            }

            VaultError::AlreadyRevoked(_)
            | VaultError::ShareRevoked(_)
            | VaultError::NotFound(_)
            | VaultError::NotAuthorized(_)
            | VaultError::DuplicateShare { .. }
            | VaultError::PayloadTooLarge { .. } => ErrorClass::Business,
        }
    }
}

impl From<CoreError> for VaultError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::KeyFormat {
                kind,
                expected,
                actual,
            } => VaultError::KeyFormat {
                kind,
                expected,
                actual,
            },
            CoreError::Authentication | CoreError::Decapsulation(_) => VaultError::Authentication,
            CoreError::EnvelopeFormat(msg) | CoreError::UnsupportedAlgorithm(msg) => {
                VaultError::UndecryptableRecord(msg)
            }
            CoreError::InvalidSignature | CoreError::InvalidVerifyingKey => {
                VaultError::InvalidAttestation
            }
            CoreError::Encryption(msg) | CoreError::EncodingError(msg) => VaultError::Internal(msg),
        }
    }
}

impl From<KeysError> for VaultError {
    fn from(err: KeysError) -> Self {
        match err {
            KeysError::Core(e) => e.into(),
            KeysError::Store(e) => VaultError::Store(e),
            KeysError::Encoding(msg) => VaultError::Internal(msg),
            KeysError::NotFound(user) => {
                VaultError::KeyUnavailable(format!("no published key for {}", user))
            }
            other => VaultError::KeyUnavailable(other.to_string()),
        }
    }
}

impl From<ShareError> for VaultError {
    fn from(err: ShareError) -> Self {
        match err {
            ShareError::AlreadyRevoked(id) => VaultError::AlreadyRevoked(id),
            ShareError::InvalidAttestation => VaultError::InvalidAttestation,
            ShareError::Core(e) => e.into(),
            ShareError::Store(e) => VaultError::Store(e),
        }
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
