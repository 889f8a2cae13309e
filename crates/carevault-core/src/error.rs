//! Error types for CareVault Core.

use std::fmt;

use thiserror::Error;

/// The kind of fixed-size cryptographic value that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    KemPublicKey,
    KemSecretKey,
    KemCiphertext,
    SharedSecret,
    SymmetricKey,
    Iv,
    AuthTag,
    KeyMaterial,
    X25519Key,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyKind::KemPublicKey => "KEM public key",
            KeyKind::KemSecretKey => "KEM secret key",
            KeyKind::KemCiphertext => "KEM ciphertext",
            KeyKind::SharedSecret => "shared secret",
            KeyKind::SymmetricKey => "symmetric key",
            KeyKind::Iv => "IV",
            KeyKind::AuthTag => "authentication tag",
            KeyKind::KeyMaterial => "key material",
            KeyKind::X25519Key => "X25519 key",
        };
        f.write_str(name)
    }
}

/// Errors raised by the cryptographic core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A key or fixed-size value does not have the length its algorithm mandates.
    #[error("{kind} must be {expected} bytes, got {actual}")]
    KeyFormat {
        kind: KeyKind,
        expected: usize,
        actual: usize,
    },

    #[error("decapsulation failed: {0}")]
    Decapsulation(String),

    /// Authenticated decryption rejected the ciphertext.
    #[error("authentication failed")]
    Authentication,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("malformed envelope: {0}")]
    EnvelopeFormat(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid verifying key")]
    InvalidVerifyingKey,

    #[error("encoding error: {0}")]
    EncodingError(String),
}

impl CoreError {
    pub(crate) fn key_format(kind: KeyKind, expected: usize, actual: usize) -> Self {
        CoreError::KeyFormat {
            kind,
            expected,
            actual,
        }
    }

    /// True when a recipient public key failed the length invariant.
    pub fn is_invalid_public_key(&self) -> bool {
        matches!(
            self,
            CoreError::KeyFormat {
                kind: KeyKind::KemPublicKey,
                ..
            }
        )
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
