//! # CareVault Core
//!
//! Pure primitives for CareVault: identifiers, ML-KEM key types, the hybrid
//! cipher, and the sealed payload formats.
//!
//! This crate contains no I/O and no storage. Everything here is computation
//! over bytes.
//!
//! ## Key Types
//!
//! - [`KemPublicKey`] - A length-validated ML-KEM-768 public key
//! - [`KeyMaterial`] - Private KEM and signing keys, only ever handed to a storage tier
//! - [`PrivateKeyRef`] - Opaque handle that decapsulates and signs
//! - [`HybridEnvelope`] - The at-rest unit of the current scheme
//! - [`SealedPayload`] - Any generation of persisted payload, keyed by a marker byte
//! - [`Share`] and [`RevocationEntry`] - The sharing data model persisted by every store
//!
//! ## Hybrid Encryption
//!
//! See the [`cipher`] module. `encrypt` and `decrypt` compose encapsulation,
//! key derivation and AES-256-GCM.

pub mod cipher;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod kem;
pub mod legacy;
pub mod record;
pub mod types;

pub use cipher::{SealedBox, SharedSecret, SymmetricKey};
pub use crypto::{
    Ed25519PublicKey, Ed25519Signature, EncryptionKey, EncryptionNonce, EphemeralKeyPair,
    SharedKey, SigningKeypair, X25519PublicKey, X25519StaticSecret,
};
pub use envelope::{
    AlgorithmId, HybridEnvelope, LegacyEcdhEnvelope, LegacyEncodedPayload, Marker, SealedPayload,
};
pub use error::{CoreError, KeyKind, Result};
pub use kem::{
    KemPublicKey, KeyMaterial, PrivateKeyRef, KEM_CIPHERTEXT_LEN, KEM_PUBLIC_KEY_LEN,
    KEM_SECRET_KEY_LEN, KEM_SHARED_SECRET_LEN,
};
pub use record::{
    KeyPair, RecordMetadata, RevocationEntry, Share, StorageTier, StoredRecord,
};
pub use types::{now_millis, KeyId, RecordId, ShareId, UserId};
