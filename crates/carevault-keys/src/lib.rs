//! # CareVault Keys
//!
//! Key lifecycle for CareVault users.
//!
//! ## Overview
//!
//! Every user has one active ML-KEM key pair. The public half is published to
//! the server-side directory; the private half never leaves the client. It is
//! wrapped by a storage tier and kept in the local slot table:
//!
//! 1. **Hardware**: wrapped under an authenticator's PRF output. The
//!    credential's attestation is parsed and checked before use.
//! 2. **Software asymmetric**: wrapped to a device key that lives only as
//!    long as the process.
//! 3. **Plain persistent**: stored as-is, for older clients.
//!
//! The vault tries tiers in configured order; a tier whose probe fails or
//! times out is skipped.
//!
//! ## Loss of Access
//!
//! Keys are held only on the client. Clearing the local slots, or losing the
//! device that wrapped them, makes everything sealed to those keys
//! unreadable by that user. There is no escrow.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use carevault_core::UserId;
//! use carevault_keys::{KeyVault, KeyVaultConfig};
//! use carevault_store::MemoryStore;
//!
//! async fn example() {
//!     let store = Arc::new(MemoryStore::new());
//!     let vault = KeyVault::new(store.clone(), store, KeyVaultConfig::default(), None);
//!
//!     let alice = UserId::from("alice");
//!     let (public_key, usable) = vault.ensure_keys(&alice).await.unwrap();
//!     let private = vault.resolve_private_key_reference(&alice).await.unwrap();
//! }
//! ```

pub mod attestation;
pub mod error;
pub mod hardware;
pub mod locks;
pub mod plain;
pub mod software;
pub mod tier;
pub mod vault;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use attestation::{
    verify_attestation, AttestationError, AttestationObject, AttestationStatement,
    AttestedCredential, AuthenticatorData,
};
pub use error::{KeysError, Result};
pub use hardware::{Authenticator, CredentialRequest, HardwareTier};
pub use locks::{KeyedGuard, KeyedLocks};
pub use plain::PlainTier;
pub use software::SoftwareTier;
pub use tier::KeyStorageTier;
pub use vault::{KeyVault, KeyVaultConfig};
