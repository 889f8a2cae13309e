//! # CareVault
//!
//! Quantum-safe encryption, sharing and revocation for personal health
//! records.
//!
//! ## Overview
//!
//! - **Keys**: every user holds an ML-KEM-768 key pair. The private half is
//!   wrapped by the best storage tier the device offers and never leaves it.
//! - **Records**: sealed to their owner with ML-KEM-768 + AES-256-GCM. Older
//!   payload generations stay readable through a fallback chain.
//! - **Shares**: the owner re-encrypts a record to a recipient and signs the
//!   grant. The storage layer only ever sees ciphertext.
//! - **Revocation**: per record, permanent, recorded in an append-only ledger.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use carevault::{CareVault, VaultConfig};
//! use carevault::core::{RecordMetadata, UserId};
//! use carevault::store::MemoryStore;
//!
//! async fn example() {
//!     let store = Arc::new(MemoryStore::new());
//!     let vault = CareVault::new(store.clone(), store, VaultConfig::default(), None);
//!
//!     let alice = UserId::from("alice");
//!     let bob = UserId::from("bob");
//!     vault.ensure_keys(&bob).await.unwrap();
//!
//!     let record = vault
//!         .store_record(&alice, b"BP 120/80", RecordMetadata::new("bp", "text/plain"))
//!         .await
//!         .unwrap();
//!
//!     let share = vault.share_record(&record.record_id, &alice, &bob).await.unwrap();
//!     let plaintext = vault.open_share(&share.share_id, &bob).await.unwrap();
//!     assert_eq!(plaintext, b"BP 120/80");
//!
//!     vault.revoke_share(&record.record_id, &alice, "changed provider").await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `carevault::core` - Primitives, envelopes and the hybrid cipher
//! - `carevault::store` - Storage traits, SQLite and in-memory backends
//! - `carevault::keys` - Key vault and storage tiers
//! - `carevault::share` - Share state and the revocation ledger

pub mod codec;
pub mod config;
pub mod error;
pub mod fallback;
pub mod sharing;
pub mod vault;

pub use carevault_core as core;
pub use carevault_keys as keys;
pub use carevault_share as share;
pub use carevault_store as store;

pub use codec::RecordCodec;
pub use config::VaultConfig;
pub use error::{ErrorClass, Result, VaultError};
pub use fallback::{
    DecodeOutcome, DecodeStrategy, DecryptionFallbackChain, HybridStrategy, KeySource,
    LegacyEcdhStrategy, LegacyEncodedStrategy,
};
pub use sharing::SharingProtocol;
pub use vault::{CareVault, RecordRead};

pub use carevault_core::{
    HybridEnvelope, KeyPair, RecordId, RecordMetadata, RevocationEntry, Share, ShareId,
    StorageTier, StoredRecord, UserId,
};
pub use carevault_share::ShareState;
