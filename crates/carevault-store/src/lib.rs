//! # CareVault Store
//!
//! Storage abstraction for CareVault. Provides trait-based interfaces for
//! server-side persistence and for the client-side key slot table, with
//! SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - Records, shares, revocations and the public key directory
//! - [`KeySlotStore`] - Tier-wrapped private keys on this device
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`InsertResult`] - Result of inserting a uniquely keyed row
//!
//! ## Usage
//!
//! ```rust,no_run
//! use carevault_store::{SqliteStore, Store};
//! use carevault_core::UserId;
//!
//! async fn example() {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("vault.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let records = store.list_records(&UserId::from("patient-17")).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Unique shares**: one share per (record, recipient); a second is a `Conflict`
//! - **Atomic revocation**: the ledger's check-then-append is a single write
//! - **Append-only ledger**: revocation rows are never updated or deleted
//! - **Key history**: publishing a key deactivates, never deletes, the previous one

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, KeySlot, KeySlotStore, SlotKey, Store};

#[cfg(test)]
pub(crate) mod testing {
    //! Row builders shared by the backend tests.

    use bytes::Bytes;
    use carevault_core::{
        now_millis, AlgorithmId, Ed25519Signature, HybridEnvelope, KemPublicKey, KeyPair,
        RecordId, RecordMetadata, RevocationEntry, Share, ShareId, SigningKeypair, StorageTier,
        StoredRecord, UserId, KEM_CIPHERTEXT_LEN, KEM_PUBLIC_KEY_LEN,
    };
    use rand::RngCore;

    use crate::traits::{KeySlot, SlotKey};

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    pub fn sample_record(owner: &str) -> StoredRecord {
        let now = now_millis();
        StoredRecord {
            record_id: RecordId::generate(),
            owner_id: UserId::from(owner),
            encrypted_payload: Bytes::from(random_bytes(48)),
            metadata: RecordMetadata::new("vitals", "text/plain"),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn sample_share(record_id: RecordId, owner: &str, recipient: &str) -> Share {
        Share {
            share_id: ShareId::generate(),
            record_id,
            owner_id: UserId::from(owner),
            recipient_id: UserId::from(recipient),
            envelope: HybridEnvelope {
                algorithm_id: AlgorithmId::MlKem768Aes256Gcm,
                cipher_text: Bytes::from(random_bytes(20)),
                kem_cipher_text: Bytes::from(random_bytes(KEM_CIPHERTEXT_LEN)),
                iv: Bytes::from(random_bytes(12)),
                auth_tag: Bytes::from(random_bytes(16)),
                created_at: now_millis(),
                recipient_key_id: None,
            },
            sender_attestation: Ed25519Signature::from_bytes([7u8; 64]),
            created_at: now_millis(),
        }
    }

    pub fn sample_revocation(record_id: RecordId, by: &str, reason: &str) -> RevocationEntry {
        RevocationEntry {
            record_id,
            revoked_by: UserId::from(by),
            revoked_at: now_millis(),
            reason: reason.to_string(),
        }
    }

    pub fn sample_key(user: &str) -> KeyPair {
        let public_key = KemPublicKey::from_slice(&random_bytes(KEM_PUBLIC_KEY_LEN)).unwrap();
        KeyPair {
            user_id: UserId::from(user),
            key_id: public_key.key_id(),
            public_key,
            verifying_key: SigningKeypair::generate().public_key(),
            storage_tier: StorageTier::PlainPersistent,
            created_at: now_millis(),
            active: true,
        }
    }

    pub fn sample_slot(user: &str, slot: SlotKey) -> KeySlot {
        KeySlot {
            user_id: UserId::from(user),
            slot,
            tier: StorageTier::PlainPersistent,
            sealed: Bytes::from(random_bytes(32)),
            created_at: now_millis(),
        }
    }
}
