//! Store traits: the abstract interfaces for persistence.
//!
//! [`Store`] is the server-side collaborator holding records, shares,
//! revocations and the public key directory. [`KeySlotStore`] is the
//! client-side slot table where storage tiers keep wrapped private keys.
//! Implementations include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use bytes::Bytes;
use carevault_core::{
    KeyId, KeyPair, RecordId, RevocationEntry, Share, ShareId, StorageTier, StoredRecord, UserId,
};

use crate::error::Result;

/// Result of inserting a row with a uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// Row was inserted.
    Inserted,
    /// A row with the same primary key already exists. Nothing was written.
    AlreadyExists,
    /// A different share already exists for the same (record, recipient).
    Conflict {
        /// The existing share.
        existing: ShareId,
    },
}

/// Identifies one slot in a user's local key table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKey {
    /// Wrapped [`carevault_core::KeyMaterial`] for a KEM key.
    Kem(KeyId),
    /// A pre-quantum X25519 secret, used only to open legacy records.
    LegacyX25519,
}

impl SlotKey {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            SlotKey::Kem(_) => "kem",
            SlotKey::LegacyX25519 => "legacy_x25519",
        }
    }

    pub(crate) fn key_bytes(&self) -> Vec<u8> {
        match self {
            SlotKey::Kem(id) => id.as_bytes().to_vec(),
            SlotKey::LegacyX25519 => Vec::new(),
        }
    }

    pub(crate) fn from_parts(kind: &str, key: &[u8]) -> Option<Self> {
        match kind {
            "kem" => KeyId::try_from(key).ok().map(SlotKey::Kem),
            "legacy_x25519" => Some(SlotKey::LegacyX25519),
            _ => None,
        }
    }
}

/// A tier-wrapped secret in the local key table.
///
/// `sealed` is opaque to the store; only the tier that wrote it can open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlot {
    pub user_id: UserId,
    pub slot: SlotKey,
    pub tier: StorageTier,
    pub sealed: Bytes,
    pub created_at: i64,
}

/// Server-side persistence: records, shares, the revocation ledger and the
/// public key directory. Payloads and envelopes are opaque here.
///
/// - **One share per pair**: `(record_id, recipient_id)` is unique. A second
///   insert reports `Conflict` with the existing share id.
/// - **Atomic revocation**: `append_revocation` checks and writes in one step.
///   Of two concurrent callers for the same record exactly one sees `Inserted`.
/// - **Append-only ledger**: revocations are never updated or deleted.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Record Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new record. `AlreadyExists` if the id is taken.
    async fn insert_record(&self, record: &StoredRecord) -> Result<InsertResult>;

    /// Get a record by id.
    async fn get_record(&self, id: &RecordId) -> Result<Option<StoredRecord>>;

    /// Replace a record's payload. Returns false if the record does not exist.
    async fn update_record_payload(
        &self,
        id: &RecordId,
        encrypted_payload: &[u8],
        updated_at: i64,
    ) -> Result<bool>;

    /// Delete a record. Returns false if it did not exist.
    async fn delete_record(&self, id: &RecordId) -> Result<bool>;

    /// List an owner's records, oldest first.
    async fn list_records(&self, owner: &UserId) -> Result<Vec<StoredRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Share Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a share.
    ///
    /// # Returns
    /// - `Inserted` if the share was new.
    /// - `AlreadyExists` if a share with this id exists.
    /// - `Conflict` if another share exists for the same (record, recipient).
    async fn insert_share(&self, share: &Share) -> Result<InsertResult>;

    /// Get a share by id.
    async fn get_share(&self, id: &ShareId) -> Result<Option<Share>>;

    /// Get the share for a (record, recipient) pair, if any.
    async fn find_share(&self, record_id: &RecordId, recipient: &UserId)
        -> Result<Option<Share>>;

    /// All shares of a record, oldest first.
    async fn shares_for_record(&self, record_id: &RecordId) -> Result<Vec<Share>>;

    /// All shares granted to a recipient, oldest first.
    async fn shares_for_recipient(&self, recipient: &UserId) -> Result<Vec<Share>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Revocation Operations (append-only)
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a revocation unless one exists for the record.
    ///
    /// The existence check and the write happen atomically.
    async fn append_revocation(&self, entry: &RevocationEntry) -> Result<InsertResult>;

    /// Get the revocation for a record.
    async fn get_revocation(&self, record_id: &RecordId) -> Result<Option<RevocationEntry>>;

    /// All revocations made by a user, oldest first.
    async fn revocations_by(&self, user: &UserId) -> Result<Vec<RevocationEntry>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Key Directory Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish a key as the user's active key, deactivating any previous one.
    ///
    /// Publishing a key that is already present re-activates it.
    async fn publish_key(&self, key: &KeyPair) -> Result<()>;

    /// The user's active published key.
    async fn active_key(&self, user: &UserId) -> Result<Option<KeyPair>>;

    /// A published key by id, active or not.
    async fn key_by_id(&self, key_id: &KeyId) -> Result<Option<KeyPair>>;

    /// Every key the user ever published, oldest first.
    async fn keys_for_user(&self, user: &UserId) -> Result<Vec<KeyPair>>;
}

/// Client-side storage for tier-wrapped secrets.
#[async_trait]
pub trait KeySlotStore: Send + Sync {
    /// Insert or replace a slot.
    async fn put_slot(&self, slot: &KeySlot) -> Result<()>;

    /// Get one slot.
    async fn get_slot(&self, user: &UserId, slot: &SlotKey) -> Result<Option<KeySlot>>;

    /// All slots of a user.
    async fn list_slots(&self, user: &UserId) -> Result<Vec<KeySlot>>;

    /// Destroy all slots of a user. Returns how many were removed.
    async fn delete_slots(&self, user: &UserId) -> Result<usize>;
}
