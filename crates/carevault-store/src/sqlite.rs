//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend for CareVault. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use carevault_core::{
    Ed25519PublicKey, Ed25519Signature, HybridEnvelope, KemPublicKey, KeyId, KeyPair,
    RecordId, RecordMetadata, RevocationEntry, Share, ShareId, StorageTier, StoredRecord,
    UserId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{InsertResult, KeySlot, KeySlotStore, SlotKey, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(format!("connection mutex: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row conversion
// ─────────────────────────────────────────────────────────────────────────────

fn invalid_column(idx: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.into(), Type::Blob)
}

fn fixed<const N: usize>(row: &Row<'_>, idx: usize, name: &str) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes.try_into().map_err(|_| invalid_column(idx, name))
}

const RECORD_COLUMNS: &str =
    "record_id, owner_id, encrypted_payload, label, content_type, created_at, updated_at";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let payload: Vec<u8> = row.get(2)?;
    Ok(StoredRecord {
        record_id: RecordId::from_bytes(fixed(row, 0, "record_id")?),
        owner_id: UserId::new(row.get::<_, String>(1)?),
        encrypted_payload: Bytes::from(payload),
        metadata: RecordMetadata {
            label: row.get(3)?,
            content_type: row.get(4)?,
        },
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const SHARE_COLUMNS: &str =
    "share_id, record_id, owner_id, recipient_id, envelope, sender_attestation, created_at";

fn row_to_share(row: &Row<'_>) -> rusqlite::Result<Share> {
    let envelope_bytes: Vec<u8> = row.get(4)?;
    let envelope = HybridEnvelope::from_bytes(&envelope_bytes)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Blob, Box::new(e)))?;

    Ok(Share {
        share_id: ShareId::from_bytes(fixed(row, 0, "share_id")?),
        record_id: RecordId::from_bytes(fixed(row, 1, "record_id")?),
        owner_id: UserId::new(row.get::<_, String>(2)?),
        recipient_id: UserId::new(row.get::<_, String>(3)?),
        envelope,
        sender_attestation: Ed25519Signature::from_bytes(fixed(row, 5, "sender_attestation")?),
        created_at: row.get(6)?,
    })
}

fn row_to_revocation(row: &Row<'_>) -> rusqlite::Result<RevocationEntry> {
    Ok(RevocationEntry {
        record_id: RecordId::from_bytes(fixed(row, 0, "record_id")?),
        revoked_by: UserId::new(row.get::<_, String>(1)?),
        revoked_at: row.get(2)?,
        reason: row.get(3)?,
    })
}

const KEY_COLUMNS: &str =
    "key_id, user_id, kem_public, verifying_key, storage_tier, created_at, active";

fn row_to_key(row: &Row<'_>) -> rusqlite::Result<KeyPair> {
    let kem_public: Vec<u8> = row.get(2)?;
    let public_key = KemPublicKey::try_from(kem_public)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Blob, Box::new(e)))?;
    let tier: String = row.get(4)?;

    Ok(KeyPair {
        key_id: KeyId::from_bytes(fixed(row, 0, "key_id")?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        public_key,
        verifying_key: Ed25519PublicKey::from_bytes(fixed(row, 3, "verifying_key")?),
        storage_tier: StorageTier::parse(&tier)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(4, "storage_tier".into(), Type::Text))?,
        created_at: row.get(5)?,
        active: row.get(6)?,
    })
}

fn row_to_slot(row: &Row<'_>) -> rusqlite::Result<KeySlot> {
    let kind: String = row.get(1)?;
    let key: Vec<u8> = row.get(2)?;
    let tier: String = row.get(3)?;
    let sealed: Vec<u8> = row.get(4)?;

    Ok(KeySlot {
        user_id: UserId::new(row.get::<_, String>(0)?),
        slot: SlotKey::from_parts(&kind, &key).ok_or_else(|| invalid_column(2, "slot_key"))?,
        tier: StorageTier::parse(&tier)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(3, "tier".into(), Type::Text))?,
        sealed: Bytes::from(sealed),
        created_at: row.get(5)?,
    })
}

fn encode_envelope(envelope: &HybridEnvelope) -> Result<Vec<u8>> {
    envelope
        .to_bytes()
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_record(&self, record: &StoredRecord) -> Result<InsertResult> {
        let record = record.clone();

        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT INTO records (
                    record_id, owner_id, encrypted_payload, label, content_type,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(record_id) DO NOTHING",
                params![
                    record.record_id.as_bytes().as_slice(),
                    record.owner_id.as_str(),
                    record.encrypted_payload.as_ref(),
                    record.metadata.label,
                    record.metadata.content_type,
                    record.created_at,
                    record.updated_at,
                ],
            )?;

            Ok(if changed == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn get_record(&self, id: &RecordId) -> Result<Option<StoredRecord>> {
        let id = *id;

        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM records WHERE record_id = ?1", RECORD_COLUMNS),
                params![id.as_bytes().as_slice()],
                row_to_record,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn update_record_payload(
        &self,
        id: &RecordId,
        encrypted_payload: &[u8],
        updated_at: i64,
    ) -> Result<bool> {
        let id = *id;
        let payload = encrypted_payload.to_vec();

        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE records SET encrypted_payload = ?2, updated_at = ?3 WHERE record_id = ?1",
                params![id.as_bytes().as_slice(), payload, updated_at],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_record(&self, id: &RecordId) -> Result<bool> {
        let id = *id;

        self.run(move |conn| {
            let changed = conn.execute(
                "DELETE FROM records WHERE record_id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list_records(&self, owner: &UserId) -> Result<Vec<StoredRecord>> {
        let owner = owner.clone();

        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM records WHERE owner_id = ?1 ORDER BY created_at, record_id",
                RECORD_COLUMNS
            ))?;
            let records = stmt
                .query_map(params![owner.as_str()], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn insert_share(&self, share: &Share) -> Result<InsertResult> {
        let share = share.clone();
        let envelope = encode_envelope(&share.envelope)?;

        self.run(move |conn| {
            // The unique (record_id, recipient_id) constraint settles races
            // between processes; DO NOTHING turns a loss into a zero-row write.
            let changed = conn.execute(
                "INSERT INTO shares (
                    share_id, record_id, owner_id, recipient_id, envelope,
                    sender_attestation, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT DO NOTHING",
                params![
                    share.share_id.as_bytes().as_slice(),
                    share.record_id.as_bytes().as_slice(),
                    share.owner_id.as_str(),
                    share.recipient_id.as_str(),
                    envelope,
                    share.sender_attestation.as_bytes().as_slice(),
                    share.created_at,
                ],
            )?;

            if changed > 0 {
                return Ok(InsertResult::Inserted);
            }

            let existing: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT share_id FROM shares WHERE record_id = ?1 AND recipient_id = ?2",
                    params![
                        share.record_id.as_bytes().as_slice(),
                        share.recipient_id.as_str()
                    ],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(bytes) if bytes.as_slice() != share.share_id.as_bytes() => {
                    let existing = ShareId::try_from(bytes.as_slice()).map_err(|_| {
                        StoreError::InvalidData("share_id is not 16 bytes".into())
                    })?;
                    Ok(InsertResult::Conflict { existing })
                }
                _ => Ok(InsertResult::AlreadyExists),
            }
        })
        .await
    }

    async fn get_share(&self, id: &ShareId) -> Result<Option<Share>> {
        let id = *id;

        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM shares WHERE share_id = ?1", SHARE_COLUMNS),
                params![id.as_bytes().as_slice()],
                row_to_share,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn find_share(
        &self,
        record_id: &RecordId,
        recipient: &UserId,
    ) -> Result<Option<Share>> {
        let record_id = *record_id;
        let recipient = recipient.clone();

        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM shares WHERE record_id = ?1 AND recipient_id = ?2",
                    SHARE_COLUMNS
                ),
                params![record_id.as_bytes().as_slice(), recipient.as_str()],
                row_to_share,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn shares_for_record(&self, record_id: &RecordId) -> Result<Vec<Share>> {
        let record_id = *record_id;

        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM shares WHERE record_id = ?1 ORDER BY created_at, rowid",
                SHARE_COLUMNS
            ))?;
            let shares = stmt
                .query_map(params![record_id.as_bytes().as_slice()], row_to_share)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(shares)
        })
        .await
    }

    async fn shares_for_recipient(&self, recipient: &UserId) -> Result<Vec<Share>> {
        let recipient = recipient.clone();

        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM shares WHERE recipient_id = ?1 ORDER BY created_at, rowid",
                SHARE_COLUMNS
            ))?;
            let shares = stmt
                .query_map(params![recipient.as_str()], row_to_share)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(shares)
        })
        .await
    }

    async fn append_revocation(&self, entry: &RevocationEntry) -> Result<InsertResult> {
        let entry = entry.clone();

        self.run(move |conn| {
            // Primary key on record_id makes check-then-append a single statement.
            let changed = conn.execute(
                "INSERT INTO revocations (record_id, revoked_by, revoked_at, reason)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(record_id) DO NOTHING",
                params![
                    entry.record_id.as_bytes().as_slice(),
                    entry.revoked_by.as_str(),
                    entry.revoked_at,
                    entry.reason,
                ],
            )?;

            Ok(if changed == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn get_revocation(&self, record_id: &RecordId) -> Result<Option<RevocationEntry>> {
        let record_id = *record_id;

        self.run(move |conn| {
            conn.query_row(
                "SELECT record_id, revoked_by, revoked_at, reason
                 FROM revocations WHERE record_id = ?1",
                params![record_id.as_bytes().as_slice()],
                row_to_revocation,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn revocations_by(&self, user: &UserId) -> Result<Vec<RevocationEntry>> {
        let user = user.clone();

        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT record_id, revoked_by, revoked_at, reason
                 FROM revocations WHERE revoked_by = ?1
                 ORDER BY revoked_at, rowid",
            )?;
            let entries = stmt
                .query_map(params![user.as_str()], row_to_revocation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn publish_key(&self, key: &KeyPair) -> Result<()> {
        let key = key.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "UPDATE public_keys SET active = 0 WHERE user_id = ?1",
                params![key.user_id.as_str()],
            )?;
            tx.execute(
                "INSERT INTO public_keys (
                    key_id, user_id, kem_public, verifying_key, storage_tier, created_at, active
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
                ON CONFLICT(key_id) DO UPDATE SET active = 1",
                params![
                    key.key_id.as_bytes().as_slice(),
                    key.user_id.as_str(),
                    key.public_key.as_bytes(),
                    key.verifying_key.as_bytes().as_slice(),
                    key.storage_tier.as_str(),
                    key.created_at,
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn active_key(&self, user: &UserId) -> Result<Option<KeyPair>> {
        let user = user.clone();

        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM public_keys WHERE user_id = ?1 AND active = 1",
                    KEY_COLUMNS
                ),
                params![user.as_str()],
                row_to_key,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn key_by_id(&self, key_id: &KeyId) -> Result<Option<KeyPair>> {
        let key_id = *key_id;

        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM public_keys WHERE key_id = ?1", KEY_COLUMNS),
                params![key_id.as_bytes().as_slice()],
                row_to_key,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn keys_for_user(&self, user: &UserId) -> Result<Vec<KeyPair>> {
        let user = user.clone();

        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM public_keys WHERE user_id = ?1 ORDER BY created_at, rowid",
                KEY_COLUMNS
            ))?;
            let keys = stmt
                .query_map(params![user.as_str()], row_to_key)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
        .await
    }
}

#[async_trait]
impl KeySlotStore for SqliteStore {
    async fn put_slot(&self, slot: &KeySlot) -> Result<()> {
        let slot = slot.clone();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO local_keys (user_id, slot_kind, slot_key, tier, sealed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, slot_kind, slot_key) DO UPDATE SET
                    tier = excluded.tier,
                    sealed = excluded.sealed,
                    created_at = excluded.created_at",
                params![
                    slot.user_id.as_str(),
                    slot.slot.kind(),
                    slot.slot.key_bytes(),
                    slot.tier.as_str(),
                    slot.sealed.as_ref(),
                    slot.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_slot(&self, user: &UserId, slot: &SlotKey) -> Result<Option<KeySlot>> {
        let user = user.clone();
        let slot = *slot;

        self.run(move |conn| {
            conn.query_row(
                "SELECT user_id, slot_kind, slot_key, tier, sealed, created_at
                 FROM local_keys WHERE user_id = ?1 AND slot_kind = ?2 AND slot_key = ?3",
                params![user.as_str(), slot.kind(), slot.key_bytes()],
                row_to_slot,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_slots(&self, user: &UserId) -> Result<Vec<KeySlot>> {
        let user = user.clone();

        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, slot_kind, slot_key, tier, sealed, created_at
                 FROM local_keys WHERE user_id = ?1 ORDER BY created_at, rowid",
            )?;
            let slots = stmt
                .query_map(params![user.as_str()], row_to_slot)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(slots)
        })
        .await
    }

    async fn delete_slots(&self, user: &UserId) -> Result<usize> {
        let user = user.clone();

        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM local_keys WHERE user_id = ?1",
                params![user.as_str()],
            )?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_key, sample_record, sample_revocation, sample_share, sample_slot};

    #[tokio::test]
    async fn test_insert_and_get_record() {
        let store = SqliteStore::open_memory().unwrap();
        let record = sample_record("alice");

        let result = store.insert_record(&record).await.unwrap();
        assert_eq!(result, InsertResult::Inserted);

        let retrieved = store.get_record(&record.record_id).await.unwrap().unwrap();
        assert_eq!(retrieved, record);

        let again = store.insert_record(&record).await.unwrap();
        assert_eq!(again, InsertResult::AlreadyExists);
    }

    #[tokio::test]
    async fn test_update_and_delete_record() {
        let store = SqliteStore::open_memory().unwrap();
        let record = sample_record("alice");
        store.insert_record(&record).await.unwrap();

        assert!(store
            .update_record_payload(&record.record_id, b"\x03resealed", 42)
            .await
            .unwrap());
        let updated = store.get_record(&record.record_id).await.unwrap().unwrap();
        assert_eq!(updated.encrypted_payload.as_ref(), b"\x03resealed");
        assert_eq!(updated.updated_at, 42);
        assert_eq!(updated.created_at, record.created_at);

        assert!(store.delete_record(&record.record_id).await.unwrap());
        assert!(!store
            .update_record_payload(&record.record_id, b"x", 43)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_records_by_owner() {
        let store = SqliteStore::open_memory().unwrap();
        store.insert_record(&sample_record("alice")).await.unwrap();
        store.insert_record(&sample_record("alice")).await.unwrap();
        store.insert_record(&sample_record("bob")).await.unwrap();

        let alice = store.list_records(&UserId::from("alice")).await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|r| r.owner_id.as_str() == "alice"));
    }

    #[tokio::test]
    async fn test_share_roundtrip_and_uniqueness() {
        let store = SqliteStore::open_memory().unwrap();
        let record_id = RecordId::generate();
        let share = sample_share(record_id, "alice", "bob");

        assert_eq!(
            store.insert_share(&share).await.unwrap(),
            InsertResult::Inserted
        );
        assert_eq!(
            store.insert_share(&share).await.unwrap(),
            InsertResult::AlreadyExists
        );

        let duplicate = sample_share(record_id, "alice", "bob");
        assert_eq!(
            store.insert_share(&duplicate).await.unwrap(),
            InsertResult::Conflict {
                existing: share.share_id
            }
        );

        let retrieved = store.get_share(&share.share_id).await.unwrap().unwrap();
        assert_eq!(retrieved, share);

        let by_recipient = store
            .shares_for_recipient(&UserId::from("bob"))
            .await
            .unwrap();
        assert_eq!(by_recipient, vec![share]);
    }

    #[tokio::test]
    async fn test_revocation_append_is_atomic() {
        let store = SqliteStore::open_memory().unwrap();
        let record_id = RecordId::generate();

        let first = sample_revocation(record_id, "alice", "no longer needed");
        let second = sample_revocation(record_id, "alice", "second try");

        assert_eq!(
            store.append_revocation(&first).await.unwrap(),
            InsertResult::Inserted
        );
        assert_eq!(
            store.append_revocation(&second).await.unwrap(),
            InsertResult::AlreadyExists
        );

        let stored = store.get_revocation(&record_id).await.unwrap().unwrap();
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn test_concurrent_revocations_one_winner() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let record_id = RecordId::generate();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let entry = sample_revocation(record_id, "alice", &format!("racer {}", i));
                store.append_revocation(&entry).await.unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == InsertResult::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_key_directory() {
        let store = SqliteStore::open_memory().unwrap();
        let first = sample_key("alice");
        let second = sample_key("alice");

        store.publish_key(&first).await.unwrap();
        store.publish_key(&second).await.unwrap();

        let active = store
            .active_key(&UserId::from("alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.key_id, second.key_id);
        assert_eq!(active.public_key, second.public_key);

        let history = store.keys_for_user(&UserId::from("alice")).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|k| k.active).count(), 1);

        // Re-publishing an old key re-activates it.
        store.publish_key(&first).await.unwrap();
        let active = store
            .active_key(&UserId::from("alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.key_id, first.key_id);
    }

    #[tokio::test]
    async fn test_slots_upsert_and_delete() {
        let store = SqliteStore::open_memory().unwrap();
        let key_id = KeyId::derive(b"pk");
        let mut slot = sample_slot("alice", SlotKey::Kem(key_id));

        store.put_slot(&slot).await.unwrap();
        slot.sealed = Bytes::from_static(b"rewrapped");
        store.put_slot(&slot).await.unwrap();
        store
            .put_slot(&sample_slot("alice", SlotKey::LegacyX25519))
            .await
            .unwrap();

        let fetched = store
            .get_slot(&UserId::from("alice"), &SlotKey::Kem(key_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.sealed.as_ref(), b"rewrapped");
        assert_eq!(store.list_slots(&UserId::from("alice")).await.unwrap().len(), 2);

        assert_eq!(store.delete_slots(&UserId::from("alice")).await.unwrap(), 2);
        assert!(store
            .list_slots(&UserId::from("alice"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let record = sample_record("alice");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_record(&record).await.unwrap();
            store
                .append_revocation(&sample_revocation(record.record_id, "alice", "x"))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get_record(&record.record_id).await.unwrap(),
            Some(record.clone())
        );
        assert!(store
            .get_revocation(&record.record_id)
            .await
            .unwrap()
            .is_some());
    }
}
