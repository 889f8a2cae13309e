//! `Store` and `KeySlotStore` held in process memory.
//!
//! Matches `SqliteStore` row for row, including the share uniqueness rule and
//! the single-entry ledger. Used by tests and by short-lived clients.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use carevault_core::{
    KeyId, KeyPair, RecordId, RevocationEntry, Share, ShareId, StoredRecord, UserId,
};

use crate::error::{Result, StoreError};
use crate::traits::{InsertResult, KeySlot, KeySlotStore, SlotKey, Store};

/// Every table behind one lock, so each trait call is a single critical
/// section. Nothing survives a drop.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    records: HashMap<RecordId, StoredRecord>,

    /// Shares in insertion order, indexed by id.
    shares: Vec<Share>,
    share_index: HashMap<ShareId, usize>,

    /// Unique (record, recipient) index.
    share_pairs: HashMap<(RecordId, UserId), ShareId>,

    /// Append-only ledger, one entry per record.
    revocations: BTreeMap<RecordId, RevocationEntry>,
    revocation_order: Vec<RecordId>,

    /// Published keys in publication order.
    keys: Vec<KeyPair>,

    slots: BTreeMap<(UserId, SlotKey), KeySlot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_record(&self, record: &StoredRecord) -> Result<InsertResult> {
        let mut inner = self.write()?;

        if inner.records.contains_key(&record.record_id) {
            return Ok(InsertResult::AlreadyExists);
        }

        inner.records.insert(record.record_id, record.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_record(&self, id: &RecordId) -> Result<Option<StoredRecord>> {
        let inner = self.read()?;
        Ok(inner.records.get(id).cloned())
    }

    async fn update_record_payload(
        &self,
        id: &RecordId,
        encrypted_payload: &[u8],
        updated_at: i64,
    ) -> Result<bool> {
        let mut inner = self.write()?;

        match inner.records.get_mut(id) {
            Some(record) => {
                record.encrypted_payload = Bytes::copy_from_slice(encrypted_payload);
                record.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_record(&self, id: &RecordId) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner.records.remove(id).is_some())
    }

    async fn list_records(&self, owner: &UserId) -> Result<Vec<StoredRecord>> {
        let inner = self.read()?;

        let mut records: Vec<StoredRecord> = inner
            .records
            .values()
            .filter(|r| &r.owner_id == owner)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.record_id));
        Ok(records)
    }

    async fn insert_share(&self, share: &Share) -> Result<InsertResult> {
        let mut inner = self.write()?;

        if inner.share_index.contains_key(&share.share_id) {
            return Ok(InsertResult::AlreadyExists);
        }

        let pair = (share.record_id, share.recipient_id.clone());
        if let Some(&existing) = inner.share_pairs.get(&pair) {
            return Ok(InsertResult::Conflict { existing });
        }

        let position = inner.shares.len();
        inner.shares.push(share.clone());
        inner.share_index.insert(share.share_id, position);
        inner.share_pairs.insert(pair, share.share_id);

        Ok(InsertResult::Inserted)
    }

    async fn get_share(&self, id: &ShareId) -> Result<Option<Share>> {
        let inner = self.read()?;
        Ok(inner
            .share_index
            .get(id)
            .and_then(|&i| inner.shares.get(i))
            .cloned())
    }

    async fn find_share(
        &self,
        record_id: &RecordId,
        recipient: &UserId,
    ) -> Result<Option<Share>> {
        let inner = self.read()?;
        Ok(inner
            .share_pairs
            .get(&(*record_id, recipient.clone()))
            .and_then(|id| inner.share_index.get(id))
            .and_then(|&i| inner.shares.get(i))
            .cloned())
    }

    async fn shares_for_record(&self, record_id: &RecordId) -> Result<Vec<Share>> {
        let inner = self.read()?;
        Ok(inner
            .shares
            .iter()
            .filter(|s| &s.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn shares_for_recipient(&self, recipient: &UserId) -> Result<Vec<Share>> {
        let inner = self.read()?;
        Ok(inner
            .shares
            .iter()
            .filter(|s| &s.recipient_id == recipient)
            .cloned()
            .collect())
    }

    async fn append_revocation(&self, entry: &RevocationEntry) -> Result<InsertResult> {
        // Check and insert under one write guard.
        let mut inner = self.write()?;

        if inner.revocations.contains_key(&entry.record_id) {
            return Ok(InsertResult::AlreadyExists);
        }

        inner.revocations.insert(entry.record_id, entry.clone());
        inner.revocation_order.push(entry.record_id);
        Ok(InsertResult::Inserted)
    }

    async fn get_revocation(&self, record_id: &RecordId) -> Result<Option<RevocationEntry>> {
        let inner = self.read()?;
        Ok(inner.revocations.get(record_id).cloned())
    }

    async fn revocations_by(&self, user: &UserId) -> Result<Vec<RevocationEntry>> {
        let inner = self.read()?;
        Ok(inner
            .revocation_order
            .iter()
            .filter_map(|id| inner.revocations.get(id))
            .filter(|e| &e.revoked_by == user)
            .cloned()
            .collect())
    }

    async fn publish_key(&self, key: &KeyPair) -> Result<()> {
        let mut inner = self.write()?;

        for existing in inner.keys.iter_mut().filter(|k| k.user_id == key.user_id) {
            existing.active = false;
        }

        if let Some(existing) = inner.keys.iter_mut().find(|k| k.key_id == key.key_id) {
            existing.active = true;
        } else {
            let mut key = key.clone();
            key.active = true;
            inner.keys.push(key);
        }

        Ok(())
    }

    async fn active_key(&self, user: &UserId) -> Result<Option<KeyPair>> {
        let inner = self.read()?;
        Ok(inner
            .keys
            .iter()
            .find(|k| &k.user_id == user && k.active)
            .cloned())
    }

    async fn key_by_id(&self, key_id: &KeyId) -> Result<Option<KeyPair>> {
        let inner = self.read()?;
        Ok(inner.keys.iter().find(|k| &k.key_id == key_id).cloned())
    }

    async fn keys_for_user(&self, user: &UserId) -> Result<Vec<KeyPair>> {
        let inner = self.read()?;
        Ok(inner
            .keys
            .iter()
            .filter(|k| &k.user_id == user)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl KeySlotStore for MemoryStore {
    async fn put_slot(&self, slot: &KeySlot) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .slots
            .insert((slot.user_id.clone(), slot.slot), slot.clone());
        Ok(())
    }

    async fn get_slot(&self, user: &UserId, slot: &SlotKey) -> Result<Option<KeySlot>> {
        let inner = self.read()?;
        Ok(inner.slots.get(&(user.clone(), *slot)).cloned())
    }

    async fn list_slots(&self, user: &UserId) -> Result<Vec<KeySlot>> {
        let inner = self.read()?;
        Ok(inner
            .slots
            .values()
            .filter(|s| &s.user_id == user)
            .cloned()
            .collect())
    }

    async fn delete_slots(&self, user: &UserId) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.slots.len();
        inner.slots.retain(|(owner, _), _| owner != user);
        Ok(before - inner.slots.len())
    }
}
