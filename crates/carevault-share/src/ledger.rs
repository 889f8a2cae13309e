//! The revocation ledger.
//!
//! Append-only: at most one entry per record, never updated or removed.
//! Atomicity of check-then-append is delegated to the store, so of two
//! concurrent revocations of the same record exactly one succeeds.

use std::sync::Arc;

use carevault_core::{now_millis, RecordId, RevocationEntry, Share, UserId};
use carevault_store::{InsertResult, Store};

use crate::error::{Result, ShareError};
use crate::share::ShareState;

/// Revocation ledger over a [`Store`].
pub struct RevocationLedger<S> {
    store: Arc<S>,
}

impl<S> Clone for RevocationLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> RevocationLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Revoke every share of a record.
    ///
    /// Authorization is the caller's job. Returns
    /// [`ShareError::AlreadyRevoked`] if an entry exists; the existing entry
    /// is left untouched.
    pub async fn revoke(
        &self,
        record_id: &RecordId,
        revoked_by: &UserId,
        reason: &str,
    ) -> Result<RevocationEntry> {
        let entry = RevocationEntry {
            record_id: *record_id,
            revoked_by: revoked_by.clone(),
            revoked_at: now_millis(),
            reason: reason.to_string(),
        };

        match self.store.append_revocation(&entry).await? {
            InsertResult::Inserted => {
                tracing::info!(record = %record_id, by = %revoked_by, "record shares revoked");
                Ok(entry)
            }
            InsertResult::AlreadyExists | InsertResult::Conflict { .. } => {
                tracing::debug!(record = %record_id, "revocation already recorded");
                Err(ShareError::AlreadyRevoked(*record_id))
            }
        }
    }

    /// The revocation entry for a record, if any.
    pub async fn entry_for(&self, record_id: &RecordId) -> Result<Option<RevocationEntry>> {
        Ok(self.store.get_revocation(record_id).await?)
    }

    pub async fn is_revoked(&self, record_id: &RecordId) -> Result<bool> {
        Ok(self.entry_for(record_id).await?.is_some())
    }

    /// Revocations made by a user, oldest first.
    pub async fn entries_by(&self, user: &UserId) -> Result<Vec<RevocationEntry>> {
        Ok(self.store.revocations_by(user).await?)
    }

    /// Current state of a persisted share.
    pub async fn state_of(&self, share: &Share) -> Result<ShareState> {
        let entry = self.entry_for(&share.record_id).await?;
        Ok(ShareState::of(share, entry.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carevault_store::MemoryStore;

    fn ledger() -> RevocationLedger<MemoryStore> {
        RevocationLedger::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_revoke_once() {
        let ledger = ledger();
        let record = RecordId::generate();
        let alice = UserId::from("alice");

        assert!(!ledger.is_revoked(&record).await.unwrap());

        let entry = ledger.revoke(&record, &alice, "moved clinic").await.unwrap();
        assert_eq!(entry.reason, "moved clinic");
        assert!(ledger.is_revoked(&record).await.unwrap());

        let second = ledger.revoke(&record, &alice, "again").await;
        assert!(matches!(second, Err(ShareError::AlreadyRevoked(id)) if id == record));

        // The first entry is kept as written.
        let stored = ledger.entry_for(&record).await.unwrap().unwrap();
        assert_eq!(stored, entry);
    }

    #[tokio::test]
    async fn test_entries_by_user() {
        let ledger = ledger();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        ledger.revoke(&RecordId::generate(), &alice, "a").await.unwrap();
        ledger.revoke(&RecordId::generate(), &alice, "b").await.unwrap();
        ledger.revoke(&RecordId::generate(), &bob, "c").await.unwrap();

        let entries = ledger.entries_by(&alice).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.revoked_by == alice));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_revocations_one_winner() {
        let ledger = ledger();
        let record = RecordId::generate();

        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .revoke(&record, &UserId::from("alice"), &format!("attempt {}", i))
                    .await
            }));
        }

        let mut won = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => won += 1,
                Err(ShareError::AlreadyRevoked(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(won, 1);
    }
}
