//! The CareVault: unified API over keys, records and sharing.

use std::sync::Arc;

use carevault_core::{
    now_millis, HybridEnvelope, KemPublicKey, KeyPair, RecordId, RecordMetadata,
    RevocationEntry, SealedPayload, Share, ShareId, StorageTier, StoredRecord, UserId,
};
use carevault_keys::{Authenticator, KeyVault, KeysError};
use carevault_share::{RevocationLedger, ShareError, ShareState};
use carevault_store::{InsertResult, KeySlotStore, Store};

use crate::codec::RecordCodec;
use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::fallback::{needs_reseal, DecryptionFallbackChain};
use crate::sharing::SharingProtocol;

/// Reason written to the ledger when a shared record is deleted.
const DELETE_REASON: &str = "record deleted";

/// One record of a batch read, with its own outcome.
#[derive(Debug)]
pub struct RecordRead {
    pub record: StoredRecord,
    pub plaintext: Result<Vec<u8>>,
}

/// The main CareVault struct.
///
/// Provides a unified API for:
/// - Key lifecycle (ensure, rotate, clear, legacy import)
/// - Sealing and opening records for their owner
/// - Record storage with transparent legacy decoding
/// - Sharing, opening shares, and revocation
pub struct CareVault<S, L> {
    store: Arc<S>,
    keys: Arc<KeyVault<S, L>>,
    codec: Arc<RecordCodec<S, L>>,
    sharing: SharingProtocol<S, L>,
    config: VaultConfig,
}

impl<S: Store, L: KeySlotStore> CareVault<S, L> {
    /// Create a vault over a server-side store and a local slot table.
    ///
    /// Without an authenticator the hardware tier is never usable.
    pub fn new(
        store: Arc<S>,
        slots: Arc<L>,
        config: VaultConfig,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        let keys = Arc::new(KeyVault::new(
            store.clone(),
            slots,
            config.key_vault_config(),
            authenticator,
        ));
        Self::with_key_vault(store, keys, config)
    }

    /// Create a vault around an existing key vault.
    pub fn with_key_vault(store: Arc<S>, keys: Arc<KeyVault<S, L>>, config: VaultConfig) -> Self {
        let chain = DecryptionFallbackChain::standard(config.accept_unencrypted_legacy);
        let codec = Arc::new(RecordCodec::new(
            keys.clone(),
            chain,
            config.max_plaintext_bytes,
        ));
        let sharing = SharingProtocol::new(store.clone(), keys.clone(), codec.clone());
        Self {
            store,
            keys,
            codec,
            sharing,
            config,
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn keys(&self) -> &KeyVault<S, L> {
        &self.keys
    }

    pub fn codec(&self) -> &RecordCodec<S, L> {
        &self.codec
    }

    pub fn ledger(&self) -> &RevocationLedger<S> {
        self.sharing.ledger()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Key Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Make sure `user` has an active key pair, generating one on first use.
    ///
    /// The flag is false when the active key was generated elsewhere and no
    /// replacement could be made here.
    pub async fn ensure_keys(&self, user: &UserId) -> Result<(KemPublicKey, bool)> {
        Ok(self.keys.ensure_keys(user).await?)
    }

    /// The user's active published key.
    pub async fn get_public_key(&self, user: &UserId) -> Result<KeyPair> {
        match self.keys.get_public_key(user).await {
            Ok(pair) => Ok(pair),
            Err(KeysError::NotFound(user)) => {
                Err(VaultError::NotFound(format!("public key for {}", user)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the active key. Older records stay readable.
    pub async fn rotate_keys(&self, user: &UserId) -> Result<KeyPair> {
        Ok(self.keys.rotate_keys(user).await?)
    }

    /// Destroy the user's local key slots. This is permanent loss of access
    /// to everything sealed to those keys.
    pub async fn clear_keys(&self, user: &UserId) -> Result<usize> {
        Ok(self.keys.clear_keys(user).await?)
    }

    /// Import a pre-quantum X25519 secret so legacy records keep opening.
    pub async fn import_legacy_secret(&self, user: &UserId, secret: &[u8]) -> Result<StorageTier> {
        Ok(self.keys.import_legacy_secret(user, secret).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Codec Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Seal `data` to the owner's active public key.
    pub async fn seal_for_owner(&self, data: &[u8], owner: &UserId) -> Result<HybridEnvelope> {
        self.codec.seal_for_owner(data, owner).await
    }

    /// Open a persisted payload of any generation.
    pub async fn open_for_owner(&self, raw: &[u8], owner: &UserId) -> Result<Vec<u8>> {
        self.codec.open_for_owner(raw, owner).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Record Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Seal and persist a new record.
    pub async fn store_record(
        &self,
        owner: &UserId,
        data: &[u8],
        metadata: RecordMetadata,
    ) -> Result<StoredRecord> {
        let envelope = self.codec.seal_for_owner(data, owner).await?;
        let payload = SealedPayload::from(envelope).to_bytes()?;

        let now = now_millis();
        let record = StoredRecord {
            record_id: RecordId::generate(),
            owner_id: owner.clone(),
            encrypted_payload: payload.into(),
            metadata,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_record(&record).await? {
            InsertResult::Inserted => {}
            other => {
                return Err(VaultError::Internal(format!(
                    "record id {} not inserted: {:?}",
                    record.record_id, other
                )))
            }
        }

        tracing::debug!(owner = %owner, record = %record.record_id, "record stored");
        Ok(record)
    }

    /// Read one of the caller's records.
    pub async fn read_record(&self, record_id: &RecordId, owner: &UserId) -> Result<Vec<u8>> {
        let record = self.sharing.owned_record(record_id, owner).await?;
        self.codec
            .open_for_owner(&record.encrypted_payload, owner)
            .await
    }

    /// Read every record of an owner. One bad record does not fail the batch.
    pub async fn read_records(&self, owner: &UserId) -> Result<Vec<RecordRead>> {
        let records = self.store.list_records(owner).await?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let plaintext = self
                .codec
                .open_for_owner(&record.encrypted_payload, owner)
                .await;
            if let Err(e) = &plaintext {
                tracing::warn!(owner = %owner, record = %record.record_id, error = %e, "record unreadable");
            }
            out.push(RecordRead { record, plaintext });
        }
        Ok(out)
    }

    /// An owner's records, still sealed.
    pub async fn list_records(&self, owner: &UserId) -> Result<Vec<StoredRecord>> {
        Ok(self.store.list_records(owner).await?)
    }

    /// Replace a record's content. The whole envelope is sealed again.
    ///
    /// Existing shares keep the content they were granted with.
    pub async fn update_record(
        &self,
        record_id: &RecordId,
        owner: &UserId,
        data: &[u8],
    ) -> Result<StoredRecord> {
        let mut record = self.sharing.owned_record(record_id, owner).await?;
        let envelope = self.codec.seal_for_owner(data, owner).await?;
        let payload = SealedPayload::from(envelope).to_bytes()?;
        let now = now_millis();

        if !self
            .store
            .update_record_payload(record_id, &payload, now)
            .await?
        {
            return Err(VaultError::NotFound(format!("record {}", record_id)));
        }

        record.encrypted_payload = payload.into();
        record.updated_at = now;
        tracing::debug!(owner = %owner, record = %record_id, "record updated");
        Ok(record)
    }

    /// Delete a record, revoking its shares first.
    ///
    /// The revocation entry outlives the record.
    pub async fn delete_record(&self, record_id: &RecordId, owner: &UserId) -> Result<()> {
        self.sharing.owned_record(record_id, owner).await?;

        if !self.store.shares_for_record(record_id).await?.is_empty() {
            match self.ledger().revoke(record_id, owner, DELETE_REASON).await {
                Ok(_) | Err(ShareError::AlreadyRevoked(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !self.store.delete_record(record_id).await? {
            return Err(VaultError::NotFound(format!("record {}", record_id)));
        }
        tracing::info!(owner = %owner, record = %record_id, "record deleted");
        Ok(())
    }

    /// Rewrite a record under the current scheme and the active key.
    ///
    /// Returns false when the record is already current.
    pub async fn reseal_record(&self, record_id: &RecordId, owner: &UserId) -> Result<bool> {
        let record = self.sharing.owned_record(record_id, owner).await?;
        let outcome = self
            .codec
            .open_detailed(&record.encrypted_payload, owner)
            .await?;

        let (active, usable) = self.keys.ensure_keys(owner).await?;
        if !usable {
            return Err(VaultError::KeyUnavailable(
                "active key cannot be resolved here".into(),
            ));
        }
        if !needs_reseal(&outcome, &record.encrypted_payload, &active.key_id()) {
            return Ok(false);
        }

        let envelope = self.codec.seal_for_owner(&outcome.plaintext, owner).await?;
        let payload = SealedPayload::from(envelope).to_bytes()?;
        if !self
            .store
            .update_record_payload(record_id, &payload, now_millis())
            .await?
        {
            return Err(VaultError::NotFound(format!("record {}", record_id)));
        }

        tracing::info!(
            owner = %owner,
            record = %record_id,
            from = outcome.strategy,
            "record resealed"
        );
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sharing Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant `recipient` read access to one of `owner`'s records.
    pub async fn share_record(
        &self,
        record_id: &RecordId,
        owner: &UserId,
        recipient: &UserId,
    ) -> Result<Share> {
        self.sharing.share_record(record_id, owner, recipient).await
    }

    /// Open a share as its recipient.
    pub async fn open_share(&self, share_id: &ShareId, recipient: &UserId) -> Result<Vec<u8>> {
        self.sharing.open_share(share_id, recipient).await
    }

    /// Revoke every share of a record.
    pub async fn revoke_share(
        &self,
        record_id: &RecordId,
        revoked_by: &UserId,
        reason: &str,
    ) -> Result<RevocationEntry> {
        self.sharing.revoke_share(record_id, revoked_by, reason).await
    }

    pub async fn share_status(&self, share_id: &ShareId, caller: &UserId) -> Result<ShareState> {
        self.sharing.share_status(share_id, caller).await
    }

    pub async fn shares_for_record(
        &self,
        record_id: &RecordId,
        owner: &UserId,
    ) -> Result<Vec<(Share, ShareState)>> {
        self.sharing.shares_for_record(record_id, owner).await
    }

    pub async fn shares_for_recipient(&self, recipient: &UserId) -> Result<Vec<(Share, ShareState)>> {
        self.sharing.shares_for_recipient(recipient).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carevault_core::legacy;
    use carevault_store::MemoryStore;

    fn vault() -> CareVault<MemoryStore, MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let config = VaultConfig {
            tier_order: vec![StorageTier::SoftwareAsymmetric],
            ..Default::default()
        };
        CareVault::new(store.clone(), store, config, None)
    }

    fn meta() -> RecordMetadata {
        RecordMetadata::new("lab", "text/plain")
    }

    #[tokio::test]
    async fn test_store_and_read_record() {
        let vault = vault();
        let alice = UserId::from("alice");

        let record = vault.store_record(&alice, b"hba1c 6.1", meta()).await.unwrap();
        assert_eq!(record.owner_id, alice);
        assert_eq!(
            vault.read_record(&record.record_id, &alice).await.unwrap(),
            b"hba1c 6.1"
        );
    }

    #[tokio::test]
    async fn test_read_record_requires_owner() {
        let vault = vault();
        let alice = UserId::from("alice");
        let record = vault.store_record(&alice, b"x", meta()).await.unwrap();

        let err = vault
            .read_record(&record.record_id, &UserId::from("mallory"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotAuthorized(_)));

        let err = vault
            .read_record(&RecordId::generate(), &alice)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_record() {
        let vault = vault();
        let alice = UserId::from("alice");
        let record = vault.store_record(&alice, b"v1", meta()).await.unwrap();

        let updated = vault
            .update_record(&record.record_id, &alice, b"v2")
            .await
            .unwrap();
        assert_ne!(updated.encrypted_payload, record.encrypted_payload);
        assert_eq!(
            vault.read_record(&record.record_id, &alice).await.unwrap(),
            b"v2"
        );
    }

    #[tokio::test]
    async fn test_delete_shared_record_revokes_first() {
        let vault = vault();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        vault.ensure_keys(&bob).await.unwrap();

        let record = vault.store_record(&alice, b"x", meta()).await.unwrap();
        let share = vault
            .share_record(&record.record_id, &alice, &bob)
            .await
            .unwrap();

        vault.delete_record(&record.record_id, &alice).await.unwrap();

        let entry = vault.ledger().entry_for(&record.record_id).await.unwrap().unwrap();
        assert_eq!(entry.reason, DELETE_REASON);
        assert!(matches!(
            vault.open_share(&share.share_id, &bob).await.unwrap_err(),
            VaultError::ShareRevoked(_)
        ));
        assert!(matches!(
            vault
                .revoke_share(&record.record_id, &alice, "again")
                .await
                .unwrap_err(),
            VaultError::AlreadyRevoked(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_unshared_record_leaves_no_entry() {
        let vault = vault();
        let alice = UserId::from("alice");
        let record = vault.store_record(&alice, b"x", meta()).await.unwrap();

        vault.delete_record(&record.record_id, &alice).await.unwrap();
        assert!(!vault.ledger().is_revoked(&record.record_id).await.unwrap());
        assert!(vault.list_records(&alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reseal_legacy_record() {
        let vault = vault();
        let alice = UserId::from("alice");
        vault.ensure_keys(&alice).await.unwrap();

        let legacy_payload = SealedPayload::LegacyEncoded(legacy::encode_plain(b"2018 visit"))
            .to_bytes()
            .unwrap();
        let record = StoredRecord {
            record_id: RecordId::generate(),
            owner_id: alice.clone(),
            encrypted_payload: legacy_payload.into(),
            metadata: meta(),
            created_at: 1,
            updated_at: 1,
        };
        vault.store().insert_record(&record).await.unwrap();

        assert!(vault.reseal_record(&record.record_id, &alice).await.unwrap());
        assert!(!vault.reseal_record(&record.record_id, &alice).await.unwrap());

        let stored = vault.store().get_record(&record.record_id).await.unwrap().unwrap();
        assert_eq!(
            SealedPayload::from_bytes(&stored.encrypted_payload)
                .unwrap()
                .marker(),
            carevault_core::Marker::Hybrid
        );
        assert_eq!(
            vault.read_record(&record.record_id, &alice).await.unwrap(),
            b"2018 visit"
        );
    }

    #[tokio::test]
    async fn test_reseal_after_rotation() {
        let vault = vault();
        let alice = UserId::from("alice");
        let record = vault.store_record(&alice, b"x", meta()).await.unwrap();

        assert!(!vault.reseal_record(&record.record_id, &alice).await.unwrap());
        vault.rotate_keys(&alice).await.unwrap();
        assert!(vault.reseal_record(&record.record_id, &alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_records_reports_each() {
        let vault = vault();
        let alice = UserId::from("alice");
        vault.store_record(&alice, b"good", meta()).await.unwrap();

        let broken = StoredRecord {
            record_id: RecordId::generate(),
            owner_id: alice.clone(),
            encrypted_payload: vec![0x7f, 0, 0].into(),
            metadata: meta(),
            created_at: now_millis() + 1,
            updated_at: now_millis() + 1,
        };
        vault.store().insert_record(&broken).await.unwrap();

        let reads = vault.read_records(&alice).await.unwrap();
        assert_eq!(reads.len(), 2);
        let ok = reads.iter().filter(|r| r.plaintext.is_ok()).count();
        assert_eq!(ok, 1);
        let bad = reads
            .iter()
            .find(|r| r.record.record_id == broken.record_id)
            .unwrap();
        assert!(matches!(
            bad.plaintext,
            Err(VaultError::UndecryptableRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_public_key_is_not_found() {
        let vault = vault();
        let err = vault
            .get_public_key(&UserId::from("nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }
}
