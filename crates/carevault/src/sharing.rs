//! The sharing protocol.
//!
//! Sharing re-encrypts a record's plaintext to the recipient's published key
//! and signs what was granted. The storage layer only ever sees envelopes.
//!
//! Revocation is per record and terminal: once a record is revoked no share
//! of it opens again, and the record cannot be shared again.

use std::sync::Arc;

use zeroize::Zeroizing;

use carevault_core::{cipher, RecordId, RevocationEntry, Share, ShareId, StoredRecord, UserId};
use carevault_keys::{KeyVault, KeyedLocks, KeysError};
use carevault_share::{verify_share, RevocationLedger, ShareDraft, ShareState};
use carevault_store::{InsertResult, KeySlotStore, Store};

use crate::codec::RecordCodec;
use crate::error::{Result, VaultError};

/// Share, open and revoke records between users.
pub struct SharingProtocol<S, L> {
    store: Arc<S>,
    keys: Arc<KeyVault<S, L>>,
    codec: Arc<RecordCodec<S, L>>,
    ledger: RevocationLedger<S>,
    share_locks: KeyedLocks<(RecordId, UserId)>,
}

impl<S: Store, L: KeySlotStore> SharingProtocol<S, L> {
    pub fn new(
        store: Arc<S>,
        keys: Arc<KeyVault<S, L>>,
        codec: Arc<RecordCodec<S, L>>,
    ) -> Self {
        Self {
            ledger: RevocationLedger::new(store.clone()),
            store,
            keys,
            codec,
            share_locks: KeyedLocks::new(),
        }
    }

    pub fn ledger(&self) -> &RevocationLedger<S> {
        &self.ledger
    }

    /// Grant `recipient` read access to one of `owner`'s records.
    pub async fn share_record(
        &self,
        record_id: &RecordId,
        owner: &UserId,
        recipient: &UserId,
    ) -> Result<Share> {
        let record = self.owned_record(record_id, owner).await?;
        if recipient == owner {
            return Err(VaultError::NotAuthorized(
                "a record cannot be shared with its owner".into(),
            ));
        }

        let _guard = self.share_locks.lock(&(*record_id, recipient.clone())).await;

        if self.ledger.is_revoked(record_id).await? {
            return Err(VaultError::AlreadyRevoked(*record_id));
        }
        if let Some(existing) = self.store.find_share(record_id, recipient).await? {
            return Err(VaultError::DuplicateShare {
                existing: existing.share_id,
            });
        }

        let recipient_key = match self.keys.get_public_key(recipient).await {
            Ok(key) => key,
            Err(KeysError::NotFound(_)) => {
                return Err(VaultError::RecipientKeyUnavailable(recipient.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let plaintext = Zeroizing::new(
            self.codec
                .open_for_owner(&record.encrypted_payload, owner)
                .await?,
        );
        let envelope = cipher::encrypt(&plaintext, recipient_key.public_key.as_bytes())?;

        let owner_key = self.keys.resolve_private_key_reference(owner).await?;
        let share = ShareDraft::new(
            *record_id,
            owner.clone(),
            recipient.clone(),
            envelope,
            &owner_key,
        )
        .into_share();

        match self.store.insert_share(&share).await? {
            InsertResult::Inserted => {}
            InsertResult::Conflict { existing } => {
                return Err(VaultError::DuplicateShare { existing })
            }
            InsertResult::AlreadyExists => {
                return Err(VaultError::Internal(format!(
                    "share id {} collided",
                    share.share_id
                )))
            }
        }

        tracing::info!(
            record = %record_id,
            share = %share.share_id,
            owner = %owner,
            recipient = %recipient,
            "record shared"
        );
        Ok(share)
    }

    /// Open a share as its recipient.
    pub async fn open_share(&self, share_id: &ShareId, recipient: &UserId) -> Result<Vec<u8>> {
        let share = self
            .store
            .get_share(share_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("share {}", share_id)))?;

        if &share.recipient_id != recipient {
            return Err(VaultError::NotAuthorized(format!(
                "share {} belongs to another recipient",
                share_id
            )));
        }

        if !self.ledger.state_of(&share).await?.is_readable() {
            return Err(VaultError::ShareRevoked(*share_id));
        }

        let owner_keys: Vec<_> = self
            .store
            .keys_for_user(&share.owner_id)
            .await?
            .into_iter()
            .map(|k| k.verifying_key)
            .collect();
        verify_share(&share, &owner_keys)?;

        let key = match share.envelope.recipient_key_id {
            Some(key_id) => self.keys.resolve_key(recipient, &key_id).await?,
            None => self.keys.resolve_private_key_reference(recipient).await?,
        };
        let plaintext = cipher::decrypt(&share.envelope, &key)?;

        tracing::debug!(share = %share_id, recipient = %recipient, "share opened");
        Ok(plaintext)
    }

    /// Revoke every share of a record. Only the owner may revoke.
    pub async fn revoke_share(
        &self,
        record_id: &RecordId,
        revoked_by: &UserId,
        reason: &str,
    ) -> Result<RevocationEntry> {
        let record = match self.store.get_record(record_id).await? {
            Some(record) => record,
            // A deleted record keeps its revocation entry.
            None if self.ledger.is_revoked(record_id).await? => {
                return Err(VaultError::AlreadyRevoked(*record_id))
            }
            None => return Err(VaultError::NotFound(format!("record {}", record_id))),
        };
        if &record.owner_id != revoked_by {
            return Err(VaultError::NotAuthorized(format!(
                "only the owner may revoke record {}",
                record_id
            )));
        }

        Ok(self.ledger.revoke(record_id, revoked_by, reason).await?)
    }

    /// State of a share, visible to its owner and recipient.
    pub async fn share_status(&self, share_id: &ShareId, caller: &UserId) -> Result<ShareState> {
        let share = self
            .store
            .get_share(share_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("share {}", share_id)))?;
        if &share.owner_id != caller && &share.recipient_id != caller {
            return Err(VaultError::NotAuthorized(format!(
                "share {} is not visible to {}",
                share_id, caller
            )));
        }
        Ok(self.ledger.state_of(&share).await?)
    }

    /// All shares of an owner's record, with their states.
    pub async fn shares_for_record(
        &self,
        record_id: &RecordId,
        owner: &UserId,
    ) -> Result<Vec<(Share, ShareState)>> {
        self.owned_record(record_id, owner).await?;
        let entry = self.ledger.entry_for(record_id).await?;
        Ok(self
            .store
            .shares_for_record(record_id)
            .await?
            .into_iter()
            .map(|share| {
                let state = ShareState::of(&share, entry.as_ref());
                (share, state)
            })
            .collect())
    }

    /// All shares granted to a recipient, with their states.
    pub async fn shares_for_recipient(&self, recipient: &UserId) -> Result<Vec<(Share, ShareState)>> {
        let shares = self.store.shares_for_recipient(recipient).await?;
        let mut out = Vec::with_capacity(shares.len());
        for share in shares {
            let state = self.ledger.state_of(&share).await?;
            out.push((share, state));
        }
        Ok(out)
    }

    /// Fetch a record, requiring `caller` to own it.
    pub(crate) async fn owned_record(
        &self,
        record_id: &RecordId,
        caller: &UserId,
    ) -> Result<StoredRecord> {
        let record = self
            .store
            .get_record(record_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("record {}", record_id)))?;
        if &record.owner_id != caller {
            return Err(VaultError::NotAuthorized(format!(
                "record {} is not owned by {}",
                record_id, caller
            )));
        }
        Ok(record)
    }
}
