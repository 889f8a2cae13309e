//! Record codec: seals records for their owner and opens any generation of
//! persisted payload.

use std::sync::Arc;

use carevault_core::{cipher, HybridEnvelope, UserId};
use carevault_keys::KeyVault;
use carevault_store::{KeySlotStore, Store};

use crate::error::{Result, VaultError};
use crate::fallback::{DecodeOutcome, DecryptionFallbackChain};

/// Seals and opens records on behalf of their owner.
pub struct RecordCodec<S, L> {
    keys: Arc<KeyVault<S, L>>,
    chain: DecryptionFallbackChain,
    max_plaintext_bytes: usize,
}

impl<S: Store, L: KeySlotStore> RecordCodec<S, L> {
    pub fn new(
        keys: Arc<KeyVault<S, L>>,
        chain: DecryptionFallbackChain,
        max_plaintext_bytes: usize,
    ) -> Self {
        Self {
            keys,
            chain,
            max_plaintext_bytes,
        }
    }

    pub fn chain(&self) -> &DecryptionFallbackChain {
        &self.chain
    }

    /// Reject plaintexts over the configured limit.
    pub fn check_size(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_plaintext_bytes {
            return Err(VaultError::PayloadTooLarge {
                size: data.len(),
                limit: self.max_plaintext_bytes,
            });
        }
        Ok(())
    }

    /// Seal `data` to the owner's active public key.
    ///
    /// Generates the owner's keys on first use.
    pub async fn seal_for_owner(&self, data: &[u8], owner: &UserId) -> Result<HybridEnvelope> {
        self.check_size(data)?;

        let (public_key, usable) = self.keys.ensure_keys(owner).await?;
        if !usable {
            tracing::warn!(owner = %owner, "sealing to a key this device cannot open");
        }

        let envelope = cipher::encrypt(data, public_key.as_bytes())?;
        tracing::debug!(owner = %owner, size = data.len(), "sealed for owner");
        Ok(envelope)
    }

    /// Open a persisted payload of any generation.
    pub async fn open_for_owner(&self, raw: &[u8], owner: &UserId) -> Result<Vec<u8>> {
        Ok(self.open_detailed(raw, owner).await?.plaintext)
    }

    /// Open, reporting which strategy succeeded.
    pub async fn open_detailed(&self, raw: &[u8], owner: &UserId) -> Result<DecodeOutcome> {
        self.chain.open(raw, owner, self.keys.as_ref()).await
    }
}
