//! The key vault: per-user key lifecycle over storage tiers.
//!
//! Public halves go to the server-side directory ([`Store`]). Private halves
//! are wrapped by the first usable [`KeyStorageTier`] and kept in the local
//! slot table ([`KeySlotStore`]). Nothing here ever returns private bytes;
//! callers get a [`PrivateKeyRef`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use zeroize::Zeroizing;

use carevault_core::{
    now_millis, KemPublicKey, KeyId, KeyMaterial, KeyPair, PrivateKeyRef, StorageTier, UserId,
    X25519StaticSecret,
};
use carevault_store::{KeySlot, KeySlotStore, SlotKey, Store};

use crate::error::{KeysError, Result};
use crate::hardware::{Authenticator, HardwareTier};
use crate::locks::KeyedLocks;
use crate::plain::PlainTier;
use crate::software::SoftwareTier;
use crate::tier::{slot_context, KeyStorageTier};

/// Key vault configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVaultConfig {
    /// Tiers to try when generating a key, best first.
    pub tier_order: Vec<StorageTier>,
    /// Upper bound on each tier probe, seal and unseal.
    pub probe_timeout: Duration,
    /// Relying party the hardware tier's attestations must name.
    pub relying_party_id: String,
    /// Keep resolved private keys in memory for the life of the vault.
    pub cache_private_keys: bool,
    /// Generate a new key when the active one cannot be resolved here.
    pub regenerate_on_unavailable: bool,
}

impl Default for KeyVaultConfig {
    fn default() -> Self {
        Self {
            tier_order: vec![
                StorageTier::Hardware,
                StorageTier::SoftwareAsymmetric,
                StorageTier::PlainPersistent,
            ],
            probe_timeout: Duration::from_millis(2000),
            relying_party_id: "localhost".to_string(),
            cache_private_keys: true,
            regenerate_on_unavailable: true,
        }
    }
}

/// Per-user key lifecycle.
pub struct KeyVault<S, L> {
    store: Arc<S>,
    slots: Arc<L>,
    tiers: Vec<Arc<dyn KeyStorageTier>>,
    config: KeyVaultConfig,
    cache: RwLock<HashMap<(UserId, KeyId), PrivateKeyRef>>,
    user_locks: KeyedLocks<UserId>,
}

impl<S: Store, L: KeySlotStore> KeyVault<S, L> {
    /// Build a vault with the standard tiers in `config.tier_order`.
    ///
    /// The hardware tier is only available when an authenticator is given.
    pub fn new(
        store: Arc<S>,
        slots: Arc<L>,
        config: KeyVaultConfig,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        let mut tiers: Vec<Arc<dyn KeyStorageTier>> = Vec::new();
        for kind in &config.tier_order {
            match kind {
                StorageTier::Hardware => match &authenticator {
                    Some(auth) => tiers.push(Arc::new(HardwareTier::new(
                        auth.clone(),
                        config.relying_party_id.clone(),
                    ))),
                    None => tracing::debug!("no authenticator configured, skipping hardware tier"),
                },
                StorageTier::SoftwareAsymmetric => tiers.push(Arc::new(SoftwareTier::new())),
                StorageTier::PlainPersistent => tiers.push(Arc::new(PlainTier::new())),
            }
        }
        Self::with_tiers(store, slots, tiers, config)
    }

    /// Build a vault over explicit tiers, tried in the given order.
    pub fn with_tiers(
        store: Arc<S>,
        slots: Arc<L>,
        tiers: Vec<Arc<dyn KeyStorageTier>>,
        config: KeyVaultConfig,
    ) -> Self {
        Self {
            store,
            slots,
            tiers,
            config,
            cache: RwLock::new(HashMap::new()),
            user_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &KeyVaultConfig {
        &self.config
    }

    /// The tiers in priority order.
    pub fn tiers(&self) -> Vec<StorageTier> {
        self.tiers.iter().map(|t| t.kind()).collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Make sure the user has an active key, generating one if needed.
    ///
    /// Returns the active public key and whether its private half resolves
    /// in this context. Calls for the same user are serialized, so a second
    /// caller sees the key the first one generated.
    pub async fn ensure_keys(&self, user: &UserId) -> Result<(KemPublicKey, bool)> {
        let _guard = self.user_locks.lock(user).await;

        let Some(active) = self.store.active_key(user).await? else {
            let pair = self.generate(user).await?;
            return Ok((pair.public_key, true));
        };

        match self.resolve_key(user, &active.key_id).await {
            Ok(_) => return Ok((active.public_key, true)),
            Err(e) if e.is_not_available() => {
                if !self.config.regenerate_on_unavailable {
                    tracing::debug!(user = %user, key_id = %active.key_id, "active key not resolvable here");
                    return Ok((active.public_key, false));
                }
                tracing::warn!(
                    user = %user,
                    key_id = %active.key_id,
                    error = %e,
                    "active key not resolvable, generating a replacement"
                );
            }
            Err(e) => return Err(e),
        }

        match self.generate(user).await {
            Ok(pair) => Ok((pair.public_key, true)),
            Err(KeysError::NoUsableTier) => Ok((active.public_key, false)),
            Err(e) => Err(e),
        }
    }

    /// Force a new active key. The superseded key's slot is kept so records
    /// sealed to it still open.
    pub async fn rotate_keys(&self, user: &UserId) -> Result<KeyPair> {
        let _guard = self.user_locks.lock(user).await;
        let previous = self.store.active_key(user).await?;
        let pair = self.generate(user).await?;
        tracing::info!(
            user = %user,
            previous = ?previous.map(|p| p.key_id),
            key_id = %pair.key_id,
            "rotated key pair"
        );
        Ok(pair)
    }

    /// Destroy every local slot and cached reference for the user.
    ///
    /// Published public keys stay in the directory. Anything sealed to the
    /// destroyed keys can no longer be opened by this user.
    pub async fn clear_keys(&self, user: &UserId) -> Result<usize> {
        let _guard = self.user_locks.lock(user).await;
        let removed = self.slots.delete_slots(user).await?;
        self.cache_write().retain(|(u, _), _| u != user);
        tracing::info!(user = %user, removed, "cleared local keys");
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    /// The user's active published key.
    pub async fn get_public_key(&self, user: &UserId) -> Result<KeyPair> {
        self.store
            .active_key(user)
            .await?
            .ok_or_else(|| KeysError::NotFound(user.clone()))
    }

    /// Resolve the private half of the user's active key.
    pub async fn resolve_private_key_reference(&self, user: &UserId) -> Result<PrivateKeyRef> {
        let active = self.get_public_key(user).await?;
        self.resolve_key(user, &active.key_id).await
    }

    /// Resolve the private half of a specific key, active or superseded.
    pub async fn resolve_key(&self, user: &UserId, key_id: &KeyId) -> Result<PrivateKeyRef> {
        if let Some(key) = self.cached(user, key_id) {
            return Ok(key);
        }

        let slot_key = SlotKey::Kem(*key_id);
        let secret = self.unseal_slot(user, &slot_key).await?;
        let material = KeyMaterial::from_bytes(&secret)?;
        if material.key_id() != *key_id {
            return Err(KeysError::Encoding(format!(
                "slot for {} holds key {}",
                key_id,
                material.key_id()
            )));
        }

        let key = PrivateKeyRef::new(material);
        if self.config.cache_private_keys {
            self.cache_write()
                .insert((user.clone(), *key_id), key.clone());
        }
        tracing::debug!(user = %user, key_id = %key_id, "resolved private key");
        Ok(key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Legacy secrets
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a pre-quantum X25519 secret so legacy records can still be read.
    pub async fn import_legacy_secret(&self, user: &UserId, secret: &[u8]) -> Result<StorageTier> {
        // Validates length before anything is written.
        X25519StaticSecret::from_slice(secret)?;

        let _guard = self.user_locks.lock(user).await;
        let slot = SlotKey::LegacyX25519;
        let (tier, sealed) = self.seal_with_best_tier(&slot_context(user, &slot), secret).await?;
        self.slots
            .put_slot(&KeySlot {
                user_id: user.clone(),
                slot,
                tier,
                sealed,
                created_at: now_millis(),
            })
            .await?;
        tracing::info!(user = %user, tier = %tier, "imported legacy secret");
        Ok(tier)
    }

    /// The user's legacy X25519 secret, if one was imported on this device.
    pub async fn resolve_legacy_secret(&self, user: &UserId) -> Result<Option<X25519StaticSecret>> {
        match self.unseal_slot(user, &SlotKey::LegacyX25519).await {
            Ok(secret) => Ok(Some(X25519StaticSecret::from_slice(&secret)?)),
            Err(KeysError::NotAvailable(reason)) => {
                tracing::debug!(user = %user, reason = %reason, "no legacy secret");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    /// Generate, seal, store and publish. Caller holds the user lock.
    async fn generate(&self, user: &UserId) -> Result<KeyPair> {
        let (public_key, material) = KeyMaterial::generate();
        let key_id = public_key.key_id();
        let slot = SlotKey::Kem(key_id);

        let (tier, sealed) = {
            let secret = material.to_bytes();
            self.seal_with_best_tier(&slot_context(user, &slot), &secret)
                .await?
        };

        let now = now_millis();
        self.slots
            .put_slot(&KeySlot {
                user_id: user.clone(),
                slot,
                tier,
                sealed,
                created_at: now,
            })
            .await?;

        let pair = KeyPair {
            user_id: user.clone(),
            key_id,
            public_key,
            verifying_key: material.verifying_key(),
            storage_tier: tier,
            created_at: now,
            active: true,
        };
        self.store.publish_key(&pair).await?;

        if self.config.cache_private_keys {
            self.cache_write()
                .insert((user.clone(), key_id), PrivateKeyRef::new(material));
        }

        tracing::info!(user = %user, key_id = %key_id, tier = %tier, "generated key pair");
        Ok(pair)
    }

    /// Seal with the first tier whose probe and seal both finish within
    /// `probe_timeout` and that accepts the secret.
    async fn seal_with_best_tier(
        &self,
        context: &[u8],
        secret: &[u8],
    ) -> Result<(StorageTier, Bytes)> {
        for tier in &self.tiers {
            let kind = tier.kind();

            match tokio::time::timeout(self.config.probe_timeout, tier.probe()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(tier = %kind, error = %e, "tier probe failed, falling through");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(tier = %kind, "tier probe timed out, falling through");
                    continue;
                }
            }

            // Sealing may wait on a user prompt, so it gets the same bound.
            match tokio::time::timeout(self.config.probe_timeout, tier.seal(context, secret)).await
            {
                Ok(Ok(sealed)) => return Ok((kind, sealed)),
                Ok(Err(e)) => {
                    tracing::warn!(tier = %kind, error = %e, "tier refused to seal, falling through");
                }
                Err(_) => {
                    tracing::warn!(tier = %kind, "tier seal timed out, falling through");
                }
            }
        }

        Err(KeysError::NoUsableTier)
    }

    async fn unseal_slot(&self, user: &UserId, slot_key: &SlotKey) -> Result<Zeroizing<Vec<u8>>> {
        let slot = self
            .slots
            .get_slot(user, slot_key)
            .await?
            .ok_or_else(|| KeysError::NotAvailable("no local slot on this device".into()))?;

        let tier = self
            .tiers
            .iter()
            .find(|t| t.kind() == slot.tier)
            .ok_or_else(|| KeysError::NotAvailable(format!("{} tier not configured", slot.tier)))?;

        let context = slot_context(user, slot_key);
        match tokio::time::timeout(self.config.probe_timeout, tier.unseal(&context, &slot.sealed))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(KeysError::TierTimeout(slot.tier)),
        }
    }

    fn cached(&self, user: &UserId, key_id: &KeyId) -> Option<PrivateKeyRef> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(user.clone(), *key_id))
            .cloned()
    }

    fn cache_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<(UserId, KeyId), PrivateKeyRef>> {
        // Entries are independent, so a poisoned cache is still usable.
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }
}
