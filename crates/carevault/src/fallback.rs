//! The decryption fallback chain.
//!
//! Records written by every generation of the system stay readable. Each
//! generation has a [`DecodeStrategy`] that claims the payload markers it
//! understands. The chain runs, newest first, only the strategies that
//! accept the blob's marker; the first success wins.
//!
//! A current-scheme payload is never handed to a legacy strategy, so a
//! failed hybrid decryption cannot fall back to something weaker.

use async_trait::async_trait;

use carevault_core::{
    cipher, legacy, HybridEnvelope, KeyId, Marker, PrivateKeyRef, SealedPayload, UserId,
    X25519StaticSecret,
};
use carevault_keys::KeyVault;
use carevault_store::{KeySlotStore, Store};

use crate::error::{Result, VaultError};

/// Where strategies get the owner's keys.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// The KEM key an envelope was sealed to, or the active key when the
    /// envelope does not name one.
    async fn kem_key(&self, owner: &UserId, key_id: Option<KeyId>) -> Result<PrivateKeyRef>;

    /// The owner's pre-quantum X25519 secret, if imported on this device.
    async fn legacy_secret(&self, owner: &UserId) -> Result<Option<X25519StaticSecret>>;
}

#[async_trait]
impl<S: Store, L: KeySlotStore> KeySource for KeyVault<S, L> {
    async fn kem_key(&self, owner: &UserId, key_id: Option<KeyId>) -> Result<PrivateKeyRef> {
        let key = match key_id {
            Some(id) => self.resolve_key(owner, &id).await,
            None => self.resolve_private_key_reference(owner).await,
        };
        key.map_err(VaultError::from)
    }

    async fn legacy_secret(&self, owner: &UserId) -> Result<Option<X25519StaticSecret>> {
        self.resolve_legacy_secret(owner)
            .await
            .map_err(VaultError::from)
    }
}

/// One generation of payload format.
#[async_trait]
pub trait DecodeStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this strategy understands payloads with `marker`.
    fn accepts(&self, marker: Marker) -> bool;

    /// Recover the plaintext.
    async fn try_decode(&self, raw: &[u8], owner: &UserId, keys: &dyn KeySource)
        -> Result<Vec<u8>>;
}

/// Current scheme: ML-KEM-768 + AES-256-GCM.
#[derive(Debug, Default, Clone, Copy)]
pub struct HybridStrategy;

#[async_trait]
impl DecodeStrategy for HybridStrategy {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn accepts(&self, marker: Marker) -> bool {
        marker == Marker::Hybrid
    }

    async fn try_decode(
        &self,
        raw: &[u8],
        owner: &UserId,
        keys: &dyn KeySource,
    ) -> Result<Vec<u8>> {
        let envelope = match SealedPayload::from_bytes(raw)? {
            SealedPayload::Hybrid(env) => env,
            other => return Err(wrong_variant(self.name(), &other)),
        };
        let key = keys.kem_key(owner, envelope.recipient_key_id).await?;
        Ok(cipher::decrypt(&envelope, &key)?)
    }
}

/// Pre-quantum scheme: ephemeral X25519 + ChaCha20-Poly1305.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyEcdhStrategy;

#[async_trait]
impl DecodeStrategy for LegacyEcdhStrategy {
    fn name(&self) -> &'static str {
        "legacy-ecdh"
    }

    fn accepts(&self, marker: Marker) -> bool {
        marker == Marker::LegacyEcdh
    }

    async fn try_decode(
        &self,
        raw: &[u8],
        owner: &UserId,
        keys: &dyn KeySource,
    ) -> Result<Vec<u8>> {
        let envelope = match SealedPayload::from_bytes(raw)? {
            SealedPayload::LegacyEcdh(env) => env,
            other => return Err(wrong_variant(self.name(), &other)),
        };
        let secret = keys.legacy_secret(owner).await?.ok_or_else(|| {
            VaultError::KeyUnavailable("no legacy secret on this device".into())
        })?;
        Ok(legacy::open_ecdh(&envelope, &secret)?)
    }
}

/// Records stored before encryption: base64 inside JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyEncodedStrategy;

#[async_trait]
impl DecodeStrategy for LegacyEncodedStrategy {
    fn name(&self) -> &'static str {
        "legacy-encoded"
    }

    fn accepts(&self, marker: Marker) -> bool {
        marker == Marker::LegacyEncoded
    }

    async fn try_decode(
        &self,
        raw: &[u8],
        _owner: &UserId,
        _keys: &dyn KeySource,
    ) -> Result<Vec<u8>> {
        match SealedPayload::from_bytes(raw)? {
            SealedPayload::LegacyEncoded(payload) => Ok(legacy::decode_plain(&payload)?),
            other => Err(wrong_variant(self.name(), &other)),
        }
    }
}

fn wrong_variant(strategy: &str, payload: &SealedPayload) -> VaultError {
    VaultError::UndecryptableRecord(format!(
        "{} strategy given {} payload",
        strategy,
        payload.algorithm_id()
    ))
}

/// A successful decode.
#[derive(Debug)]
pub struct DecodeOutcome {
    pub plaintext: Vec<u8>,
    /// Name of the strategy that succeeded.
    pub strategy: &'static str,
    pub marker: Marker,
}

/// Ordered list of strategies, newest first.
pub struct DecryptionFallbackChain {
    strategies: Vec<Box<dyn DecodeStrategy>>,
}

impl DecryptionFallbackChain {
    pub fn new(strategies: Vec<Box<dyn DecodeStrategy>>) -> Self {
        Self { strategies }
    }

    /// Hybrid, then legacy ECDH, then (if enabled) unencrypted legacy.
    pub fn standard(accept_unencrypted_legacy: bool) -> Self {
        let mut strategies: Vec<Box<dyn DecodeStrategy>> =
            vec![Box::new(HybridStrategy), Box::new(LegacyEcdhStrategy)];
        if accept_unencrypted_legacy {
            strategies.push(Box::new(LegacyEncodedStrategy));
        }
        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Decode a persisted payload.
    ///
    /// A strategy reporting [`VaultError::KeyUnavailable`] stops the chain:
    /// the payload is fine, the key is elsewhere. Any other failure moves on
    /// to the next accepting strategy. When none succeeds the result is
    /// [`VaultError::UndecryptableRecord`].
    pub async fn open(
        &self,
        raw: &[u8],
        owner: &UserId,
        keys: &dyn KeySource,
    ) -> Result<DecodeOutcome> {
        let marker = Marker::detect(raw);
        let mut failures = Vec::new();

        for strategy in self.strategies.iter().filter(|s| s.accepts(marker)) {
            match strategy.try_decode(raw, owner, keys).await {
                Ok(plaintext) => {
                    tracing::debug!(owner = %owner, strategy = strategy.name(), "payload decoded");
                    return Ok(DecodeOutcome {
                        plaintext,
                        strategy: strategy.name(),
                        marker,
                    });
                }
                Err(e @ VaultError::KeyUnavailable(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        owner = %owner,
                        strategy = strategy.name(),
                        error = %e,
                        "decode strategy failed"
                    );
                    failures.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        if failures.is_empty() {
            return Err(VaultError::UndecryptableRecord(format!(
                "no strategy accepts {:?} payload",
                marker
            )));
        }
        Err(VaultError::UndecryptableRecord(failures.join("; ")))
    }
}

impl Default for DecryptionFallbackChain {
    fn default() -> Self {
        Self::standard(true)
    }
}

/// Whether a decoded envelope should be rewritten under the current scheme
/// and active key.
pub(crate) fn needs_reseal(outcome: &DecodeOutcome, raw: &[u8], active: &KeyId) -> bool {
    if outcome.marker != Marker::Hybrid {
        return true;
    }
    match SealedPayload::from_bytes(raw) {
        Ok(SealedPayload::Hybrid(HybridEnvelope {
            recipient_key_id: Some(id),
            ..
        })) => id != *active,
        _ => true,
    }
}
