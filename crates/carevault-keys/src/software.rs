//! Software asymmetric tier.
//!
//! Wraps secrets to an X25519 device key that lives only in this process.
//! Each seal uses a fresh ephemeral key; the wrap key is derived from the
//! ECDH output and the ephemeral public value. A blob written under another
//! device key (an earlier session, another machine) cannot be opened here
//! and reports [`KeysError::NotAvailable`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use carevault_core::{
    EncryptionNonce, EphemeralKeyPair, StorageTier, X25519PublicKey, X25519StaticSecret,
};

use crate::error::{KeysError, Result};
use crate::tier::KeyStorageTier;

const WRAP_DOMAIN: &str = "carevault 2024-06 software tier wrap";

#[derive(Serialize, Deserialize)]
struct SoftwareBlob {
    device_public: X25519PublicKey,
    ephemeral_public: X25519PublicKey,
    nonce: EncryptionNonce,
    ciphertext: Bytes,
}

/// Tier backed by a process-lifetime device key.
pub struct SoftwareTier {
    device_key: X25519StaticSecret,
}

impl SoftwareTier {
    /// Create a tier with a fresh device key.
    pub fn new() -> Self {
        Self {
            device_key: X25519StaticSecret::generate(),
        }
    }

    /// Create a tier around an existing device key.
    pub fn with_device_key(device_key: X25519StaticSecret) -> Self {
        Self { device_key }
    }

    pub fn device_public(&self) -> X25519PublicKey {
        self.device_key.public_key()
    }
}

impl Default for SoftwareTier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoftwareTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareTier")
            .field("device_public", &self.device_public())
            .finish()
    }
}

#[async_trait]
impl KeyStorageTier for SoftwareTier {
    fn kind(&self) -> StorageTier {
        StorageTier::SoftwareAsymmetric
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn seal(&self, context: &[u8], secret: &[u8]) -> Result<Bytes> {
        let device_public = self.device_public();
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let wrap_key = ephemeral
            .diffie_hellman(&device_public)
            .derive_encryption_key(WRAP_DOMAIN, &ephemeral_public.0);

        let nonce = EncryptionNonce::generate();
        let ciphertext = wrap_key.encrypt(secret, &nonce, context)?;

        let blob = SoftwareBlob {
            device_public,
            ephemeral_public,
            nonce,
            ciphertext: Bytes::from(ciphertext),
        };
        let mut out = Vec::new();
        ciborium::into_writer(&blob, &mut out).map_err(|e| KeysError::Encoding(e.to_string()))?;
        Ok(Bytes::from(out))
    }

    async fn unseal(&self, context: &[u8], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let blob: SoftwareBlob =
            ciborium::from_reader(sealed).map_err(|e| KeysError::Encoding(e.to_string()))?;

        if blob.device_public != self.device_public() {
            return Err(KeysError::NotAvailable(
                "slot was sealed by another device key".into(),
            ));
        }

        let wrap_key = self
            .device_key
            .diffie_hellman(&blob.ephemeral_public)
            .derive_encryption_key(WRAP_DOMAIN, &blob.ephemeral_public.0);

        wrap_key
            .decrypt(&blob.ciphertext, &blob.nonce, context)
            .map(Zeroizing::new)
            .map_err(|_| KeysError::NotAvailable("software slot failed to open".into()))
    }
}
