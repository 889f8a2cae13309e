//! Hardware-backed tier.
//!
//! Secrets are wrapped under a key only an external authenticator can
//! reproduce. Sealing creates a fresh credential, checks its attestation,
//! then asks the authenticator for a pseudo-random value (the WebAuthn PRF
//! extension) over a random salt. That value, never stored, derives the wrap
//! key. Unsealing repeats the PRF call with the stored credential id and
//! salt; an authenticator that does not hold the credential cannot answer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use carevault_core::{Ed25519PublicKey, EncryptionKey, EncryptionNonce, StorageTier};

use crate::attestation::verify_attestation;
use crate::error::{KeysError, Result};
use crate::tier::KeyStorageTier;

const WRAP_DOMAIN: &str = "carevault 2024-06 hardware tier wrap";

/// Parameters for creating a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    pub rp_id: String,
    pub user_handle: Vec<u8>,
    /// SHA-256 of the client data; the attestation signs over it.
    pub client_data_hash: [u8; 32],
}

/// An external authenticator (platform passkey, security key).
///
/// Implementations bridge to whatever the host platform offers. They must
/// return a WebAuthn attestation object from `make_credential`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether an authenticator is reachable right now.
    async fn is_available(&self) -> bool;

    /// Create a credential and return its attestation object.
    async fn make_credential(&self, request: &CredentialRequest) -> Result<Vec<u8>>;

    /// Evaluate the PRF extension for a credential.
    async fn prf(&self, credential_id: &[u8], salt: &[u8; 32]) -> Result<[u8; 32]>;
}

#[derive(Serialize, Deserialize)]
struct HardwareBlob {
    credential_id: Bytes,
    credential_public: Ed25519PublicKey,
    salt: [u8; 32],
    nonce: EncryptionNonce,
    ciphertext: Bytes,
}

/// Tier backed by an [`Authenticator`].
pub struct HardwareTier {
    authenticator: Arc<dyn Authenticator>,
    relying_party_id: String,
}

impl HardwareTier {
    pub fn new(authenticator: Arc<dyn Authenticator>, relying_party_id: impl Into<String>) -> Self {
        Self {
            authenticator,
            relying_party_id: relying_party_id.into(),
        }
    }

    fn wrap_key(prf_output: &[u8; 32]) -> EncryptionKey {
        EncryptionKey::derive(WRAP_DOMAIN, prf_output)
    }
}

impl std::fmt::Debug for HardwareTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareTier")
            .field("relying_party_id", &self.relying_party_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyStorageTier for HardwareTier {
    fn kind(&self) -> StorageTier {
        StorageTier::Hardware
    }

    async fn probe(&self) -> Result<()> {
        if self.authenticator.is_available().await {
            Ok(())
        } else {
            Err(KeysError::NotAvailable("no authenticator present".into()))
        }
    }

    async fn seal(&self, context: &[u8], secret: &[u8]) -> Result<Bytes> {
        let mut challenge = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut challenge);
        let client_data_hash: [u8; 32] = Sha256::digest(challenge).into();

        let request = CredentialRequest {
            rp_id: self.relying_party_id.clone(),
            user_handle: Sha256::digest(context).to_vec(),
            client_data_hash,
        };
        let attestation = self.authenticator.make_credential(&request).await?;
        let credential = verify_attestation(&attestation, &self.relying_party_id, &client_data_hash)?;
        tracing::debug!(
            credential_id_len = credential.credential_id.len(),
            "authenticator credential attested"
        );

        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        let prf_output = Zeroizing::new(
            self.authenticator
                .prf(&credential.credential_id, &salt)
                .await?,
        );

        let nonce = EncryptionNonce::generate();
        let ciphertext = Self::wrap_key(&prf_output).encrypt(secret, &nonce, context)?;

        let blob = HardwareBlob {
            credential_id: Bytes::from(credential.credential_id),
            credential_public: credential.public_key,
            salt,
            nonce,
            ciphertext: Bytes::from(ciphertext),
        };
        let mut out = Vec::new();
        ciborium::into_writer(&blob, &mut out).map_err(|e| KeysError::Encoding(e.to_string()))?;
        Ok(Bytes::from(out))
    }

    async fn unseal(&self, context: &[u8], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let blob: HardwareBlob =
            ciborium::from_reader(sealed).map_err(|e| KeysError::Encoding(e.to_string()))?;

        if !self.authenticator.is_available().await {
            return Err(KeysError::NotAvailable("no authenticator present".into()));
        }

        let prf_output = match self.authenticator.prf(&blob.credential_id, &blob.salt).await {
            Ok(out) => Zeroizing::new(out),
            Err(e) => {
                tracing::debug!(error = %e, "authenticator refused credential");
                return Err(KeysError::NotAvailable(
                    "credential unknown to this authenticator".into(),
                ));
            }
        };

        Self::wrap_key(&prf_output)
            .decrypt(&blob.ciphertext, &blob.nonce, context)
            .map(Zeroizing::new)
            .map_err(|_| KeysError::NotAvailable("hardware slot failed to open".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::AttestationError;
    use crate::testing::SoftAuthenticator;

    const RP: &str = "vault.example.org";

    #[tokio::test]
    async fn test_hardware_round_trip() {
        let auth = Arc::new(SoftAuthenticator::new(RP));
        let tier = HardwareTier::new(auth, RP);

        tier.probe().await.unwrap();
        let sealed = tier.seal(b"ctx", b"kem secret").await.unwrap();
        assert_eq!(&tier.unseal(b"ctx", &sealed).await.unwrap()[..], b"kem secret");
    }

    #[tokio::test]
    async fn test_probe_fails_without_authenticator() {
        let auth = Arc::new(SoftAuthenticator::new(RP));
        auth.set_available(false);
        let tier = HardwareTier::new(auth, RP);

        assert!(tier.probe().await.unwrap_err().is_not_available());
    }

    #[tokio::test]
    async fn test_other_authenticator_cannot_unseal() {
        let first = HardwareTier::new(Arc::new(SoftAuthenticator::new(RP)), RP);
        let sealed = first.seal(b"ctx", b"secret").await.unwrap();

        let second = HardwareTier::new(Arc::new(SoftAuthenticator::new(RP)), RP);
        assert!(second.unseal(b"ctx", &sealed).await.unwrap_err().is_not_available());
    }

    #[tokio::test]
    async fn test_attestation_for_wrong_rp_rejected() {
        let auth = Arc::new(SoftAuthenticator::new("phishing.example"));
        let tier = HardwareTier::new(auth, RP);

        assert!(matches!(
            tier.seal(b"ctx", b"secret").await,
            Err(KeysError::Attestation(AttestationError::RpIdMismatch))
        ));
    }

    #[tokio::test]
    async fn test_forged_attestation_rejected() {
        let auth = Arc::new(SoftAuthenticator::new(RP));
        auth.set_forge_signature(true);
        let tier = HardwareTier::new(auth, RP);

        assert!(matches!(
            tier.seal(b"ctx", b"secret").await,
            Err(KeysError::Attestation(AttestationError::BadSignature))
        ));
    }
}
