//! Test doubles for the hardware tier.
//!
//! Compiled for this crate's tests and, with the `test-util` feature, for
//! downstream test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};

use carevault_core::SigningKeypair;

use crate::attestation::{
    encode_attestation_object, encode_auth_data, AttestationStatement, FLAG_UP, FLAG_UV,
};
use crate::error::{KeysError, Result};
use crate::hardware::{Authenticator, CredentialRequest};

/// AAGUID written into every attestation.
pub const SOFT_AAGUID: [u8; 16] = *b"carevault-soft01";

struct Credential {
    signer: SigningKeypair,
    prf_secret: [u8; 32],
}

/// Software stand-in for a platform passkey.
///
/// Produces packed self attestation and answers PRF requests as
/// `SHA-256(secret || salt)`. Knobs simulate an unplugged device, a forged
/// attestation, an unanswered prompt and a lost device.
pub struct SoftAuthenticator {
    rp_id: String,
    available: AtomicBool,
    forge_signature: AtomicBool,
    prompt_delay: Mutex<Option<Duration>>,
    credentials: Mutex<HashMap<Vec<u8>, Credential>>,
}

impl SoftAuthenticator {
    /// `rp_id` is the relying party written into attestations.
    pub fn new(rp_id: &str) -> Self {
        Self {
            rp_id: rp_id.to_string(),
            available: AtomicBool::new(true),
            forge_signature: AtomicBool::new(false),
            prompt_delay: Mutex::new(None),
            credentials: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Sign attestations with an unrelated key.
    pub fn set_forge_signature(&self, forge: bool) {
        self.forge_signature.store(forge, Ordering::SeqCst);
    }

    /// Wait this long before answering a credential prompt. The device still
    /// reports itself available.
    pub fn set_prompt_delay(&self, delay: Option<Duration>) {
        *self
            .prompt_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Drop every credential, as if the device were replaced.
    pub fn forget_credentials(&self) {
        self.credentials().clear();
    }

    pub fn credential_count(&self) -> usize {
        self.credentials().len()
    }

    fn credentials(&self) -> MutexGuard<'_, HashMap<Vec<u8>, Credential>> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn unplugged(&self) -> Option<KeysError> {
        (!self.available.load(Ordering::SeqCst))
            .then(|| KeysError::Authenticator("authenticator unplugged".into()))
    }
}

#[async_trait]
impl Authenticator for SoftAuthenticator {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn make_credential(&self, request: &CredentialRequest) -> Result<Vec<u8>> {
        if let Some(e) = self.unplugged() {
            return Err(e);
        }
        let delay = *self
            .prompt_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut credential_id = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut credential_id);
        let mut prf_secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut prf_secret);
        let signer = SigningKeypair::generate();

        let auth_data = encode_auth_data(
            &self.rp_id,
            FLAG_UP | FLAG_UV,
            1,
            SOFT_AAGUID,
            &credential_id,
            &signer.public_key(),
        )?;

        let mut signed = auth_data.clone();
        signed.extend_from_slice(&request.client_data_hash);
        let signature = if self.forge_signature.load(Ordering::SeqCst) {
            SigningKeypair::generate().sign(&signed)
        } else {
            signer.sign(&signed)
        };

        self.credentials()
            .insert(credential_id, Credential { signer, prf_secret });

        Ok(encode_attestation_object(
            &AttestationStatement::PackedSelf { signature },
            &auth_data,
        )?)
    }

    async fn prf(&self, credential_id: &[u8], salt: &[u8; 32]) -> Result<[u8; 32]> {
        if let Some(e) = self.unplugged() {
            return Err(e);
        }
        let credentials = self.credentials();
        let credential = credentials
            .get(credential_id)
            .ok_or_else(|| KeysError::Authenticator("unknown credential".into()))?;

        let mut hasher = Sha256::new();
        hasher.update(credential.prf_secret);
        hasher.update(salt);
        Ok(hasher.finalize().into())
    }
}

#[cfg(test)]
pub(crate) use stalling::StallingTier;
