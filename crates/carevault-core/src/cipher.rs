//! Hybrid KEM + AEAD encryption.
//!
//! A record is sealed in three steps:
//!
//! 1. ML-KEM-768 encapsulation against the recipient's public key yields a
//!    KEM ciphertext and a 32-byte shared secret.
//! 2. Blake3 `derive_key` turns the shared secret into an AES-256 key.
//! 3. AES-256-GCM encrypts the plaintext under a fresh 96-bit IV, with the
//!    algorithm identifier as associated data and a detached tag.
//!
//! Opening reverses the steps. Every function here is pure apart from the
//! randomness drawn for encapsulation and the IV.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use bytes::Bytes;
use ml_kem::{array::Array, kem::{Decapsulate, Encapsulate}, Ciphertext, MlKem768};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::envelope::{AlgorithmId, HybridEnvelope};
use crate::error::{CoreError, KeyKind, Result};
use crate::kem::{KemPublicKey, PrivateKeyRef, KEM_CIPHERTEXT_LEN, KEM_SHARED_SECRET_LEN};
use crate::types::now_millis;

/// AES-256 key length.
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// AES-GCM IV length.
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const AUTH_TAG_LEN: usize = 16;

const SYMMETRIC_KEY_CONTEXT: &str = "carevault 2024-06 mlkem768 aes256gcm record key";

/// A KEM shared secret.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEM_SHARED_SECRET_LEN]);

impl SharedSecret {
    /// Parse from a slice, enforcing the 32-byte length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEM_SHARED_SECRET_LEN] = bytes.try_into().map_err(|_| {
            CoreError::key_format(KeyKind::SharedSecret, KEM_SHARED_SECRET_LEN, bytes.len())
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEM_SHARED_SECRET_LEN] {
        &self.0
    }
}

// Needed by `Result::unwrap_err` in the tests; never prints the secret bytes.
#[cfg(test)]
impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// An AES-256-GCM key derived from a shared secret.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LEN]);

impl SymmetricKey {
    /// Parse from a slice, enforcing the 32-byte length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SYMMETRIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            CoreError::key_format(KeyKind::SymmetricKey, SYMMETRIC_KEY_LEN, bytes.len())
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.0
    }
}

/// Output of [`seal_plaintext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub cipher_text: Bytes,
    pub iv: [u8; IV_LEN],
    pub auth_tag: [u8; AUTH_TAG_LEN],
}

/// Encapsulate a fresh shared secret to a recipient's public key.
///
/// The key length is checked before any KEM work is done; a key of the
/// wrong length fails with [`CoreError::KeyFormat`].
pub fn encapsulate(recipient_public: &[u8]) -> Result<(Bytes, SharedSecret)> {
    let public = KemPublicKey::from_slice(recipient_public)?;
    let ek = public.to_encapsulation_key()?;

    let (kem_cipher_text, shared) = ek
        .encapsulate(&mut rand::thread_rng())
        .map_err(|_| CoreError::Encryption("ML-KEM encapsulation failed".into()))?;

    let secret = SharedSecret::from_slice(shared.as_slice())?;
    Ok((Bytes::copy_from_slice(kem_cipher_text.as_slice()), secret))
}

/// Recover the shared secret from a KEM ciphertext.
///
/// ML-KEM uses implicit rejection: a well-formed ciphertext under the wrong
/// key yields an unrelated secret, which then fails authentication in
/// [`open_cipher_text`].
pub fn decapsulate(kem_cipher_text: &[u8], key: &PrivateKeyRef) -> Result<SharedSecret> {
    if kem_cipher_text.len() != KEM_CIPHERTEXT_LEN {
        return Err(CoreError::Decapsulation(format!(
            "KEM ciphertext must be {} bytes, got {}",
            KEM_CIPHERTEXT_LEN,
            kem_cipher_text.len()
        )));
    }

    let dk = key.material().decapsulation_key()?;
    let ct: Ciphertext<MlKem768> = Array::try_from(kem_cipher_text)
        .map_err(|_| CoreError::Decapsulation("malformed KEM ciphertext".into()))?;
    let shared = dk
        .decapsulate(&ct)
        .map_err(|_| CoreError::Decapsulation("ML-KEM decapsulation failed".into()))?;

    SharedSecret::from_slice(shared.as_slice())
}

/// Derive the AES-256 key for a shared secret. Deterministic.
pub fn derive_symmetric_key(shared: &SharedSecret) -> SymmetricKey {
    SymmetricKey(blake3::derive_key(SYMMETRIC_KEY_CONTEXT, &shared.0))
}

/// Encrypt under a fresh random IV.
pub fn seal_plaintext(plaintext: &[u8], key: &SymmetricKey) -> Result<SealedBox> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| CoreError::Encryption(e.to_string()))?;

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(
            Nonce::from_slice(&iv),
            AlgorithmId::MlKem768Aes256Gcm.as_str().as_bytes(),
            &mut buffer,
        )
        .map_err(|e| CoreError::Encryption(e.to_string()))?;

    let mut auth_tag = [0u8; AUTH_TAG_LEN];
    auth_tag.copy_from_slice(tag.as_slice());

    Ok(SealedBox {
        cipher_text: Bytes::from(buffer),
        iv,
        auth_tag,
    })
}

/// Verify and decrypt. Any mismatch fails with [`CoreError::Authentication`];
/// no partial plaintext is ever returned.
pub fn open_cipher_text(
    cipher_text: &[u8],
    key: &SymmetricKey,
    iv: &[u8],
    auth_tag: &[u8],
) -> Result<Vec<u8>> {
    if iv.len() != IV_LEN || auth_tag.len() != AUTH_TAG_LEN {
        return Err(CoreError::Authentication);
    }

    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| CoreError::Authentication)?;

    let mut buffer = Zeroizing::new(cipher_text.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            AlgorithmId::MlKem768Aes256Gcm.as_str().as_bytes(),
            &mut buffer,
            Tag::from_slice(auth_tag),
        )
        .map_err(|_| CoreError::Authentication)?;

    Ok(std::mem::take(&mut *buffer))
}

/// Seal plaintext to a recipient's encoded public key.
pub fn encrypt(plaintext: &[u8], recipient_public: &[u8]) -> Result<HybridEnvelope> {
    let (kem_cipher_text, shared) = encapsulate(recipient_public)?;
    let key = derive_symmetric_key(&shared);
    let sealed = seal_plaintext(plaintext, &key)?;

    Ok(HybridEnvelope {
        algorithm_id: AlgorithmId::MlKem768Aes256Gcm,
        cipher_text: sealed.cipher_text,
        kem_cipher_text,
        iv: Bytes::copy_from_slice(&sealed.iv),
        auth_tag: Bytes::copy_from_slice(&sealed.auth_tag),
        created_at: now_millis(),
        recipient_key_id: Some(crate::types::KeyId::derive(recipient_public)),
    })
}

/// Open an envelope with a resolved private key.
///
/// The algorithm and field sizes are validated before decapsulation.
pub fn decrypt(envelope: &HybridEnvelope, key: &PrivateKeyRef) -> Result<Vec<u8>> {
    envelope.validate()?;

    let shared = decapsulate(&envelope.kem_cipher_text, key)?;
    let symmetric = derive_symmetric_key(&shared);
    open_cipher_text(
        &envelope.cipher_text,
        &symmetric,
        &envelope.iv,
        &envelope.auth_tag,
    )
}
