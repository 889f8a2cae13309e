//! Classical cryptographic primitives.
//!
//! Ed25519 signs share attestations. X25519 key agreement with
//! ChaCha20-Poly1305 backs the pre-quantum record format and the wrapping of
//! key material inside local storage tiers.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CoreError, KeyKind, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Ed25519
// ─────────────────────────────────────────────────────────────────────────────

fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..8])
}

/// Owner verifying key, published next to the KEM key in the directory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check `signature` over `message`. A key that is not a valid curve
    /// point is reported separately from a bad signature.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidVerifyingKey)?;
        key.verify(message, &Signature::from_bytes(&signature.0))
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyingKey({})", short_hex(&self.0))
    }
}

impl TryFrom<&[u8]> for Ed25519PublicKey {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self> {
        <[u8; 32]>::try_from(slice)
            .map(Self)
            .map_err(|_| CoreError::InvalidVerifyingKey)
    }
}

/// Detached Ed25519 signature. Serialized as a byte string.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", short_hex(&self.0))
    }
}

impl TryFrom<&[u8]> for Ed25519Signature {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self> {
        <[u8; 64]>::try_from(slice)
            .map(Self)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl TryFrom<Vec<u8>> for Ed25519Signature {
    type Error = CoreError;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Self::try_from(bytes.as_slice())
    }
}

impl From<Ed25519Signature> for Vec<u8> {
    fn from(sig: Ed25519Signature) -> Self {
        sig.0.to_vec()
    }
}

/// Signing half of a user's key material. Travels only inside
/// [`crate::kem::KeyMaterial`].
#[derive(Clone)]
pub struct SigningKeypair(SigningKey);

impl SigningKeypair {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::thread_rng()))
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.0.sign(message).to_bytes())
    }

    pub(crate) fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes())
    }
}

impl fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKeypair").field(&self.public_key()).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// X25519
// ─────────────────────────────────────────────────────────────────────────────

/// An X25519 public value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(pk.to_bytes())
    }
}

/// A long-lived X25519 secret: a device key or an imported legacy key.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::thread_rng()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Parse from a slice, enforcing the 32-byte length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::key_format(KeyKind::X25519Key, 32, bytes.len()))?;
        let secret = Self::from_bytes(arr);
        arr.zeroize();
        Ok(secret)
    }

    pub fn public_key(&self) -> X25519PublicKey {
        PublicKey::from(&self.0).into()
    }

    pub fn diffie_hellman(&self, peer: &X25519PublicKey) -> SharedKey {
        SharedKey(self.0.diffie_hellman(&peer.to_dalek()).to_bytes())
    }
}

impl fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519StaticSecret({:?})", self.public_key())
    }
}

/// A single-use X25519 secret for sealing to someone else's static key.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public: X25519PublicKey = PublicKey::from(&secret).into();
        Self { secret, public }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Consumes the secret; an ephemeral key agrees exactly once.
    pub fn diffie_hellman(self, peer: &X25519PublicKey) -> SharedKey {
        SharedKey(self.secret.diffie_hellman(&peer.to_dalek()).to_bytes())
    }
}

/// Raw X25519 agreement output. Never used as a key directly.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derive a ChaCha20-Poly1305 key.
    ///
    /// `domain` separates the uses of ECDH in the system; `context` binds the
    /// key to the public values of a single exchange.
    pub fn derive_encryption_key(&self, domain: &str, context: &[u8]) -> EncryptionKey {
        let mut hasher = blake3::Hasher::new_derive_key(domain);
        hasher.update(&self.0);
        hasher.update(context);
        EncryptionKey(*hasher.finalize().as_bytes())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChaCha20-Poly1305
// ─────────────────────────────────────────────────────────────────────────────

/// A ChaCha20-Poly1305 key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Derive from high-entropy input such as an authenticator PRF output.
    pub fn derive(domain: &str, ikm: &[u8]) -> Self {
        Self(blake3::derive_key(domain, ikm))
    }

    /// Seal `plaintext`; `aad` is authenticated but not encrypted.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &EncryptionNonce, aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: plaintext, aad };
        self.cipher()?
            .encrypt(Nonce::from_slice(&nonce.0), payload)
            .map_err(|e| CoreError::Encryption(e.to_string()))
    }

    /// Open a sealed buffer. Every failure is [`CoreError::Authentication`].
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &EncryptionNonce, aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: ciphertext, aad };
        self.cipher()
            .map_err(|_| CoreError::Authentication)?
            .decrypt(Nonce::from_slice(&nonce.0), payload)
            .map_err(|_| CoreError::Authentication)
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(&self.0).map_err(|e| CoreError::Encryption(e.to_string()))
    }
}

/// A random 96-bit nonce. Never reused under one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(pub [u8; 12]);

impl EncryptionNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}
