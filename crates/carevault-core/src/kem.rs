//! ML-KEM-768 key types.
//!
//! Every key crosses the crate boundary as bytes whose length is checked
//! against the fixed parameter sizes of ML-KEM-768. A key of any other length
//! is rejected with [`CoreError::KeyFormat`]; nothing is padded or truncated.

use std::fmt;
use std::sync::Arc;

use ml_kem::{array::Array, EncodedSizeUser, KemCore, MlKem768};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{Ed25519PublicKey, Ed25519Signature, SigningKeypair};
use crate::error::{CoreError, KeyKind, Result};
use crate::types::KeyId;

/// Encoded ML-KEM-768 encapsulation key.
pub const KEM_PUBLIC_KEY_LEN: usize = 1184;

/// Encoded ML-KEM-768 decapsulation key.
pub const KEM_SECRET_KEY_LEN: usize = 2400;

/// ML-KEM-768 ciphertext.
pub const KEM_CIPHERTEXT_LEN: usize = 1088;

/// ML-KEM shared secret.
pub const KEM_SHARED_SECRET_LEN: usize = 32;

const SIGNING_SEED_LEN: usize = 32;

const KEY_MATERIAL_VERSION: u8 = 0x01;

/// Serialized [`KeyMaterial`]: version byte, decapsulation key, signing seed.
pub const KEY_MATERIAL_LEN: usize = 1 + KEM_SECRET_KEY_LEN + SIGNING_SEED_LEN;

// FIPS 203 decapsulation key layout: dk_pke (384·k) ‖ ek ‖ H(ek) ‖ z, k = 3.
const EMBEDDED_PUBLIC_KEY_OFFSET: usize = 384 * 3;

pub(crate) type DecapsulationKey = <MlKem768 as KemCore>::DecapsulationKey;
pub(crate) type EncapsulationKey = <MlKem768 as KemCore>::EncapsulationKey;

/// A validated ML-KEM-768 public (encapsulation) key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct KemPublicKey(Vec<u8>);

impl KemPublicKey {
    /// Parse an encoded public key, enforcing the exact length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEM_PUBLIC_KEY_LEN {
            return Err(CoreError::key_format(
                KeyKind::KemPublicKey,
                KEM_PUBLIC_KEY_LEN,
                bytes.len(),
            ));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Get the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Content-addressed identifier of this key.
    pub fn key_id(&self) -> KeyId {
        KeyId::derive(&self.0)
    }

    pub(crate) fn to_encapsulation_key(&self) -> Result<EncapsulationKey> {
        let encoded = Array::try_from(self.0.as_slice()).map_err(|_| {
            CoreError::key_format(KeyKind::KemPublicKey, KEM_PUBLIC_KEY_LEN, self.0.len())
        })?;
        Ok(EncapsulationKey::from_bytes(&encoded))
    }
}

impl fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KemPublicKey({:?})", self.key_id())
    }
}

impl AsRef<[u8]> for KemPublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<KemPublicKey> for Vec<u8> {
    fn from(key: KemPublicKey) -> Self {
        key.0
    }
}

impl TryFrom<Vec<u8>> for KemPublicKey {
    type Error = CoreError;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != KEM_PUBLIC_KEY_LEN {
            return Err(CoreError::key_format(
                KeyKind::KemPublicKey,
                KEM_PUBLIC_KEY_LEN,
                bytes.len(),
            ));
        }
        Ok(Self(bytes))
    }
}

/// The private half of a user's keys.
///
/// Holds the ML-KEM decapsulation key and the Ed25519 signing seed used for
/// share attestations. Serialized form is only ever handed to a storage tier
/// for wrapping; buffers are zeroized on drop.
pub struct KeyMaterial {
    kem_secret: Zeroizing<Vec<u8>>,
    signing: SigningKeypair,
}

impl KeyMaterial {
    /// Generate fresh key material and return it with its public key.
    pub fn generate() -> (KemPublicKey, Self) {
        let (dk, ek) = MlKem768::generate(&mut rand::thread_rng());
        let public = KemPublicKey(ek.as_bytes().to_vec());
        let material = Self {
            kem_secret: Zeroizing::new(dk.as_bytes().to_vec()),
            signing: SigningKeypair::generate(),
        };
        (public, material)
    }

    /// Recover the public key embedded in the decapsulation key.
    pub fn kem_public_key(&self) -> KemPublicKey {
        let start = EMBEDDED_PUBLIC_KEY_OFFSET;
        KemPublicKey(self.kem_secret[start..start + KEM_PUBLIC_KEY_LEN].to_vec())
    }

    pub fn key_id(&self) -> KeyId {
        self.kem_public_key().key_id()
    }

    pub fn verifying_key(&self) -> Ed25519PublicKey {
        self.signing.public_key()
    }

    /// Serialize for wrapping by a storage tier.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(KEY_MATERIAL_LEN));
        out.push(KEY_MATERIAL_VERSION);
        out.extend_from_slice(&self.kem_secret);
        out.extend_from_slice(self.signing.seed().as_ref());
        out
    }

    /// Parse serialized key material.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_MATERIAL_LEN {
            return Err(CoreError::key_format(
                KeyKind::KeyMaterial,
                KEY_MATERIAL_LEN,
                bytes.len(),
            ));
        }
        if bytes[0] != KEY_MATERIAL_VERSION {
            return Err(CoreError::EncodingError(format!(
                "unknown key material version {:#04x}",
                bytes[0]
            )));
        }

        let (kem_secret, seed) = bytes[1..].split_at(KEM_SECRET_KEY_LEN);
        let mut seed_arr = Zeroizing::new([0u8; SIGNING_SEED_LEN]);
        seed_arr.copy_from_slice(seed);

        Ok(Self {
            kem_secret: Zeroizing::new(kem_secret.to_vec()),
            signing: SigningKeypair::from_seed(&seed_arr),
        })
    }

    pub(crate) fn decapsulation_key(&self) -> Result<DecapsulationKey> {
        let encoded = Array::try_from(self.kem_secret.as_slice()).map_err(|_| {
            CoreError::key_format(
                KeyKind::KemSecretKey,
                KEM_SECRET_KEY_LEN,
                self.kem_secret.len(),
            )
        })?;
        Ok(DecapsulationKey::from_bytes(&encoded))
    }

    fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.signing.sign(message)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({:?})", self.key_id())
    }
}

/// An opaque handle to resolved private key material.
///
/// Can decapsulate (through [`crate::cipher`]) and sign, but never exports the
/// secret bytes. Cloning shares the same material.
#[derive(Clone)]
pub struct PrivateKeyRef {
    key_id: KeyId,
    material: Arc<KeyMaterial>,
}

impl PrivateKeyRef {
    pub fn new(material: KeyMaterial) -> Self {
        Self {
            key_id: material.key_id(),
            material: Arc::new(material),
        }
    }

    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    pub fn public_key(&self) -> KemPublicKey {
        self.material.kem_public_key()
    }

    pub fn verifying_key(&self) -> Ed25519PublicKey {
        self.material.verifying_key()
    }

    /// Sign a message with the owner's signing capability.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.material.sign(message)
    }

    pub(crate) fn material(&self) -> &KeyMaterial {
        &self.material
    }
}

impl fmt::Debug for PrivateKeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKeyRef({:?})", self.key_id)
    }
}
