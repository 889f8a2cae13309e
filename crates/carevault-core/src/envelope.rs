//! Sealed payload formats.
//!
//! A persisted record payload is one of three generations, told apart by the
//! first byte of the blob:
//!
//! | Marker | Variant | Algorithm |
//! |---|---|---|
//! | `0x03` + CBOR | [`SealedPayload::Hybrid`] | `mlkem768-aes256gcm` |
//! | `0x02` + CBOR | [`SealedPayload::LegacyEcdh`] | `x25519-chacha20poly1305` |
//! | `{` (JSON) | [`SealedPayload::LegacyEncoded`] | `base64-json` |
//!
//! Decoding never guesses: the marker picks the variant, and a blob whose
//! body does not parse as that variant is an error.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cipher::{AUTH_TAG_LEN, IV_LEN};
use crate::crypto::{EncryptionNonce, X25519PublicKey};
use crate::error::{CoreError, Result};
use crate::kem::KEM_CIPHERTEXT_LEN;
use crate::types::KeyId;

/// Leading byte of a hybrid envelope blob.
pub const HYBRID_MARKER: u8 = 0x03;

/// Leading byte of a pre-quantum ECDH envelope blob.
pub const LEGACY_ECDH_MARKER: u8 = 0x02;

/// Leading byte of a pre-encryption JSON payload.
pub const LEGACY_ENCODED_MARKER: u8 = b'{';

/// Algorithm identifier carried in every envelope.
///
/// Unknown identifiers survive decoding so callers can report them instead
/// of failing with an opaque parse error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlgorithmId {
    /// ML-KEM-768 encapsulation with AES-256-GCM. Current.
    MlKem768Aes256Gcm,
    /// Ephemeral X25519 with ChaCha20-Poly1305. Pre-quantum.
    X25519ChaCha20Poly1305,
    /// Base64 inside JSON, no encryption. Pre-encryption.
    Base64Json,
    Other(String),
}

impl AlgorithmId {
    pub fn as_str(&self) -> &str {
        match self {
            AlgorithmId::MlKem768Aes256Gcm => "mlkem768-aes256gcm",
            AlgorithmId::X25519ChaCha20Poly1305 => "x25519-chacha20poly1305",
            AlgorithmId::Base64Json => "base64-json",
            AlgorithmId::Other(s) => s,
        }
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for AlgorithmId {
    fn from(s: String) -> Self {
        match s.as_str() {
            "mlkem768-aes256gcm" => AlgorithmId::MlKem768Aes256Gcm,
            "x25519-chacha20poly1305" => AlgorithmId::X25519ChaCha20Poly1305,
            "base64-json" => AlgorithmId::Base64Json,
            _ => AlgorithmId::Other(s),
        }
    }
}

impl From<AlgorithmId> for String {
    fn from(id: AlgorithmId) -> Self {
        match id {
            AlgorithmId::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

/// The at-rest unit of the current scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridEnvelope {
    pub algorithm_id: AlgorithmId,
    pub cipher_text: Bytes,
    pub kem_cipher_text: Bytes,
    pub iv: Bytes,
    pub auth_tag: Bytes,
    pub created_at: i64,

    /// KEM key the envelope was sealed to. Absent on envelopes written before
    /// key rotation existed; those are opened with the active key.
    #[serde(default)]
    pub recipient_key_id: Option<KeyId>,
}

impl HybridEnvelope {
    /// Check the algorithm and the fixed field sizes it mandates.
    pub fn validate(&self) -> Result<()> {
        if self.algorithm_id != AlgorithmId::MlKem768Aes256Gcm {
            return Err(CoreError::UnsupportedAlgorithm(
                self.algorithm_id.to_string(),
            ));
        }

        check_len("kem_cipher_text", self.kem_cipher_text.len(), KEM_CIPHERTEXT_LEN)?;
        check_len("iv", self.iv.len(), IV_LEN)?;
        check_len("auth_tag", self.auth_tag.len(), AUTH_TAG_LEN)?;
        Ok(())
    }

    /// Serialize to CBOR bytes (no marker).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes and validate field sizes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: Self = ciborium::from_reader(bytes)
            .map_err(|e| CoreError::EnvelopeFormat(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }
}

fn check_len(field: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(CoreError::EnvelopeFormat(format!(
            "{} must be {} bytes, got {}",
            field, expected, actual
        )));
    }
    Ok(())
}

/// A record sealed with ephemeral X25519 and ChaCha20-Poly1305.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEcdhEnvelope {
    /// Sender's ephemeral public key.
    pub ephemeral_public: X25519PublicKey,
    pub nonce: EncryptionNonce,
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: Bytes,
    pub created_at: i64,
}

/// A record stored before encryption was introduced: base64 inside JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyEncodedPayload {
    pub v: u8,
    pub data: String,
}

/// The first-byte discriminator of a persisted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Hybrid,
    LegacyEcdh,
    LegacyEncoded,
    Unknown,
}

impl Marker {
    /// Classify a raw blob by its first byte.
    pub fn detect(raw: &[u8]) -> Self {
        match raw.first() {
            Some(&HYBRID_MARKER) => Marker::Hybrid,
            Some(&LEGACY_ECDH_MARKER) => Marker::LegacyEcdh,
            Some(&LEGACY_ENCODED_MARKER) => Marker::LegacyEncoded,
            _ => Marker::Unknown,
        }
    }
}

/// Any generation of persisted record payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealedPayload {
    Hybrid(HybridEnvelope),
    LegacyEcdh(LegacyEcdhEnvelope),
    LegacyEncoded(LegacyEncodedPayload),
}

impl SealedPayload {
    pub fn algorithm_id(&self) -> AlgorithmId {
        match self {
            SealedPayload::Hybrid(env) => env.algorithm_id.clone(),
            SealedPayload::LegacyEcdh(_) => AlgorithmId::X25519ChaCha20Poly1305,
            SealedPayload::LegacyEncoded(_) => AlgorithmId::Base64Json,
        }
    }

    pub fn marker(&self) -> Marker {
        match self {
            SealedPayload::Hybrid(_) => Marker::Hybrid,
            SealedPayload::LegacyEcdh(_) => Marker::LegacyEcdh,
            SealedPayload::LegacyEncoded(_) => Marker::LegacyEncoded,
        }
    }

    /// Encode with the leading marker.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            SealedPayload::Hybrid(env) => with_marker(HYBRID_MARKER, env),
            SealedPayload::LegacyEcdh(env) => with_marker(LEGACY_ECDH_MARKER, env),
            SealedPayload::LegacyEncoded(payload) => serde_json::to_vec(payload)
                .map_err(|e| CoreError::EncodingError(e.to_string())),
        }
    }

    /// Decode a marked blob.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        match Marker::detect(raw) {
            Marker::Hybrid => HybridEnvelope::from_bytes(&raw[1..]).map(SealedPayload::Hybrid),
            Marker::LegacyEcdh => ciborium::from_reader(&raw[1..])
                .map(SealedPayload::LegacyEcdh)
                .map_err(|e| CoreError::EnvelopeFormat(e.to_string())),
            Marker::LegacyEncoded => serde_json::from_slice(raw)
                .map(SealedPayload::LegacyEncoded)
                .map_err(|e| CoreError::EnvelopeFormat(e.to_string())),
            Marker::Unknown => Err(CoreError::EnvelopeFormat(match raw.first() {
                Some(b) => format!("unknown payload marker {:#04x}", b),
                None => "empty payload".to_string(),
            })),
        }
    }
}

impl From<HybridEnvelope> for SealedPayload {
    fn from(env: HybridEnvelope) -> Self {
        SealedPayload::Hybrid(env)
    }
}

fn with_marker<T: Serialize>(marker: u8, value: &T) -> Result<Vec<u8>> {
    let mut buf = vec![marker];
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}
