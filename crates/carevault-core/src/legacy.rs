//! Pre-quantum record formats.
//!
//! Records written before the hybrid scheme must stay readable. New records
//! are never written in these formats outside of tests and migration tooling.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;

use crate::crypto::{EncryptionNonce, EphemeralKeyPair, X25519PublicKey, X25519StaticSecret};
use crate::envelope::{LegacyEcdhEnvelope, LegacyEncodedPayload};
use crate::error::{CoreError, Result};
use crate::types::now_millis;

const LEGACY_RECORD_DOMAIN: &str = "carevault legacy record v2";

// Algorithm id bound as associated data.
const ECDH_AAD: &[u8] = b"x25519-chacha20poly1305";

const LEGACY_ENCODED_VERSION: u8 = 1;

/// Seal a record to an X25519 public key the pre-quantum way.
pub fn seal_ecdh(plaintext: &[u8], recipient: &X25519PublicKey) -> Result<LegacyEcdhEnvelope> {
    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_public = ephemeral.public_key();

    let shared = ephemeral.diffie_hellman(recipient);
    let key = shared.derive_encryption_key(LEGACY_RECORD_DOMAIN, ephemeral_public.as_bytes());

    let nonce = EncryptionNonce::generate();
    let ciphertext = key.encrypt(plaintext, &nonce, ECDH_AAD)?;

    Ok(LegacyEcdhEnvelope {
        ephemeral_public,
        nonce,
        ciphertext: Bytes::from(ciphertext),
        created_at: now_millis(),
    })
}

/// Open a pre-quantum record with the owner's X25519 secret.
pub fn open_ecdh(envelope: &LegacyEcdhEnvelope, secret: &X25519StaticSecret) -> Result<Vec<u8>> {
    let shared = secret.diffie_hellman(&envelope.ephemeral_public);
    let key = shared.derive_encryption_key(
        LEGACY_RECORD_DOMAIN,
        envelope.ephemeral_public.as_bytes(),
    );
    key.decrypt(&envelope.ciphertext, &envelope.nonce, ECDH_AAD)
}

/// Wrap plaintext in the pre-encryption JSON form.
pub fn encode_plain(plaintext: &[u8]) -> LegacyEncodedPayload {
    LegacyEncodedPayload {
        v: LEGACY_ENCODED_VERSION,
        data: STANDARD.encode(plaintext),
    }
}

/// Unwrap a pre-encryption JSON payload.
pub fn decode_plain(payload: &LegacyEncodedPayload) -> Result<Vec<u8>> {
    if payload.v != LEGACY_ENCODED_VERSION {
        return Err(CoreError::EnvelopeFormat(format!(
            "unsupported legacy payload version {}",
            payload.v
        )));
    }
    STANDARD
        .decode(payload.data.as_bytes())
        .map_err(|e| CoreError::EnvelopeFormat(e.to_string()))
}
