//! Shares and sender attestations.
//!
//! A share carries the record sealed to the recipient, plus the owner's
//! Ed25519 signature over a canonical encoding of what was granted:
//!
//! ```text
//! { 0: version, 1: share_id, 2: record_id, 3: owner_id,
//!   4: recipient_id, 5: created_at, 6: envelope digest }
//! ```
//!
//! Integer keys, smallest integer encodings and definite lengths make the
//! message byte-identical wherever it is rebuilt. The envelope digest ties
//! the signature to the exact ciphertext, so an envelope cannot be swapped
//! under an existing attestation.

use serde::{Deserialize, Serialize};

use carevault_core::{
    now_millis, Ed25519PublicKey, HybridEnvelope, PrivateKeyRef, RecordId,
    RevocationEntry, Share, ShareId, UserId,
};

use crate::error::{Result, ShareError};

const ATTESTATION_VERSION: u64 = 1;
const ENVELOPE_DIGEST_DOMAIN: &str = "carevault 2024-06 share envelope digest";

mod keys {
    pub const VERSION: u64 = 0;
    pub const SHARE_ID: u64 = 1;
    pub const RECORD_ID: u64 = 2;
    pub const OWNER_ID: u64 = 3;
    pub const RECIPIENT_ID: u64 = 4;
    pub const CREATED_AT: u64 = 5;
    pub const ENVELOPE_DIGEST: u64 = 6;
}

/// Lifecycle of a share: `Created → Active → Revoked`.
///
/// `Revoked` is terminal. There is no transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareState {
    /// Built and signed, not yet persisted.
    Created,
    /// Persisted, and its record has no revocation entry.
    Active,
    /// Its record has been revoked.
    Revoked,
}

impl ShareState {
    /// State of a persisted share given its record's revocation entry.
    pub fn of(share: &Share, revocation: Option<&RevocationEntry>) -> Self {
        match revocation {
            Some(entry) if entry.record_id == share.record_id => ShareState::Revoked,
            _ => ShareState::Active,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShareState::Revoked)
    }

    /// Whether the recipient may open the share in this state.
    pub fn is_readable(&self) -> bool {
        matches!(self, ShareState::Active)
    }
}

/// A signed share that has not been persisted.
#[derive(Debug, Clone)]
pub struct ShareDraft {
    share: Share,
}

impl ShareDraft {
    /// Build and sign a share of `record_id` for `recipient`.
    ///
    /// `envelope` must already be sealed to the recipient's active key.
    pub fn new(
        record_id: RecordId,
        owner: UserId,
        recipient: UserId,
        envelope: HybridEnvelope,
        owner_key: &PrivateKeyRef,
    ) -> Self {
        let share_id = ShareId::generate();
        let created_at = now_millis();
        let message = attestation_message(
            &share_id,
            &record_id,
            &owner,
            &recipient,
            created_at,
            &envelope,
        );

        Self {
            share: Share {
                share_id,
                record_id,
                owner_id: owner,
                recipient_id: recipient,
                envelope,
                sender_attestation: owner_key.sign(&message),
                created_at,
            },
        }
    }

    pub fn share(&self) -> &Share {
        &self.share
    }

    pub fn state(&self) -> ShareState {
        ShareState::Created
    }

    /// Hand over the share for persistence.
    pub fn into_share(self) -> Share {
        self.share
    }
}

/// Canonical bytes the owner signs for a share.
pub fn attestation_message(
    share_id: &ShareId,
    record_id: &RecordId,
    owner: &UserId,
    recipient: &UserId,
    created_at: i64,
    envelope: &HybridEnvelope,
) -> Vec<u8> {
    let digest = envelope_digest(envelope);

    let mut buf = Vec::with_capacity(160);
    encode_uint(&mut buf, 5, 7);

    encode_uint(&mut buf, 0, keys::VERSION);
    encode_uint(&mut buf, 0, ATTESTATION_VERSION);

    encode_uint(&mut buf, 0, keys::SHARE_ID);
    encode_bytes(&mut buf, share_id.as_bytes());

    encode_uint(&mut buf, 0, keys::RECORD_ID);
    encode_bytes(&mut buf, record_id.as_bytes());

    encode_uint(&mut buf, 0, keys::OWNER_ID);
    encode_text(&mut buf, owner.as_str());

    encode_uint(&mut buf, 0, keys::RECIPIENT_ID);
    encode_text(&mut buf, recipient.as_str());

    encode_uint(&mut buf, 0, keys::CREATED_AT);
    encode_int(&mut buf, created_at);

    encode_uint(&mut buf, 0, keys::ENVELOPE_DIGEST);
    encode_bytes(&mut buf, &digest);

    buf
}

/// Check a share's attestation against the owner's verifying keys.
///
/// Any one key is enough; owners rotate keys, so older shares are signed by
/// keys that are no longer active.
pub fn verify_share(share: &Share, owner_keys: &[Ed25519PublicKey]) -> Result<()> {
    let message = attestation_message(
        &share.share_id,
        &share.record_id,
        &share.owner_id,
        &share.recipient_id,
        share.created_at,
        &share.envelope,
    );

    if owner_keys
        .iter()
        .any(|key| key.verify(&message, &share.sender_attestation).is_ok())
    {
        Ok(())
    } else {
        Err(ShareError::InvalidAttestation)
    }
}

fn envelope_digest(envelope: &HybridEnvelope) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(ENVELOPE_DIGEST_DOMAIN);
    for part in [
        envelope.algorithm_id.as_str().as_bytes(),
        &envelope.kem_cipher_text[..],
        &envelope.iv[..],
        &envelope.auth_tag[..],
        &envelope.cipher_text[..],
    ] {
        hasher.update(&(part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

// ─────────────────────────────────────────────────────────────────────────────
// Canonical CBOR primitives
// ─────────────────────────────────────────────────────────────────────────────

fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_int(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // -1 encodes as 0, -2 as 1, ...
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}
