//! Persisted data model: records, shares, revocations, published keys.
//!
//! These are plain values. Authorization and state transitions live in the
//! crates that own each concept; this module only fixes their shape so every
//! store backend persists the same thing.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::{Ed25519PublicKey, Ed25519Signature};
use crate::envelope::HybridEnvelope;
use crate::kem::KemPublicKey;
use crate::types::{KeyId, RecordId, ShareId, UserId};

/// Where a user's private key material is kept on this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    /// Wrapped by a platform authenticator's PRF output.
    Hardware,
    /// Wrapped to a non-exportable, process-lifetime device key.
    SoftwareAsymmetric,
    /// Stored as-is. Kept for older clients.
    PlainPersistent,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Hardware => "hardware",
            StorageTier::SoftwareAsymmetric => "software_asymmetric",
            StorageTier::PlainPersistent => "plain_persistent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hardware" => Some(StorageTier::Hardware),
            "software_asymmetric" => Some(StorageTier::SoftwareAsymmetric),
            "plain_persistent" => Some(StorageTier::PlainPersistent),
            _ => None,
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The public half of a user's keys, as published to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub user_id: UserId,
    pub key_id: KeyId,
    pub public_key: KemPublicKey,
    /// Verifies share attestations signed by this user.
    pub verifying_key: Ed25519PublicKey,
    pub storage_tier: StorageTier,
    pub created_at: i64,
    /// Exactly one published key per user is active; older ones are kept as
    /// history so superseded envelopes and attestations still resolve.
    pub active: bool,
}

/// Free-form record description. Never encrypted, so never clinical content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub label: String,
    pub content_type: String,
}

impl RecordMetadata {
    pub fn new(label: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            content_type: content_type.into(),
        }
    }
}

/// A record row. `encrypted_payload` is a marked [`crate::SealedPayload`] blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub record_id: RecordId,
    pub owner_id: UserId,
    pub encrypted_payload: Bytes,
    pub metadata: RecordMetadata,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Read access to one record, granted by its owner to one recipient.
///
/// Never mutated after creation. Revocation is recorded separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub share_id: ShareId,
    pub record_id: RecordId,
    pub owner_id: UserId,
    pub recipient_id: UserId,
    /// The record plaintext sealed to the recipient's public key.
    pub envelope: HybridEnvelope,
    pub sender_attestation: Ed25519Signature,
    pub created_at: i64,
}

/// The single, permanent revocation of a record's shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub record_id: RecordId,
    pub revoked_by: UserId,
    pub revoked_at: i64,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_tier_names_roundtrip() {
        for tier in [
            StorageTier::Hardware,
            StorageTier::SoftwareAsymmetric,
            StorageTier::PlainPersistent,
        ] {
            assert_eq!(StorageTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(StorageTier::parse("tpm"), None);
    }

    #[test]
    fn test_storage_tier_serde_matches_as_str() {
        let json = serde_json::to_string(&StorageTier::SoftwareAsymmetric).unwrap();
        assert_eq!(json, "\"software_asymmetric\"");
    }
}
