//! Test fixtures and helpers.
//!
//! A [`TestFixture`] is one server-side store. Each [`Device`] is one user's
//! client: its own slot table and key vault, talking to that shared store.

use std::sync::Arc;

use carevault::{CareVault, VaultConfig};
use carevault_core::{
    legacy, now_millis, RecordId, RecordMetadata, SealedPayload, StorageTier, StoredRecord,
    UserId, X25519PublicKey,
};
use carevault_keys::testing::SoftAuthenticator;
use carevault_keys::Authenticator;
use carevault_store::MemoryStore;

/// Relying party used by fixture authenticators.
pub const TEST_RP_ID: &str = "vault.test";

/// A user's client.
pub struct Device {
    pub user: UserId,
    pub slots: Arc<MemoryStore>,
    pub vault: CareVault<MemoryStore, MemoryStore>,
}

/// A shared server store.
pub struct TestFixture {
    pub store: Arc<MemoryStore>,
    pub config: VaultConfig,
}

impl TestFixture {
    /// Software tier first, plain as a fallback, no hardware.
    pub fn new() -> Self {
        Self::with_config(VaultConfig {
            tier_order: vec![StorageTier::SoftwareAsymmetric, StorageTier::PlainPersistent],
            relying_party_id: TEST_RP_ID.to_string(),
            ..Default::default()
        })
    }

    pub fn with_config(config: VaultConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            config,
        }
    }

    /// A fresh device for `user`.
    pub fn device(&self, user: &str) -> Device {
        self.build_device(user, Arc::new(MemoryStore::new()), self.config.clone(), None)
    }

    /// A fresh device with a hardware authenticator attached.
    pub fn device_with_authenticator(&self, user: &str, authenticator: Arc<SoftAuthenticator>) -> Device {
        let mut config = self.config.clone();
        if !config.tier_order.contains(&StorageTier::Hardware) {
            config.tier_order.insert(0, StorageTier::Hardware);
        }
        self.build_device(
            user,
            Arc::new(MemoryStore::new()),
            config,
            Some(authenticator as Arc<dyn Authenticator>),
        )
    }

    /// A new session on an existing device: same slot table, new process.
    pub fn reopen(&self, device: &Device) -> Device {
        self.build_device(
            device.user.as_str(),
            device.slots.clone(),
            self.config.clone(),
            None,
        )
    }

    fn build_device(
        &self,
        user: &str,
        slots: Arc<MemoryStore>,
        config: VaultConfig,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Device {
        let vault = CareVault::new(self.store.clone(), slots.clone(), config, authenticator);
        Device {
            user: UserId::from(user),
            slots,
            vault,
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// One shared store and `count` devices named `party-0`, `party-1`, ...
pub fn multi_party_fixtures(count: usize) -> (TestFixture, Vec<Device>) {
    let fixture = TestFixture::new();
    let devices = (0..count)
        .map(|i| fixture.device(&format!("party-{}", i)))
        .collect();
    (fixture, devices)
}

/// A record written by the pre-quantum client: X25519 + ChaCha20-Poly1305.
pub fn legacy_ecdh_record(owner: &UserId, plaintext: &[u8], owner_legacy: &X25519PublicKey) -> StoredRecord {
    let envelope = legacy::seal_ecdh(plaintext, owner_legacy).expect("legacy seal failed");
    legacy_record(owner, SealedPayload::LegacyEcdh(envelope))
}

/// A record written before encryption existed.
pub fn legacy_encoded_record(owner: &UserId, plaintext: &[u8]) -> StoredRecord {
    legacy_record(owner, SealedPayload::LegacyEncoded(legacy::encode_plain(plaintext)))
}

fn legacy_record(owner: &UserId, payload: SealedPayload) -> StoredRecord {
    let bytes = payload.to_bytes().expect("legacy encode failed");
    let now = now_millis();
    StoredRecord {
        record_id: RecordId::generate(),
        owner_id: owner.clone(),
        encrypted_payload: bytes.into(),
        metadata: RecordMetadata::new("legacy", "application/octet-stream"),
        created_at: now,
        updated_at: now,
    }
}
