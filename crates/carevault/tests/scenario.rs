//! End-to-end scenarios across owner and recipient devices.

use std::sync::Arc;

use carevault::core::{cipher, CoreError, Marker, RecordMetadata, SealedPayload, ShareId, UserId};
use carevault::store::{InsertResult, KeySlotStore, MemoryStore, SqliteStore, Store};
use carevault::{CareVault, ErrorClass, ShareState, StorageTier, VaultConfig, VaultError};
use carevault_testkit::fixtures::TEST_RP_ID;
use carevault_testkit::{
    init_tracing, legacy_ecdh_record, legacy_encoded_record, multi_party_fixtures,
    SoftAuthenticator, TestFixture,
};

fn bp() -> RecordMetadata {
    RecordMetadata::new("blood pressure", "text/plain")
}

// ─────────────────────────────────────────────────────────────────────────────
// Sharing and Revocation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_blood_pressure_share_and_revoke() {
    init_tracing();
    let (_clinic, parties) = multi_party_fixtures(2);
    let (alice, bob) = (&parties[0], &parties[1]);
    bob.vault.ensure_keys(&bob.user).await.unwrap();

    let record = alice
        .vault
        .store_record(&alice.user, b"BP 120/80", bp())
        .await
        .unwrap();

    let share = alice
        .vault
        .share_record(&record.record_id, &alice.user, &bob.user)
        .await
        .unwrap();
    assert_eq!(share.owner_id, alice.user);
    assert_eq!(share.recipient_id, bob.user);

    assert_eq!(
        bob.vault.open_share(&share.share_id, &bob.user).await.unwrap(),
        b"BP 120/80"
    );
    assert_eq!(
        bob.vault.share_status(&share.share_id, &bob.user).await.unwrap(),
        ShareState::Active
    );

    let entry = alice
        .vault
        .revoke_share(&record.record_id, &alice.user, "changed provider")
        .await
        .unwrap();
    assert_eq!(entry.revoked_by, alice.user);
    assert_eq!(entry.reason, "changed provider");

    // Revocation holds on every attempt, not just the first.
    for _ in 0..4 {
        let err = bob
            .vault
            .open_share(&share.share_id, &bob.user)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::ShareRevoked(id) if id == share.share_id));
    }
    assert_eq!(
        bob.vault.share_status(&share.share_id, &bob.user).await.unwrap(),
        ShareState::Revoked
    );

    // Fresh recipient keys do not reopen it.
    bob.vault.rotate_keys(&bob.user).await.unwrap();
    bob.vault.ensure_keys(&bob.user).await.unwrap();
    for _ in 0..2 {
        let err = bob
            .vault
            .open_share(&share.share_id, &bob.user)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::ShareRevoked(id) if id == share.share_id));
    }

    // The owner still reads their own record.
    assert_eq!(
        alice
            .vault
            .read_record(&record.record_id, &alice.user)
            .await
            .unwrap(),
        b"BP 120/80"
    );
}

#[tokio::test]
async fn test_revocation_is_idempotent_failure() {
    let (_clinic, parties) = multi_party_fixtures(2);
    let (alice, bob) = (&parties[0], &parties[1]);
    bob.vault.ensure_keys(&bob.user).await.unwrap();

    let record = alice.vault.store_record(&alice.user, b"x", bp()).await.unwrap();
    alice
        .vault
        .share_record(&record.record_id, &alice.user, &bob.user)
        .await
        .unwrap();

    alice
        .vault
        .revoke_share(&record.record_id, &alice.user, "first")
        .await
        .unwrap();
    let err = alice
        .vault
        .revoke_share(&record.record_id, &alice.user, "second")
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::AlreadyRevoked(_)));
    assert_eq!(err.class(), ErrorClass::Business);

    // The first reason is kept.
    let entry = alice
        .vault
        .ledger()
        .entry_for(&record.record_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.reason, "first");

    // A revoked record cannot be shared again.
    let err = alice
        .vault
        .share_record(&record.record_id, &alice.user, &bob.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::AlreadyRevoked(_)));
}

#[tokio::test]
async fn test_only_owner_revokes() {
    let (_clinic, parties) = multi_party_fixtures(2);
    let (alice, bob) = (&parties[0], &parties[1]);
    let record = alice.vault.store_record(&alice.user, b"x", bp()).await.unwrap();

    let err = bob
        .vault
        .revoke_share(&record.record_id, &bob.user, "not mine")
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NotAuthorized(_)));
    assert!(!alice.vault.ledger().is_revoked(&record.record_id).await.unwrap());
}

#[tokio::test]
async fn test_sharing_isolation() {
    let (_clinic, parties) = multi_party_fixtures(3);
    let (alice, bob, carol) = (&parties[0], &parties[1], &parties[2]);
    bob.vault.ensure_keys(&bob.user).await.unwrap();
    carol.vault.ensure_keys(&carol.user).await.unwrap();

    let record = alice
        .vault
        .store_record(&alice.user, b"for bob only", bp())
        .await
        .unwrap();
    let share = alice
        .vault
        .share_record(&record.record_id, &alice.user, &bob.user)
        .await
        .unwrap();

    // Carol is not the recipient.
    let err = carol
        .vault
        .open_share(&share.share_id, &carol.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NotAuthorized(_)));

    // Nor can she decrypt the envelope with her own key.
    let carol_key = carol
        .vault
        .keys()
        .resolve_private_key_reference(&carol.user)
        .await
        .unwrap();
    assert!(cipher::decrypt(&share.envelope, &carol_key).is_err());

    // Nor read Alice's record.
    let err = carol
        .vault
        .read_record(&record.record_id, &carol.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NotAuthorized(_)));
}

#[tokio::test]
async fn test_recipient_without_keys() {
    let (_clinic, parties) = multi_party_fixtures(2);
    let (alice, bob) = (&parties[0], &parties[1]);
    let record = alice.vault.store_record(&alice.user, b"x", bp()).await.unwrap();

    let err = alice
        .vault
        .share_record(&record.record_id, &alice.user, &bob.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::RecipientKeyUnavailable(ref u) if u == &bob.user));
    assert_eq!(err.class(), ErrorClass::Recoverable);
}

#[tokio::test]
async fn test_self_share_rejected() {
    let (_clinic, parties) = multi_party_fixtures(1);
    let alice = &parties[0];
    let record = alice.vault.store_record(&alice.user, b"x", bp()).await.unwrap();

    let err = alice
        .vault
        .share_record(&record.record_id, &alice.user, &alice.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NotAuthorized(_)));
}

#[tokio::test]
async fn test_duplicate_share_rejected() {
    let (_clinic, parties) = multi_party_fixtures(2);
    let (alice, bob) = (&parties[0], &parties[1]);
    bob.vault.ensure_keys(&bob.user).await.unwrap();
    let record = alice.vault.store_record(&alice.user, b"x", bp()).await.unwrap();

    let first = alice
        .vault
        .share_record(&record.record_id, &alice.user, &bob.user)
        .await
        .unwrap();
    let err = alice
        .vault
        .share_record(&record.record_id, &alice.user, &bob.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::DuplicateShare { existing } if existing == first.share_id));
}

#[tokio::test]
async fn test_concurrent_shares_yield_one() {
    let fixture = TestFixture::new();
    let alice = Arc::new(fixture.device("alice"));
    let bob = fixture.device("bob");
    bob.vault.ensure_keys(&bob.user).await.unwrap();
    let record = alice.vault.store_record(&alice.user, b"x", bp()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let alice = alice.clone();
        let bob_id = bob.user.clone();
        let record_id = record.record_id;
        handles.push(tokio::spawn(async move {
            alice
                .vault
                .share_record(&record_id, &alice.user, &bob_id)
                .await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(VaultError::DuplicateShare { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(fixture.store.shares_for_record(&record.record_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_forged_attestation_rejected() {
    let (clinic, parties) = multi_party_fixtures(2);
    let (alice, bob) = (&parties[0], &parties[1]);
    bob.vault.ensure_keys(&bob.user).await.unwrap();

    let first = alice.vault.store_record(&alice.user, b"one", bp()).await.unwrap();
    let second = alice.vault.store_record(&alice.user, b"two", bp()).await.unwrap();
    let share = alice
        .vault
        .share_record(&first.record_id, &alice.user, &bob.user)
        .await
        .unwrap();

    // Replay the signed grant against a different record.
    let mut forged = share.clone();
    forged.share_id = ShareId::generate();
    forged.record_id = second.record_id;
    assert_eq!(
        clinic.store.insert_share(&forged).await.unwrap(),
        InsertResult::Inserted
    );

    let err = bob
        .vault
        .open_share(&forged.share_id, &bob.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidAttestation));
    assert_eq!(err.class(), ErrorClass::Bug);
}

#[tokio::test]
async fn test_share_listings() {
    let (_clinic, parties) = multi_party_fixtures(3);
    let (alice, bob, carol) = (&parties[0], &parties[1], &parties[2]);
    bob.vault.ensure_keys(&bob.user).await.unwrap();
    carol.vault.ensure_keys(&carol.user).await.unwrap();

    let a = alice.vault.store_record(&alice.user, b"a", bp()).await.unwrap();
    let b = alice.vault.store_record(&alice.user, b"b", bp()).await.unwrap();
    for recipient in [&bob.user, &carol.user] {
        alice
            .vault
            .share_record(&a.record_id, &alice.user, recipient)
            .await
            .unwrap();
    }
    alice
        .vault
        .share_record(&b.record_id, &alice.user, &bob.user)
        .await
        .unwrap();
    alice
        .vault
        .revoke_share(&a.record_id, &alice.user, "done")
        .await
        .unwrap();

    let for_a = alice
        .vault
        .shares_for_record(&a.record_id, &alice.user)
        .await
        .unwrap();
    assert_eq!(for_a.len(), 2);
    assert!(for_a.iter().all(|(_, state)| *state == ShareState::Revoked));

    let for_bob = bob.vault.shares_for_recipient(&bob.user).await.unwrap();
    assert_eq!(for_bob.len(), 2);
    let active: Vec<_> = for_bob
        .iter()
        .filter(|(_, state)| state.is_readable())
        .map(|(share, _)| share.record_id)
        .collect();
    assert_eq!(active, vec![b.record_id]);

    let err = bob
        .vault
        .shares_for_record(&a.record_id, &bob.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NotAuthorized(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Legacy Payloads
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_legacy_ecdh_record_reads_and_reseals() {
    let fixture = TestFixture::new();
    let alice = fixture.device("alice");

    let legacy_secret = [42u8; 32];
    let legacy_public = carevault::core::X25519StaticSecret::from_bytes(legacy_secret).public_key();
    alice
        .vault
        .import_legacy_secret(&alice.user, &legacy_secret)
        .await
        .unwrap();

    let record = legacy_ecdh_record(&alice.user, b"2021 allergy list", &legacy_public);
    fixture.store.insert_record(&record).await.unwrap();

    assert_eq!(
        alice
            .vault
            .read_record(&record.record_id, &alice.user)
            .await
            .unwrap(),
        b"2021 allergy list"
    );

    assert!(alice
        .vault
        .reseal_record(&record.record_id, &alice.user)
        .await
        .unwrap());
    let stored = fixture.store.get_record(&record.record_id).await.unwrap().unwrap();
    assert_eq!(Marker::detect(&stored.encrypted_payload), Marker::Hybrid);
    assert_eq!(
        alice
            .vault
            .read_record(&record.record_id, &alice.user)
            .await
            .unwrap(),
        b"2021 allergy list"
    );
}

#[tokio::test]
async fn test_legacy_ecdh_without_secret_is_key_unavailable() {
    let fixture = TestFixture::new();
    let alice = fixture.device("alice");
    let other = carevault::core::X25519StaticSecret::from_bytes([9u8; 32]).public_key();

    let record = legacy_ecdh_record(&alice.user, b"x", &other);
    fixture.store.insert_record(&record).await.unwrap();

    let err = alice
        .vault
        .read_record(&record.record_id, &alice.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::KeyUnavailable(_)));
}

#[tokio::test]
async fn test_unencrypted_legacy_follows_config() {
    let fixture = TestFixture::new();
    let alice = fixture.device("alice");
    let record = legacy_encoded_record(&alice.user, b"2016 vaccination");
    fixture.store.insert_record(&record).await.unwrap();

    assert_eq!(
        alice
            .vault
            .read_record(&record.record_id, &alice.user)
            .await
            .unwrap(),
        b"2016 vaccination"
    );

    let strict = TestFixture::with_config(VaultConfig {
        accept_unencrypted_legacy: false,
        ..fixture.config.clone()
    });
    let alice_strict = strict.device("alice");
    strict.store.insert_record(&record).await.unwrap();
    let err = alice_strict
        .vault
        .read_record(&record.record_id, &alice_strict.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::UndecryptableRecord(_)));
}

#[tokio::test]
async fn test_current_payload_never_reaches_legacy_strategies() {
    let fixture = TestFixture::new();
    let alice = fixture.device("alice");
    let record = alice.vault.store_record(&alice.user, b"x", bp()).await.unwrap();

    let outcome = alice
        .vault
        .codec()
        .open_detailed(&record.encrypted_payload, &alice.user)
        .await
        .unwrap();
    assert_eq!(outcome.strategy, "hybrid");

    // Corrupt the tag: the hybrid strategy fails and nothing else is tried.
    let mut envelope = match SealedPayload::from_bytes(&record.encrypted_payload).unwrap() {
        SealedPayload::Hybrid(env) => env,
        other => panic!("unexpected payload {:?}", other),
    };
    let mut tag = envelope.auth_tag.to_vec();
    tag[0] ^= 0x80;
    envelope.auth_tag = tag.into();
    let raw = SealedPayload::from(envelope).to_bytes().unwrap();

    let err = alice
        .vault
        .open_for_owner(&raw, &alice.user)
        .await
        .unwrap_err();
    match err {
        VaultError::UndecryptableRecord(msg) => {
            assert!(msg.contains("hybrid"));
            assert!(!msg.contains("legacy"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keys
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_wrong_length_public_key_is_key_format() {
    let err: VaultError = cipher::encrypt(b"x", &[0u8; 32]).unwrap_err().into();
    assert!(matches!(err, VaultError::KeyFormat { actual: 32, .. }));

    assert!(matches!(
        cipher::encrypt(b"x", &[0u8; 0]),
        Err(CoreError::KeyFormat { actual: 0, .. })
    ));
}

#[tokio::test]
async fn test_hardware_tier_preferred_when_present() {
    let fixture = TestFixture::new();
    let authenticator = Arc::new(SoftAuthenticator::new(TEST_RP_ID));
    let alice = fixture.device_with_authenticator("alice", authenticator.clone());

    let record = alice
        .vault
        .store_record(&alice.user, b"hw sealed", bp())
        .await
        .unwrap();
    let key = alice.vault.get_public_key(&alice.user).await.unwrap();
    assert_eq!(key.storage_tier, StorageTier::Hardware);
    assert_eq!(authenticator.credential_count(), 1);

    let slots = alice.slots.list_slots(&alice.user).await.unwrap();
    assert!(slots.iter().all(|s| s.tier == StorageTier::Hardware));

    assert_eq!(
        alice
            .vault
            .read_record(&record.record_id, &alice.user)
            .await
            .unwrap(),
        b"hw sealed"
    );
}

#[tokio::test]
async fn test_forged_authenticator_falls_through() {
    let fixture = TestFixture::new();
    let authenticator = Arc::new(SoftAuthenticator::new(TEST_RP_ID));
    authenticator.set_forge_signature(true);
    let alice = fixture.device_with_authenticator("alice", authenticator);

    alice.vault.ensure_keys(&alice.user).await.unwrap();
    let key = alice.vault.get_public_key(&alice.user).await.unwrap();
    assert_eq!(key.storage_tier, StorageTier::SoftwareAsymmetric);
}

#[tokio::test]
async fn test_unplugged_authenticator_falls_through() {
    let fixture = TestFixture::new();
    let authenticator = Arc::new(SoftAuthenticator::new(TEST_RP_ID));
    authenticator.set_available(false);
    let alice = fixture.device_with_authenticator("alice", authenticator);

    alice.vault.ensure_keys(&alice.user).await.unwrap();
    let key = alice.vault.get_public_key(&alice.user).await.unwrap();
    assert_eq!(key.storage_tier, StorageTier::SoftwareAsymmetric);
}

#[tokio::test]
async fn test_clearing_keys_is_permanent_loss() {
    let fixture = TestFixture::new();
    let alice = fixture.device("alice");
    let record = alice.vault.store_record(&alice.user, b"x", bp()).await.unwrap();

    assert!(alice.vault.clear_keys(&alice.user).await.unwrap() >= 1);
    let err = alice
        .vault
        .read_record(&record.record_id, &alice.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::KeyUnavailable(_)));
    assert_eq!(err.class(), ErrorClass::Recoverable);
}

#[tokio::test]
async fn test_new_session_regenerates_software_key() {
    let fixture = TestFixture::new();
    let alice = fixture.device("alice");
    let old_record = alice.vault.store_record(&alice.user, b"old", bp()).await.unwrap();
    let old_key = alice.vault.get_public_key(&alice.user).await.unwrap();

    // The software device key lives only as long as the process.
    let restarted = fixture.reopen(&alice);
    let (new_public, usable) = restarted.vault.ensure_keys(&alice.user).await.unwrap();
    assert!(usable);
    assert_ne!(new_public.key_id(), old_key.key_id);

    let err = restarted
        .vault
        .read_record(&old_record.record_id, &alice.user)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::KeyUnavailable(_)));

    let fresh = restarted
        .vault
        .store_record(&alice.user, b"new", bp())
        .await
        .unwrap();
    assert_eq!(
        restarted
            .vault
            .read_record(&fresh.record_id, &alice.user)
            .await
            .unwrap(),
        b"new"
    );
}

#[tokio::test]
async fn test_plain_tier_survives_restart() {
    let fixture = TestFixture::with_config(VaultConfig {
        tier_order: vec![StorageTier::PlainPersistent],
        ..Default::default()
    });
    let alice = fixture.device("alice");
    let record = alice.vault.store_record(&alice.user, b"kept", bp()).await.unwrap();

    let restarted = fixture.reopen(&alice);
    assert_eq!(
        restarted
            .vault
            .read_record(&record.record_id, &alice.user)
            .await
            .unwrap(),
        b"kept"
    );
}

#[tokio::test]
async fn test_rotation_keeps_old_shares_open() {
    let (_clinic, parties) = multi_party_fixtures(2);
    let (alice, bob) = (&parties[0], &parties[1]);
    bob.vault.ensure_keys(&bob.user).await.unwrap();

    let record = alice.vault.store_record(&alice.user, b"x", bp()).await.unwrap();
    let share = alice
        .vault
        .share_record(&record.record_id, &alice.user, &bob.user)
        .await
        .unwrap();

    // Both sides rotate; the share still verifies and decrypts.
    alice.vault.rotate_keys(&alice.user).await.unwrap();
    bob.vault.rotate_keys(&bob.user).await.unwrap();
    assert_eq!(
        bob.vault.open_share(&share.share_id, &bob.user).await.unwrap(),
        b"x"
    );
}

#[tokio::test]
async fn test_payload_limit() {
    let fixture = TestFixture::with_config(VaultConfig {
        tier_order: vec![StorageTier::SoftwareAsymmetric],
        max_plaintext_bytes: 8,
        ..Default::default()
    });
    let alice = fixture.device("alice");

    let err = alice
        .vault
        .store_record(&alice.user, &[0u8; 9], bp())
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::PayloadTooLarge { size: 9, limit: 8 }));
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sqlite_backed_vaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let config = VaultConfig {
        tier_order: vec![StorageTier::SoftwareAsymmetric],
        ..Default::default()
    };

    let alice = UserId::from("alice");
    let bob = UserId::from("bob");
    let alice_vault = CareVault::new(
        store.clone(),
        Arc::new(MemoryStore::new()),
        config.clone(),
        None,
    );
    let bob_vault = CareVault::new(store.clone(), Arc::new(MemoryStore::new()), config, None);
    bob_vault.ensure_keys(&bob).await.unwrap();

    let record = alice_vault.store_record(&alice, b"BP 118/76", bp()).await.unwrap();
    let share = alice_vault
        .share_record(&record.record_id, &alice, &bob)
        .await
        .unwrap();
    assert_eq!(
        bob_vault.open_share(&share.share_id, &bob).await.unwrap(),
        b"BP 118/76"
    );

    alice_vault
        .revoke_share(&record.record_id, &alice, "moved")
        .await
        .unwrap();
    assert!(matches!(
        bob_vault.open_share(&share.share_id, &bob).await.unwrap_err(),
        VaultError::ShareRevoked(_)
    ));

    // Everything the server holds is ciphertext.
    drop(alice_vault);
    drop(bob_vault);
    drop(store);
    let reopened = SqliteStore::open(&path).unwrap();
    let stored = reopened.get_record(&record.record_id).await.unwrap().unwrap();
    assert!(!stored
        .encrypted_payload
        .windows(b"118/76".len())
        .any(|w| w == b"118/76"));
    assert!(reopened.get_revocation(&record.record_id).await.unwrap().is_some());
}
