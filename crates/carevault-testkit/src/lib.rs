//! # CareVault Testkit
//!
//! Testing utilities for CareVault.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a shared server store with one device per user
//! - **Soft authenticator**: an in-process [`Authenticator`] with fault knobs
//! - **Legacy builders**: records in every historical payload format
//! - **Generators**: proptest strategies for plaintexts and tampering
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use carevault_testkit::fixtures::multi_party_fixtures;
//!
//! async fn example() {
//!     let (clinic, parties) = multi_party_fixtures(2);
//!     let (alice, bob) = (&parties[0], &parties[1]);
//!     bob.vault.ensure_keys(&bob.user).await.unwrap();
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use carevault_testkit::generators::plaintext;
//!
//! proptest! {
//!     #[test]
//!     fn roundtrip(data in plaintext(512)) {
//!         // seal, open, compare
//!     }
//! }
//! ```
//!
//! [`Authenticator`]: carevault_keys::Authenticator

pub mod fixtures;
pub mod generators;

pub use carevault_keys::testing::{SoftAuthenticator, SOFT_AAGUID};
pub use fixtures::{legacy_ecdh_record, legacy_encoded_record, multi_party_fixtures, Device, TestFixture};
pub use generators::{plaintext, tamper, Tamper, TamperTarget};

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; output goes through the test harness capture.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
