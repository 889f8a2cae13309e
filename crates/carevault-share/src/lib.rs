//! # CareVault Share
//!
//! Record shares and their revocation.
//!
//! ## Overview
//!
//! An owner shares a record by sealing its plaintext to the recipient's
//! public key and signing what was granted. The resulting [`Share`] is never
//! mutated. Taking access back appends a [`RevocationEntry`] for the record
//! to the [`RevocationLedger`]; every share of that record is then
//! [`ShareState::Revoked`], permanently.
//!
//! Revocation stops future reads through the share. It cannot recall
//! plaintext the recipient already opened.
//!
//! [`Share`]: carevault_core::Share
//! [`RevocationEntry`]: carevault_core::RevocationEntry

pub mod error;
pub mod ledger;
pub mod share;

pub use error::{Result, ShareError};
pub use ledger::RevocationLedger;
pub use share::{attestation_message, verify_share, ShareDraft, ShareState};
