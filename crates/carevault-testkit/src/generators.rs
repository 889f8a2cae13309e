//! Proptest generators for property-based testing.

use bytes::Bytes;
use proptest::prelude::*;

use carevault_core::{HybridEnvelope, UserId};

/// Generate plaintext bytes of up to `max_len`.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a user id.
pub fn user_id() -> impl Strategy<Value = UserId> {
    "[a-z][a-z0-9-]{0,15}".prop_map(UserId::from)
}

/// Envelope field a tamper applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TamperTarget {
    CipherText,
    AuthTag,
    Iv,
}

/// A single bit flip somewhere in an envelope field.
#[derive(Debug, Clone, Copy)]
pub struct Tamper {
    pub target: TamperTarget,
    /// Taken modulo the field length.
    pub index: usize,
    pub bit: u8,
}

impl Tamper {
    /// Return a copy of `envelope` with one bit flipped.
    ///
    /// An empty target field is left alone; callers should seal non-empty
    /// plaintext when targeting `CipherText`.
    pub fn apply(&self, envelope: &HybridEnvelope) -> HybridEnvelope {
        let mut out = envelope.clone();
        let field = match self.target {
            TamperTarget::CipherText => &mut out.cipher_text,
            TamperTarget::AuthTag => &mut out.auth_tag,
            TamperTarget::Iv => &mut out.iv,
        };
        if !field.is_empty() {
            let mut bytes = field.to_vec();
            let i = self.index % bytes.len();
            bytes[i] ^= 1 << (self.bit % 8);
            *field = Bytes::from(bytes);
        }
        out
    }
}

/// Generate a bit flip in any authenticated envelope field.
pub fn tamper() -> impl Strategy<Value = Tamper> {
    (
        prop_oneof![
            Just(TamperTarget::CipherText),
            Just(TamperTarget::AuthTag),
            Just(TamperTarget::Iv),
        ],
        any::<usize>(),
        0u8..8,
    )
        .prop_map(|(target, index, bit)| Tamper { target, index, bit })
}
