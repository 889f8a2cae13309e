//! Storage tier abstraction.
//!
//! A tier wraps a private secret so it can rest in the local slot table.
//! Tiers differ in where the wrapping key lives: an external authenticator,
//! a device key held for the life of the process, or nowhere at all.

use async_trait::async_trait;
use bytes::Bytes;
use carevault_core::{StorageTier, UserId};
use carevault_store::SlotKey;
use zeroize::Zeroizing;

use crate::error::Result;

/// One place a private key can be kept.
///
/// `context` is authenticated by every tier that encrypts. It binds a sealed
/// blob to the user and slot it was written for, so a blob copied into
/// another slot fails to open.
#[async_trait]
pub trait KeyStorageTier: Send + Sync {
    /// Which tier this is. Recorded next to every sealed slot.
    fn kind(&self) -> StorageTier;

    /// Check the tier is usable right now.
    async fn probe(&self) -> Result<()>;

    /// Wrap `secret` for storage.
    async fn seal(&self, context: &[u8], secret: &[u8]) -> Result<Bytes>;

    /// Unwrap a blob written by `seal`.
    ///
    /// Returns [`crate::KeysError::NotAvailable`] when the blob was written
    /// by a different device or session.
    async fn unseal(&self, context: &[u8], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// Authenticated context for a slot: `user_id ‖ 0x00 ‖ slot kind ‖ slot key`.
pub(crate) fn slot_context(user: &UserId, slot: &SlotKey) -> Vec<u8> {
    let mut ctx = Vec::with_capacity(user.as_str().len() + 48);
    ctx.extend_from_slice(user.as_str().as_bytes());
    ctx.push(0);
    match slot {
        SlotKey::Kem(id) => {
            ctx.extend_from_slice(b"kem");
            ctx.extend_from_slice(id.as_bytes());
        }
        SlotKey::LegacyX25519 => ctx.extend_from_slice(b"legacy_x25519"),
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use carevault_core::KeyId;

    #[test]
    fn test_slot_context_separates_users_and_slots() {
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let kem = SlotKey::Kem(KeyId::from_bytes([7; 32]));

        assert_ne!(slot_context(&alice, &kem), slot_context(&bob, &kem));
        assert_ne!(
            slot_context(&alice, &kem),
            slot_context(&alice, &SlotKey::LegacyX25519)
        );
        assert_eq!(slot_context(&alice, &kem), slot_context(&alice, &kem));
    }
}
