//! Plain persistent tier.
//!
//! Keeps the secret unwrapped. This is the last resort when neither an
//! authenticator nor a device key is usable; anything with read access to
//! the slot table can recover the key.

use async_trait::async_trait;
use bytes::Bytes;
use carevault_core::StorageTier;
use zeroize::Zeroizing;

use crate::error::{KeysError, Result};
use crate::tier::KeyStorageTier;

/// Stores secrets as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTier;

impl PlainTier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KeyStorageTier for PlainTier {
    fn kind(&self) -> StorageTier {
        StorageTier::PlainPersistent
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn seal(&self, _context: &[u8], secret: &[u8]) -> Result<Bytes> {
        tracing::warn!("sealing private key without wrapping");
        Ok(Bytes::copy_from_slice(secret))
    }

    async fn unseal(&self, _context: &[u8], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.is_empty() {
            return Err(KeysError::Encoding("empty plain slot".into()));
        }
        Ok(Zeroizing::new(sealed.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_round_trip() {
        let tier = PlainTier::new();
        tier.probe().await.unwrap();

        let sealed = tier.seal(b"ctx", b"secret").await.unwrap();
        assert_eq!(&sealed[..], b"secret");
        assert_eq!(&tier.unseal(b"ctx", &sealed).await.unwrap()[..], b"secret");
    }

    #[tokio::test]
    async fn test_plain_rejects_empty() {
        assert!(PlainTier::new().unseal(b"ctx", &[]).await.is_err());
    }
}
