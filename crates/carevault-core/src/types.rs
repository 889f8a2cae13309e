//! Strong type definitions for CareVault.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Defines a fixed-width byte identifier with hex helpers.
macro_rules! byte_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Width of the identifier in bytes.
            pub const LEN: usize = $len;

            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                let arr: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; $len] = slice.try_into()?;
                Ok(Self(arr))
            }
        }
    };
}

byte_id!(
    /// Identifier of a stored medical record.
    RecordId,
    16
);

byte_id!(
    /// Identifier of a share granted on a record.
    ShareId,
    16
);

byte_id!(
    /// Content-addressed fingerprint of a KEM public key.
    ///
    /// Computed as Blake3 derive-key over the encoded public key, so the same
    /// key always maps to the same id on every device.
    KeyId,
    32
);

impl RecordId {
    /// Generate a new random record id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl ShareId {
    /// Generate a new random share id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl KeyId {
    /// Derive the id of an encoded public key.
    pub fn derive(public_key: &[u8]) -> Self {
        Self(blake3::derive_key("carevault 2024-06 kem key id", public_key))
    }
}

/// A verified caller identity, injected by the authentication layer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_hex_roundtrip() {
        let id = RecordId::generate();
        let recovered = RecordId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_record_id_rejects_wrong_width() {
        assert!(RecordId::from_hex("abcd").is_err());
        assert!(RecordId::try_from(&[0u8; 15][..]).is_err());
    }

    #[test]
    fn test_key_id_is_content_addressed() {
        let a = KeyId::derive(b"public key a");
        let b = KeyId::derive(b"public key a");
        let c = KeyId::derive(b"public key b");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_id_debug_is_truncated() {
        let id = ShareId::from_bytes([0xab; 16]);
        assert_eq!(format!("{:?}", id), "ShareId(abababababababab)");
        assert_eq!(format!("{}", id), "ab".repeat(16));
    }

    #[test]
    fn test_user_id_serializes_as_string() {
        let user = UserId::new("patient-17");
        let json = serde_json::to_string(&user).unwrap();
        assert_eq!(json, "\"patient-17\"");
    }
}
