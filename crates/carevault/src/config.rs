//! Vault configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use carevault_core::StorageTier;
use carevault_keys::KeyVaultConfig;

/// Configuration for a [`crate::CareVault`].
///
/// Every field has a default, so a JSON document only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Storage tiers to try for new keys, best first.
    pub tier_order: Vec<StorageTier>,

    /// Bound on each tier probe, seal and unseal, in milliseconds.
    pub tier_probe_timeout_ms: u64,

    /// Generate a new key when the active one cannot be resolved here.
    pub regenerate_on_unavailable: bool,

    /// Read records written before encryption existed.
    pub accept_unencrypted_legacy: bool,

    /// Largest plaintext accepted for sealing.
    pub max_plaintext_bytes: usize,

    /// Relying party id checked in authenticator attestations.
    pub relying_party_id: String,

    /// Keep resolved private keys in memory.
    pub cache_private_keys: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            tier_order: vec![
                StorageTier::Hardware,
                StorageTier::SoftwareAsymmetric,
                StorageTier::PlainPersistent,
            ],
            tier_probe_timeout_ms: 2000,
            regenerate_on_unavailable: true,
            accept_unencrypted_legacy: true,
            max_plaintext_bytes: 16 * 1024 * 1024,
            relying_party_id: "localhost".to_string(),
            cache_private_keys: true,
        }
    }
}

impl VaultConfig {
    /// Parse from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading vault config {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing vault config {}", path.display()))
    }

    pub fn tier_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.tier_probe_timeout_ms)
    }

    /// The part of the configuration the key vault consumes.
    pub fn key_vault_config(&self) -> KeyVaultConfig {
        KeyVaultConfig {
            tier_order: self.tier_order.clone(),
            probe_timeout: self.tier_probe_timeout(),
            relying_party_id: self.relying_party_id.clone(),
            cache_private_keys: self.cache_private_keys,
            regenerate_on_unavailable: self.regenerate_on_unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = VaultConfig::from_json(
            r#"{ "tier_order": ["software_asymmetric"], "accept_unencrypted_legacy": false }"#,
        )
        .unwrap();

        assert_eq!(config.tier_order, vec![StorageTier::SoftwareAsymmetric]);
        assert!(!config.accept_unencrypted_legacy);
        assert_eq!(config.tier_probe_timeout_ms, 2000);
        assert!(config.regenerate_on_unavailable);
    }

    #[test]
    fn test_unknown_tier_rejected() {
        assert!(VaultConfig::from_json(r#"{ "tier_order": ["tpm"] }"#).is_err());
    }

    #[test]
    fn test_key_vault_config_follows() {
        let config = VaultConfig {
            tier_probe_timeout_ms: 50,
            relying_party_id: "clinic.example".into(),
            ..Default::default()
        };
        let kv = config.key_vault_config();
        assert_eq!(kv.probe_timeout, Duration::from_millis(50));
        assert_eq!(kv.relying_party_id, "clinic.example");
        assert_eq!(kv.tier_order, config.tier_order);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_plaintext_bytes": 1024 }}"#).unwrap();

        let config = VaultConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_plaintext_bytes, 1024);

        let err = VaultConfig::from_file("/nonexistent/vault.json").unwrap_err();
        assert!(err.to_string().contains("reading vault config"));
    }
}
