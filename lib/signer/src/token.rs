//! Token, key and certificate records held by the registry.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A token as reported by one module listing pass.
///
/// The `id` is derived from module-reported identity and is stable across
/// restarts, so a re-plugged token maps back onto its previous registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDescriptor {
    pub id: String,
    pub module_id: String,
    pub label: String,
    pub serial_number: Option<String>,
    pub read_only: bool,
}

impl TokenDescriptor {
    pub fn new(id: impl Into<String>, module_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module_id: module_id.into(),
            label: label.into(),
            serial_number: None,
            read_only: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyUsage {
    Signing,
    Authentication,
}

/// Trust status of a certificate, refreshed from OCSP verification results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertificateStatus {
    #[default]
    Unchecked,
    Good,
    Revoked,
    Unknown,
    Unverifiable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    /// Hex SHA-256 of the DER encoding
    pub id: String,
    #[serde(with = "hex_bytes")]
    pub der: Vec<u8>,
    pub status: CertificateStatus,
}

impl CertificateInfo {
    pub fn new(der: Vec<u8>) -> Self {
        Self {
            id: hex::encode(Sha256::digest(&der)),
            der,
            status: CertificateStatus::Unchecked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub id: String,
    pub label: String,
    pub usage: Option<KeyUsage>,
    pub certificates: Vec<CertificateInfo>,
}

impl KeyInfo {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            usage: None,
            certificates: Vec::new(),
        }
    }
}

/// Live registry record for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub id: String,
    pub module_id: String,
    pub label: String,
    pub serial_number: Option<String>,
    pub read_only: bool,
    pub available: bool,
    /// PIN has been verified for this token
    pub active: bool,
    pub pin_verification_per_signing: bool,
    pub batch_signing_enabled: bool,
    pub keys: Vec<KeyInfo>,
}

impl TokenInfo {
    pub fn key(&self, key_id: &str) -> Option<&KeyInfo> {
        self.keys.iter().find(|k| k.id == key_id)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
