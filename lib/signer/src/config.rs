//! Module and supervisor configuration

use crate::error::SignerError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SOFTWARE_MODULE_ID: &str = "softToken";
pub const DEFAULT_KEYSTORE_DIR: &str = "/etc/signer/softtoken";

/// Backend kind of a configured module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ModuleKind {
    #[serde(rename_all = "camelCase")]
    Software { keystore_dir: PathBuf },
    #[serde(rename_all = "camelCase")]
    Hardware {
        pkcs11_library_path: PathBuf,
        #[serde(default)]
        pin_verification_per_signing: bool,
        #[serde(default)]
        batch_signing_enabled: bool,
        #[serde(default)]
        force_read_only: bool,
    },
}

/// One configured cryptographic module. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub id: String,
    #[serde(flatten)]
    pub kind: ModuleKind,
}

impl ModuleConfig {
    pub fn software(id: impl Into<String>, keystore_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind: ModuleKind::Software {
                keystore_dir: keystore_dir.into(),
            },
        }
    }

    pub fn hardware(id: impl Into<String>, pkcs11_library_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind: ModuleKind::Hardware {
                pkcs11_library_path: pkcs11_library_path.into(),
                pin_verification_per_signing: false,
                batch_signing_enabled: true,
                force_read_only: false,
            },
        }
    }

    pub fn pin_verification_per_signing(&self) -> bool {
        matches!(
            self.kind,
            ModuleKind::Hardware {
                pin_verification_per_signing: true,
                ..
            }
        )
    }

    /// Software keystores always sign in batches.
    pub fn batch_signing_enabled(&self) -> bool {
        match self.kind {
            ModuleKind::Software { .. } => true,
            ModuleKind::Hardware {
                batch_signing_enabled,
                ..
            } => batch_signing_enabled,
        }
    }

    pub fn force_read_only(&self) -> bool {
        matches!(
            self.kind,
            ModuleKind::Hardware {
                force_read_only: true,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesFile {
    pub modules: Vec<ModuleConfig>,
}

impl ModulesFile {
    pub fn parse(json: &str) -> Result<Self, SignerError> {
        let file: ModulesFile = serde_json::from_str(json)?;
        file.validate()?;
        Ok(file)
    }

    /// Load module configuration, falling back to a single software module
    /// when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, SignerError> {
        if !path.exists() {
            return Ok(Self {
                modules: vec![ModuleConfig::software(
                    DEFAULT_SOFTWARE_MODULE_ID,
                    DEFAULT_KEYSTORE_DIR,
                )],
            });
        }
        let json = std::fs::read_to_string(path)?;
        Self::parse(&json)
    }

    fn validate(&self) -> Result<(), SignerError> {
        let mut seen = HashSet::new();
        for module in &self.modules {
            if module.id.is_empty() {
                return Err(SignerError::Config("Module id must not be empty".to_string()));
            }
            if !seen.insert(module.id.as_str()) {
                return Err(SignerError::Config(format!(
                    "Duplicate module id: {}",
                    module.id
                )));
            }
        }
        Ok(())
    }
}

/// What happens to a token's registry entry when its module stops reporting it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// Flag unavailable, keep keys and certificates for warm re-insertion
    #[default]
    Retain,
    Purge,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Module reconciliation tick
    pub update_interval: Duration,
    /// Failures tolerated within `failure_window` before a worker restart
    pub max_failures: usize,
    pub failure_window: Duration,
    /// Delay before restarting a worker whose module failed to initialize
    pub restart_backoff: Duration,
    /// How long a stopping worker gets to deinitialize before it is aborted
    pub shutdown_timeout: Duration,
    pub removal_policy: RemovalPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(5),
            max_failures: 10,
            failure_window: Duration::from_secs(60),
            restart_backoff: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            removal_policy: RemovalPolicy::Retain,
        }
    }
}
