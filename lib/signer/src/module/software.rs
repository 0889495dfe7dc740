//! Software keystore module
//!
//! A keystore directory is exposed as a single token. Layout:
//!
//! - `<key_id>.p8`: private key (PKCS#8); the file stem is the key id
//! - `<key_id>*.crt` / `<key_id>*.der`: certificates for the key, DER or PEM
//! - `<key_id>.sign` / `<key_id>.auth`: optional key usage marker
//! - `.pin`: optional SHA-256 hex digest of the token PIN

use super::{ModuleBackend, token_id};
use crate::cert::Certificate;
use crate::error::ModuleError;
use crate::token::{CertificateInfo, KeyInfo, KeyUsage, TokenDescriptor};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Id of the keystore token within its module.
pub const SOFTWARE_TOKEN_ID: &str = "0";
pub const SOFTWARE_TOKEN_LABEL: &str = "softToken";

const PIN_FILE: &str = ".pin";

pub struct SoftwareModule {
    module_id: String,
    token_id: String,
    keystore_dir: PathBuf,
    initialized: AtomicBool,
}

impl SoftwareModule {
    pub fn new(module_id: &str, keystore_dir: PathBuf) -> Self {
        Self {
            module_id: module_id.to_string(),
            token_id: token_id(module_id, SOFTWARE_TOKEN_ID),
            keystore_dir,
            initialized: AtomicBool::new(false),
        }
    }

    fn ensure_initialized(&self) -> Result<(), ModuleError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ModuleError::NotInitialized)
        }
    }

    fn ensure_token(&self, token: &TokenDescriptor) -> Result<(), ModuleError> {
        if token.id == self.token_id && token.module_id == self.module_id {
            Ok(())
        } else {
            Err(ModuleError::TokenNotFound(token.id.clone()))
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ModuleError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, ModuleError> + Send + 'static,
    {
        let dir = self.keystore_dir.clone();
        tokio::task::spawn_blocking(move || f(&dir))
            .await
            .map_err(|e| ModuleError::TokenOperation(format!("Keystore task failed: {}", e)))?
    }
}

#[async_trait]
impl ModuleBackend for SoftwareModule {
    async fn initialize(&self) -> Result<(), ModuleError> {
        match tokio::fs::metadata(&self.keystore_dir).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(ModuleError::Initialization(format!(
                    "Keystore path {} is not a directory",
                    self.keystore_dir.display()
                )));
            }
            Ok(_) => {}
            // The directory may appear later, e.g. when a volume is mounted
            Err(e) => debug!(
                module_id = %self.module_id,
                "Keystore directory {} not accessible yet: {}",
                self.keystore_dir.display(),
                e
            ),
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn deinitialize(&self) -> Result<(), ModuleError> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tokens(&self) -> Result<Vec<TokenDescriptor>, ModuleError> {
        self.ensure_initialized()?;
        let present = self.blocking(|dir| Ok(dir.is_dir())).await?;
        if !present {
            return Ok(Vec::new());
        }
        Ok(vec![TokenDescriptor::new(
            self.token_id.clone(),
            self.module_id.clone(),
            SOFTWARE_TOKEN_LABEL,
        )])
    }

    async fn list_keys(&self, token: &TokenDescriptor) -> Result<Vec<KeyInfo>, ModuleError> {
        self.ensure_initialized()?;
        self.ensure_token(token)?;
        self.blocking(scan_keystore).await
    }

    async fn login(&self, token: &TokenDescriptor, pin: &str) -> Result<(), ModuleError> {
        self.ensure_initialized()?;
        self.ensure_token(token)?;
        let pin = pin.to_string();
        self.blocking(move |dir| verify_pin(dir, &pin)).await
    }

    async fn logout(&self, token: &TokenDescriptor) -> Result<(), ModuleError> {
        self.ensure_token(token)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ModuleError {
    ModuleError::TokenOperation(format!("Failed to read {}: {}", path.display(), e))
}

fn verify_pin(dir: &Path, pin: &str) -> Result<(), ModuleError> {
    let path = dir.join(PIN_FILE);
    let expected = match std::fs::read_to_string(&path) {
        Ok(contents) => contents.trim().to_lowercase(),
        // No PIN configured for this keystore
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_error(&path, e)),
    };

    let actual = hex::encode(Sha256::digest(pin.as_bytes()));
    if actual == expected {
        Ok(())
    } else {
        Err(ModuleError::TokenOperation("PIN incorrect".to_string()))
    }
}

fn scan_keystore(dir: &Path) -> Result<Vec<KeyInfo>, ModuleError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        if entry.path().is_file()
            && let Some(name) = entry.file_name().to_str()
        {
            files.push(name.to_string());
        }
    }
    files.sort();

    let mut keys: Vec<KeyInfo> = files
        .iter()
        .filter_map(|name| name.strip_suffix(".p8"))
        .filter(|id| !id.is_empty())
        .map(|id| {
            let mut key = KeyInfo::new(id, id);
            key.usage = key_usage(&files, id);
            key
        })
        .collect();

    for name in &files {
        let Some(stem) = name
            .strip_suffix(".crt")
            .or_else(|| name.strip_suffix(".der"))
        else {
            continue;
        };
        // Longest key id prefix wins, so `ab-1.crt` belongs to `ab`, not `a`
        let Some(key) = keys
            .iter_mut()
            .filter(|k| stem.starts_with(k.id.as_str()))
            .max_by_key(|k| k.id.len())
        else {
            debug!("Ignoring certificate {} without a matching key", name);
            continue;
        };

        let path = dir.join(name);
        let bytes = std::fs::read(&path).map_err(|e| io_error(&path, e))?;
        match Certificate::from_bytes(&bytes) {
            Ok(cert) => key.certificates.push(CertificateInfo::new(cert.der().to_vec())),
            Err(e) => warn!("Skipping unreadable certificate {}: {}", path.display(), e),
        }
    }

    Ok(keys)
}

fn key_usage(files: &[String], key_id: &str) -> Option<KeyUsage> {
    let has = |suffix: &str| files.iter().any(|f| *f == format!("{}.{}", key_id, suffix));
    if has("sign") {
        Some(KeyUsage::Signing)
    } else if has("auth") {
        Some(KeyUsage::Authentication)
    } else {
        None
    }
}
