//! PKCS#11 hardware module
//!
//! Wraps a vendor PKCS#11 library via cryptoki. Every call into the library
//! may block on the device, so all of them run on the blocking pool.
//! Tokens are identified by the module id plus the token serial number,
//! which stays stable when a card is re-plugged into a different slot.

use super::{ModuleBackend, token_id};
use crate::error::ModuleError;
use crate::token::{CertificateInfo, KeyInfo, TokenDescriptor};
use async_trait::async_trait;
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub struct Pkcs11Module {
    module_id: String,
    library_path: PathBuf,
    force_read_only: bool,
    context: Mutex<Option<Pkcs11>>,
    /// Sessions holding a user login, keyed by token id
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

fn pkcs11_error(context: &str, e: cryptoki::error::Error) -> ModuleError {
    ModuleError::TokenOperation(format!("{}: {}", context, e))
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ModuleError> {
    mutex
        .lock()
        .map_err(|_| ModuleError::TokenOperation("PKCS#11 state lock poisoned".to_string()))
}

impl Pkcs11Module {
    pub fn new(module_id: &str, library_path: PathBuf, force_read_only: bool) -> Self {
        Self {
            module_id: module_id.to_string(),
            library_path,
            force_read_only,
            context: Mutex::new(None),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn context(&self) -> Result<Pkcs11, ModuleError> {
        lock(&self.context)?.clone().ok_or(ModuleError::NotInitialized)
    }

    async fn blocking<T, F>(f: F) -> Result<T, ModuleError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ModuleError> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| ModuleError::TokenOperation(format!("PKCS#11 task failed: {}", e)))?
    }
}

fn find_slot(pkcs11: &Pkcs11, token: &TokenDescriptor) -> Result<Slot, ModuleError> {
    let serial = token
        .serial_number
        .as_deref()
        .ok_or_else(|| ModuleError::TokenNotFound(token.id.clone()))?;
    let slots = pkcs11
        .get_slots_with_token()
        .map_err(|e| pkcs11_error("Failed to list slots", e))?;
    for slot in slots {
        let info = pkcs11
            .get_token_info(slot)
            .map_err(|e| pkcs11_error("Failed to read token info", e))?;
        if info.serial_number().trim() == serial {
            return Ok(slot);
        }
    }
    Err(ModuleError::TokenNotFound(token.id.clone()))
}

fn object_id(session: &Session, handle: ObjectHandle) -> Result<(Vec<u8>, String), ModuleError> {
    let attrs = session
        .get_attributes(handle, &[AttributeType::Id, AttributeType::Label])
        .map_err(|e| pkcs11_error("Failed to read object attributes", e))?;
    let mut id = Vec::new();
    let mut label = String::new();
    for attr in attrs {
        match attr {
            Attribute::Id(bytes) => id = bytes,
            Attribute::Label(bytes) => label = String::from_utf8_lossy(&bytes).into_owned(),
            _ => {}
        }
    }
    Ok((id, label))
}

fn read_keys(session: &Session) -> Result<Vec<KeyInfo>, ModuleError> {
    let key_handles = session
        .find_objects(&[Attribute::Class(ObjectClass::PRIVATE_KEY)])
        .map_err(|e| pkcs11_error("Failed to find private keys", e))?;

    let mut keys: Vec<(Vec<u8>, KeyInfo)> = Vec::new();
    for handle in key_handles {
        let (id, label) = object_id(session, handle)?;
        if id.is_empty() {
            debug!("Skipping private key {:?} without CKA_ID", label);
            continue;
        }
        let key = KeyInfo::new(hex::encode(&id), label);
        keys.push((id, key));
    }

    let cert_handles = session
        .find_objects(&[Attribute::Class(ObjectClass::CERTIFICATE)])
        .map_err(|e| pkcs11_error("Failed to find certificates", e))?;
    for handle in cert_handles {
        let (id, _) = object_id(session, handle)?;
        let Some((_, key)) = keys.iter_mut().find(|(key_id, _)| *key_id == id) else {
            continue;
        };
        let attrs = session
            .get_attributes(handle, &[AttributeType::Value])
            .map_err(|e| pkcs11_error("Failed to read certificate value", e))?;
        for attr in attrs {
            if let Attribute::Value(der) = attr {
                key.certificates.push(CertificateInfo::new(der));
            }
        }
    }

    Ok(keys.into_iter().map(|(_, key)| key).collect())
}

#[async_trait]
impl ModuleBackend for Pkcs11Module {
    async fn initialize(&self) -> Result<(), ModuleError> {
        let library_path = self.library_path.clone();
        let pkcs11 = Self::blocking(move || {
            let pkcs11 = Pkcs11::new(&library_path).map_err(|e| {
                ModuleError::Initialization(format!(
                    "Failed to load {}: {}",
                    library_path.display(),
                    e
                ))
            })?;
            pkcs11.initialize(CInitializeArgs::OsThreads).map_err(|e| {
                ModuleError::Initialization(format!("C_Initialize failed: {}", e))
            })?;
            Ok(pkcs11)
        })
        .await?;

        info!(
            module_id = %self.module_id,
            "Loaded PKCS#11 library {}",
            self.library_path.display()
        );
        *lock(&self.context)? = Some(pkcs11);
        Ok(())
    }

    async fn deinitialize(&self) -> Result<(), ModuleError> {
        lock(&self.sessions)?.clear();
        // Dropping the last context handle finalizes the library
        lock(&self.context)?.take();
        Ok(())
    }

    async fn list_tokens(&self) -> Result<Vec<TokenDescriptor>, ModuleError> {
        let pkcs11 = self.context()?;
        let module_id = self.module_id.clone();
        let force_read_only = self.force_read_only;

        Self::blocking(move || {
            let slots = pkcs11
                .get_slots_with_token()
                .map_err(|e| ModuleError::Listing(format!("Failed to list slots: {}", e)))?;
            let mut tokens = Vec::with_capacity(slots.len());
            for slot in slots {
                let info = pkcs11.get_token_info(slot).map_err(|e| {
                    ModuleError::Listing(format!("Failed to read token info: {}", e))
                })?;
                let serial = info.serial_number().trim().to_string();
                let mut descriptor = TokenDescriptor::new(
                    token_id(&module_id, &serial),
                    module_id.clone(),
                    info.label().trim(),
                );
                descriptor.serial_number = Some(serial);
                descriptor.read_only = force_read_only || info.write_protected();
                tokens.push(descriptor);
            }
            Ok(tokens)
        })
        .await
    }

    async fn list_keys(&self, token: &TokenDescriptor) -> Result<Vec<KeyInfo>, ModuleError> {
        let pkcs11 = self.context()?;
        let token = token.clone();
        Self::blocking(move || {
            let slot = find_slot(&pkcs11, &token)?;
            let session = pkcs11
                .open_ro_session(slot)
                .map_err(|e| pkcs11_error("Failed to open session", e))?;
            read_keys(&session)
        })
        .await
    }

    async fn login(&self, token: &TokenDescriptor, pin: &str) -> Result<(), ModuleError> {
        let pkcs11 = self.context()?;
        let token = token.clone();
        let pin = pin.to_string();
        let sessions = self.sessions.clone();
        Self::blocking(move || {
            let slot = find_slot(&pkcs11, &token)?;
            let session = pkcs11
                .open_ro_session(slot)
                .map_err(|e| pkcs11_error("Failed to open session", e))?;
            session
                .login(UserType::User, Some(&AuthPin::new(pin)))
                .map_err(|e| pkcs11_error("Login failed", e))?;
            // The login lasts as long as a session on the token stays open
            lock(&sessions)?.insert(token.id.clone(), session);
            Ok(())
        })
        .await
    }

    async fn logout(&self, token: &TokenDescriptor) -> Result<(), ModuleError> {
        let session = lock(&self.sessions)?.remove(&token.id);
        let Some(session) = session else {
            return Ok(());
        };
        let token_id = token.id.clone();
        Self::blocking(move || {
            if let Err(e) = session.logout() {
                warn!(token_id = %token_id, "PKCS#11 logout failed: {}", e);
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Token Identity ====================

    #[test]
    fn test_token_id_trims_padded_serial() {
        assert_eq!(token_id("hsm", "1234abcd        "), "hsm-1234abcd");
    }

    // ==================== Lifecycle ====================

    #[tokio::test]
    async fn test_missing_library_fails_initialization() {
        let module = Pkcs11Module::new("hsm", PathBuf::from("/nonexistent/libpkcs11.so"), false);
        assert!(matches!(
            module.initialize().await,
            Err(ModuleError::Initialization(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_before_initialize_fail() {
        let module = Pkcs11Module::new("hsm", PathBuf::from("/nonexistent/libpkcs11.so"), false);
        let token = TokenDescriptor::new("hsm-1", "hsm", "card");
        assert_eq!(module.list_tokens().await, Err(ModuleError::NotInitialized));
        assert_eq!(module.list_keys(&token).await, Err(ModuleError::NotInitialized));
        assert_eq!(
            module.login(&token, "1234").await,
            Err(ModuleError::NotInitialized)
        );
    }

    #[tokio::test]
    async fn test_logout_without_session_is_noop() {
        let module = Pkcs11Module::new("hsm", PathBuf::from("/nonexistent/libpkcs11.so"), false);
        let token = TokenDescriptor::new("hsm-1", "hsm", "card");
        assert!(module.logout(&token).await.is_ok());
        assert!(module.deinitialize().await.is_ok());
    }
}
