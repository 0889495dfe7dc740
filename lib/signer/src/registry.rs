//! Token Registry
//!
//! Process-wide map from token id to the live token record. Module and token
//! workers are the only writers; signing and API code paths read clones.
//!
//! Every operation takes the lock for a single map operation only. Module I/O
//! happens before the call, so readers never wait on hardware.

use crate::config::ModuleConfig;
use crate::token::{CertificateStatus, KeyInfo, TokenDescriptor, TokenInfo};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Default)]
pub struct TokenRegistry {
    tokens: Arc<RwLock<HashMap<String, TokenInfo>>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections only swap map entries, so a poisoned lock still
    // guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TokenInfo>> {
        self.tokens.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TokenInfo>> {
        self.tokens.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, token_id: &str) -> Option<TokenInfo> {
        self.read().get(token_id).cloned()
    }

    pub fn upsert(&self, token: TokenInfo) {
        self.write().insert(token.id.clone(), token);
    }

    pub fn remove(&self, token_id: &str) -> Option<TokenInfo> {
        self.write().remove(token_id)
    }

    /// Returns false if the token is not in the registry.
    pub fn set_available(&self, token_id: &str, available: bool) -> bool {
        match self.write().get_mut(token_id) {
            Some(token) => {
                token.available = available;
                if !available {
                    token.active = false;
                }
                true
            }
            None => false,
        }
    }

    pub fn set_active(&self, token_id: &str, active: bool) -> bool {
        match self.write().get_mut(token_id) {
            Some(token) => {
                token.active = active;
                true
            }
            None => false,
        }
    }

    /// Create a fresh record for a newly discovered token, replacing any
    /// previous one.
    pub fn create_token(&self, descriptor: &TokenDescriptor, module: &ModuleConfig) -> TokenInfo {
        let token = new_record(descriptor, module);
        self.upsert(token.clone());
        token
    }

    /// Recover the known record for a (re)discovered token, or create one.
    ///
    /// A recovered record is flagged available again and keeps its keys and
    /// certificate statuses; only the module-reported identity fields are refreshed.
    /// Returns `None` if the id is already owned by another module.
    pub fn get_or_create(
        &self,
        descriptor: &TokenDescriptor,
        module: &ModuleConfig,
    ) -> Option<TokenInfo> {
        let mut tokens = self.write();
        if let Some(token) = tokens.get_mut(&descriptor.id) {
            if token.module_id != descriptor.module_id {
                return None;
            }
            token.available = true;
            token.label = descriptor.label.clone();
            token.serial_number = descriptor.serial_number.clone();
            token.read_only = descriptor.read_only || module.force_read_only();
            return Some(token.clone());
        }
        let token = new_record(descriptor, module);
        tokens.insert(token.id.clone(), token.clone());
        Some(token)
    }

    /// Replace the key list of a token with a fresh listing.
    ///
    /// Keys are matched by id, so applying the same listing twice yields the
    /// same record. Statuses of certificates already known for a key are
    /// carried over. Returns false if the token is not in the registry.
    pub fn update_keys(&self, token_id: &str, keys: Vec<KeyInfo>) -> bool {
        let mut tokens = self.write();
        let Some(token) = tokens.get_mut(token_id) else {
            return false;
        };

        let mut merged: Vec<KeyInfo> = Vec::with_capacity(keys.len());
        for mut key in keys {
            if let Some(previous) = token.key(&key.id) {
                for cert in &mut key.certificates {
                    if let Some(known) = previous.certificates.iter().find(|c| c.id == cert.id) {
                        cert.status = known.status;
                    }
                }
            }
            match merged.iter_mut().find(|k| k.id == key.id) {
                Some(existing) => *existing = key,
                None => merged.push(key),
            }
        }
        token.keys = merged;
        true
    }

    pub fn set_certificate_status(
        &self,
        token_id: &str,
        key_id: &str,
        cert_id: &str,
        status: CertificateStatus,
    ) -> bool {
        let mut tokens = self.write();
        let cert = tokens
            .get_mut(token_id)
            .and_then(|t| t.keys.iter_mut().find(|k| k.id == key_id))
            .and_then(|k| k.certificates.iter_mut().find(|c| c.id == cert_id));
        match cert {
            Some(cert) => {
                cert.status = status;
                true
            }
            None => false,
        }
    }

    pub fn tokens_for_module(&self, module_id: &str) -> Vec<TokenInfo> {
        self.read()
            .values()
            .filter(|t| t.module_id == module_id)
            .cloned()
            .collect()
    }

    pub fn available_tokens(&self) -> Vec<TokenInfo> {
        let mut tokens: Vec<TokenInfo> =
            self.read().values().filter(|t| t.available).cloned().collect();
        tokens.sort_by(|a, b| a.id.cmp(&b.id));
        tokens
    }

    pub fn list(&self) -> Vec<TokenInfo> {
        let mut tokens: Vec<TokenInfo> = self.read().values().cloned().collect();
        tokens.sort_by(|a, b| a.id.cmp(&b.id));
        tokens
    }
}

fn new_record(descriptor: &TokenDescriptor, module: &ModuleConfig) -> TokenInfo {
    TokenInfo {
        id: descriptor.id.clone(),
        module_id: descriptor.module_id.clone(),
        label: descriptor.label.clone(),
        serial_number: descriptor.serial_number.clone(),
        read_only: descriptor.read_only || module.force_read_only(),
        available: true,
        active: false,
        pin_verification_per_signing: module.pin_verification_per_signing(),
        batch_signing_enabled: module.batch_signing_enabled(),
        keys: Vec::new(),
    }
}
