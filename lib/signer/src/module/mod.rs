//! Module supervision
//!
//! # Architecture
//!
//! - **Supervisor**: owns one module worker per configured module and decides
//!   resume-vs-restart from a sliding failure window per worker
//! - **Module Worker**: ticks periodically, lists the tokens its backend reports
//!   and reconciles them against the registry, spawning and stopping token workers
//! - **Token Worker**: owns one token, refreshes its keys and PIN state in the registry
//!
//! Workers talk to each other only through one-way channel messages and the
//! [`TokenRegistry`](crate::registry::TokenRegistry).

mod pkcs11;
mod software;
mod supervisor;
mod token_worker;
mod worker;

pub use pkcs11::Pkcs11Module;
pub use software::{SOFTWARE_TOKEN_ID, SOFTWARE_TOKEN_LABEL, SoftwareModule};
pub use supervisor::{Directive, FailureWindow, ModuleSupervisor, SupervisorError, SupervisorHandle};
pub use token_worker::{TokenCommand, TokenWorker, TokenWorkerHandle, join_stopped};
pub use worker::{ModuleCommand, ModuleWorker, ModuleWorkerHandle, WorkerEvent};

use crate::config::{ModuleConfig, ModuleKind};
use crate::error::ModuleError;
use crate::token::{KeyInfo, TokenDescriptor};
use async_trait::async_trait;
use std::sync::Arc;

/// Capabilities a cryptographic module backend exposes to the workers.
///
/// Every method may block on hardware or disk and is only ever called from
/// the owning worker task, never while the registry lock is held.
#[async_trait]
pub trait ModuleBackend: Send + Sync {
    /// Open the backend (load the PKCS#11 library, check the keystore directory).
    async fn initialize(&self) -> Result<(), ModuleError>;

    /// Release backend resources.
    async fn deinitialize(&self) -> Result<(), ModuleError>;

    /// Tokens the module reports right now.
    async fn list_tokens(&self) -> Result<Vec<TokenDescriptor>, ModuleError>;

    /// Keys and certificates currently stored on a token.
    async fn list_keys(&self, token: &TokenDescriptor) -> Result<Vec<KeyInfo>, ModuleError>;

    /// Verify the user PIN for a token.
    async fn login(&self, token: &TokenDescriptor, pin: &str) -> Result<(), ModuleError>;

    async fn logout(&self, token: &TokenDescriptor) -> Result<(), ModuleError>;
}

/// Builds a fresh backend for a module, used on start and on every restart.
pub type BackendFactory = Arc<dyn Fn(&ModuleConfig) -> Arc<dyn ModuleBackend> + Send + Sync>;

/// Backend for a module configuration.
pub fn create_backend(module: &ModuleConfig) -> Arc<dyn ModuleBackend> {
    match &module.kind {
        ModuleKind::Software { keystore_dir } => {
            Arc::new(SoftwareModule::new(&module.id, keystore_dir.clone()))
        }
        ModuleKind::Hardware {
            pkcs11_library_path,
            force_read_only,
            ..
        } => Arc::new(Pkcs11Module::new(
            &module.id,
            pkcs11_library_path.clone(),
            *force_read_only,
        )),
    }
}

pub fn default_backend_factory() -> BackendFactory {
    Arc::new(create_backend)
}

/// Registry id of a token: the id the module reports, prefixed with the
/// module id so tokens of different modules never collide.
pub fn token_id(module_id: &str, local_id: &str) -> String {
    format!("{}-{}", module_id, local_id.trim())
}
