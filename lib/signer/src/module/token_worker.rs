//! Token Worker
//!
//! One task per discovered token. Commands are processed strictly in order,
//! which makes the worker the single writer of its token's key list.

use super::ModuleBackend;
use crate::registry::TokenRegistry;
use crate::token::TokenDescriptor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug)]
pub enum TokenCommand {
    /// Refresh keys and certificates from the backend
    Update,
    Activate { pin: String },
    Deactivate,
    Stop,
}

pub struct TokenWorker {
    descriptor: TokenDescriptor,
    backend: Arc<dyn ModuleBackend>,
    registry: TokenRegistry,
    commands: mpsc::Receiver<TokenCommand>,
    active: bool,
}

/// Handle held by the owning module worker.
pub struct TokenWorkerHandle {
    commands: mpsc::Sender<TokenCommand>,
    task: JoinHandle<()>,
}

impl TokenWorker {
    /// Spawn a worker for a token. The first refresh runs immediately.
    pub fn spawn(
        descriptor: TokenDescriptor,
        backend: Arc<dyn ModuleBackend>,
        registry: TokenRegistry,
    ) -> TokenWorkerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let worker = TokenWorker {
            descriptor,
            backend,
            registry,
            commands: rx,
            active: false,
        };
        let task = tokio::spawn(worker.run());
        TokenWorkerHandle {
            commands: tx,
            task,
        }
    }

    async fn run(mut self) {
        debug!(token_id = %self.descriptor.id, "Token worker started");
        self.refresh().await;

        while let Some(command) = self.commands.recv().await {
            match command {
                TokenCommand::Update => self.refresh().await,
                TokenCommand::Activate { pin } => self.activate(&pin).await,
                TokenCommand::Deactivate => self.deactivate().await,
                TokenCommand::Stop => break,
            }
        }

        if self.active
            && let Err(e) = self.backend.logout(&self.descriptor).await
        {
            warn!(token_id = %self.descriptor.id, "Failed to log out of token: {}", e);
        }
        debug!(token_id = %self.descriptor.id, "Token worker stopped");
    }

    async fn refresh(&mut self) {
        match self.backend.list_keys(&self.descriptor).await {
            Ok(keys) => {
                debug!(
                    token_id = %self.descriptor.id,
                    "Got {} keys from token",
                    keys.len()
                );
                self.registry.update_keys(&self.descriptor.id, keys);
            }
            Err(e) => {
                // Registry keeps the last-known-good key list
                warn!(token_id = %self.descriptor.id, "Failed to list keys: {}", e);
            }
        }
    }

    async fn activate(&mut self, pin: &str) {
        match self.backend.login(&self.descriptor, pin).await {
            Ok(()) => {
                info!(token_id = %self.descriptor.id, "Token activated");
                self.active = true;
                self.registry.set_active(&self.descriptor.id, true);
                self.refresh().await;
            }
            Err(e) => {
                warn!(token_id = %self.descriptor.id, "Token activation failed: {}", e);
                self.active = false;
                self.registry.set_active(&self.descriptor.id, false);
            }
        }
    }

    async fn deactivate(&mut self) {
        if let Err(e) = self.backend.logout(&self.descriptor).await {
            warn!(token_id = %self.descriptor.id, "Failed to log out of token: {}", e);
        }
        info!(token_id = %self.descriptor.id, "Token deactivated");
        self.active = false;
        self.registry.set_active(&self.descriptor.id, false);
    }
}

impl TokenWorkerHandle {
    /// Forward an update signal. A full queue already holds pending work, so
    /// the signal is dropped.
    pub fn update(&self) {
        let _ = self.commands.try_send(TokenCommand::Update);
    }

    pub fn send(&self, command: TokenCommand) -> bool {
        self.commands.try_send(command).is_ok()
    }

    /// Request stop. The worker drains pending commands, cleans up and exits
    /// on its own once the sender is dropped. The returned task completes when
    /// the worker has made its last registry write.
    pub fn stop(self) -> JoinHandle<()> {
        let _ = self.commands.try_send(TokenCommand::Stop);
        self.task
    }
}

/// Wait for a stopped token worker to exit, aborting it after `timeout`.
///
/// Once this returns the worker can no longer touch the registry.
pub async fn join_stopped(token_id: &str, mut task: JoinHandle<()>, timeout: Duration) {
    if tokio::time::timeout(timeout, &mut task).await.is_err() {
        warn!(token_id = %token_id, "Token worker did not stop within {:?}, aborting", timeout);
        task.abort();
        let _ = task.await;
    }
}
