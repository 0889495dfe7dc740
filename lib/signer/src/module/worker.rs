//! Module Worker
//!
//! Periodically lists the tokens a module reports and reconciles them against
//! the registry. Diffing is by token id only: label or key changes on a known
//! token are forwarded to its token worker as an update signal.

use super::token_worker::{TokenCommand, TokenWorker, TokenWorkerHandle, join_stopped};
use super::ModuleBackend;
use crate::config::{ModuleConfig, RemovalPolicy};
use crate::error::ModuleError;
use crate::registry::TokenRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// How long a stopped token worker may take to finish its last refresh.
const TOKEN_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Events a module worker reports to its supervisor.
///
/// Every event carries the generation of the worker that produced it, so the
/// supervisor can ignore stragglers from a worker it already replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    TokenAdded {
        module_id: String,
        generation: u64,
        token_id: String,
    },
    TokenLost {
        module_id: String,
        generation: u64,
        token_id: String,
    },
    /// A reconciliation pass failed; the worker keeps running
    Failure {
        module_id: String,
        generation: u64,
        error: ModuleError,
    },
    /// The backend could not be opened; the worker has stopped itself
    InitializationFailed {
        module_id: String,
        generation: u64,
        error: ModuleError,
    },
    Stopped {
        module_id: String,
        generation: u64,
    },
    /// The worker task panicked
    Crashed {
        module_id: String,
        generation: u64,
    },
}

impl WorkerEvent {
    pub fn module_id(&self) -> &str {
        match self {
            WorkerEvent::TokenAdded { module_id, .. }
            | WorkerEvent::TokenLost { module_id, .. }
            | WorkerEvent::Failure { module_id, .. }
            | WorkerEvent::InitializationFailed { module_id, .. }
            | WorkerEvent::Stopped { module_id, .. }
            | WorkerEvent::Crashed { module_id, .. } => module_id,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            WorkerEvent::TokenAdded { generation, .. }
            | WorkerEvent::TokenLost { generation, .. }
            | WorkerEvent::Failure { generation, .. }
            | WorkerEvent::InitializationFailed { generation, .. }
            | WorkerEvent::Stopped { generation, .. }
            | WorkerEvent::Crashed { generation, .. } => *generation,
        }
    }
}

#[derive(Debug)]
pub enum ModuleCommand {
    ActivateToken { token_id: String, pin: String },
    DeactivateToken { token_id: String },
    Stop,
}

pub struct ModuleWorker {
    module: ModuleConfig,
    generation: u64,
    backend: Arc<dyn ModuleBackend>,
    registry: TokenRegistry,
    removal_policy: RemovalPolicy,
    tokens: HashMap<String, TokenWorkerHandle>,
    /// Stopped token workers that may still be finishing a refresh
    retiring: HashMap<String, JoinHandle<()>>,
    events: mpsc::Sender<WorkerEvent>,
}

pub struct ModuleWorkerHandle {
    module_id: String,
    generation: u64,
    commands: mpsc::Sender<ModuleCommand>,
    task: JoinHandle<()>,
    worker_task: AbortHandle,
}

impl ModuleWorker {
    pub fn new(
        module: ModuleConfig,
        generation: u64,
        backend: Arc<dyn ModuleBackend>,
        registry: TokenRegistry,
        removal_policy: RemovalPolicy,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            module,
            generation,
            backend,
            registry,
            removal_policy,
            tokens: HashMap::new(),
            retiring: HashMap::new(),
            events,
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module.id
    }

    /// Ids of the tokens this worker currently owns a token worker for.
    pub fn token_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tokens.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Spawn the worker loop.
    ///
    /// A watcher task reports `Crashed` if the loop panics.
    pub fn spawn(self, update_interval: Duration) -> ModuleWorkerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let module_id = self.module.id.clone();
        let generation = self.generation;
        let events = self.events.clone();

        let inner = tokio::spawn(self.run(rx, update_interval));
        let worker_task = inner.abort_handle();
        let watched_id = module_id.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = inner.await
                && e.is_panic()
            {
                error!(module_id = %watched_id, "Module worker panicked");
                let _ = events
                    .send(WorkerEvent::Crashed {
                        module_id: watched_id,
                        generation,
                    })
                    .await;
            }
        });

        ModuleWorkerHandle {
            module_id,
            generation,
            commands: tx,
            task,
            worker_task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<ModuleCommand>, update_interval: Duration) {
        if let Err(e) = self.backend.initialize().await {
            error!(module_id = %self.module.id, "Failed to initialize module: {}", e);
            self.emit(WorkerEvent::InitializationFailed {
                module_id: self.module.id.clone(),
                generation: self.generation,
                error: e,
            })
            .await;
            return;
        }
        info!(module_id = %self.module.id, generation = self.generation, "Module initialized");

        // Ticks run inside this loop, so a slow listing delays the next tick
        // instead of overlapping with it.
        let mut ticker = tokio::time::interval(update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.on_update().await {
                        warn!(module_id = %self.module.id, "Module update failed: {}", e);
                        self.emit(WorkerEvent::Failure {
                            module_id: self.module.id.clone(),
                            generation: self.generation,
                            error: e,
                        })
                        .await;
                    }
                }
                command = commands.recv() => match command {
                    Some(ModuleCommand::ActivateToken { token_id, pin }) => {
                        self.forward(&token_id, TokenCommand::Activate { pin });
                    }
                    Some(ModuleCommand::DeactivateToken { token_id }) => {
                        self.forward(&token_id, TokenCommand::Deactivate);
                    }
                    Some(ModuleCommand::Stop) | None => break,
                },
            }
        }

        self.shutdown().await;
        self.emit(WorkerEvent::Stopped {
            module_id: self.module.id.clone(),
            generation: self.generation,
        })
        .await;
    }

    /// One reconciliation pass.
    ///
    /// A listing failure aborts the pass and leaves the registry untouched.
    pub async fn on_update(&mut self) -> Result<(), ModuleError> {
        let listed = self.backend.list_tokens().await?;
        trace!(module_id = %self.module.id, "Got {} tokens from module", listed.len());

        let reported: HashSet<String> = listed.iter().map(|t| t.id.clone()).collect();
        self.retiring.retain(|_, task| !task.is_finished());

        for descriptor in listed {
            if self.tokens.contains_key(&descriptor.id) {
                continue;
            }
            // The previous worker for this id must be gone before a new one
            // starts writing, or its late refresh could overwrite newer keys.
            if let Some(task) = self.retiring.remove(&descriptor.id) {
                join_stopped(&descriptor.id, task, TOKEN_STOP_TIMEOUT).await;
            }
            if self.registry.get_or_create(&descriptor, &self.module).is_none() {
                warn!(
                    module_id = %self.module.id,
                    token_id = %descriptor.id,
                    "Token id already owned by another module, ignoring"
                );
                continue;
            }
            info!(
                module_id = %self.module.id,
                token_id = %descriptor.id,
                "Adding new token"
            );
            let token_id = descriptor.id.clone();
            let handle = TokenWorker::spawn(descriptor, self.backend.clone(), self.registry.clone());
            self.tokens.insert(token_id.clone(), handle);
            self.emit(WorkerEvent::TokenAdded {
                module_id: self.module.id.clone(),
                generation: self.generation,
                token_id,
            })
            .await;
        }

        let lost: Vec<String> = self
            .tokens
            .keys()
            .filter(|id| !reported.contains(*id))
            .cloned()
            .collect();
        for token_id in lost {
            self.destroy_token(&token_id).await;
        }

        for handle in self.tokens.values() {
            handle.update();
        }

        // Tokens known from before a restart that no worker owns anymore
        for token in self.registry.tokens_for_module(&self.module.id) {
            if token.available && !reported.contains(&token.id) {
                debug!(token_id = %token.id, "Marking orphaned token unavailable");
                self.drop_registry_entry(&token.id);
            }
        }

        Ok(())
    }

    async fn destroy_token(&mut self, token_id: &str) {
        let Some(handle) = self.tokens.remove(token_id) else {
            return;
        };
        info!(module_id = %self.module.id, token_id = %token_id, "Lost token");
        self.drop_registry_entry(token_id);
        self.retiring.insert(token_id.to_string(), handle.stop());
        self.emit(WorkerEvent::TokenLost {
            module_id: self.module.id.clone(),
            generation: self.generation,
            token_id: token_id.to_string(),
        })
        .await;
    }

    fn drop_registry_entry(&self, token_id: &str) {
        match self.removal_policy {
            RemovalPolicy::Retain => {
                self.registry.set_available(token_id, false);
            }
            RemovalPolicy::Purge => {
                self.registry.remove(token_id);
            }
        }
    }

    fn forward(&self, token_id: &str, command: TokenCommand) {
        match self.tokens.get(token_id) {
            Some(handle) => {
                if !handle.send(command) {
                    warn!(token_id = %token_id, "Token worker queue full, command dropped");
                }
            }
            None => warn!(
                module_id = %self.module.id,
                token_id = %token_id,
                "No worker for token"
            ),
        }
    }

    /// Stop all token workers, wait for them to log out and release the backend.
    ///
    /// Registry entries are kept as they are so a restarted worker picks up
    /// where this one left off.
    pub async fn shutdown(&mut self) {
        let stopping: Vec<(String, JoinHandle<()>)> = self
            .tokens
            .drain()
            .map(|(id, handle)| (id, handle.stop()))
            .chain(self.retiring.drain())
            .collect();
        for (token_id, task) in stopping {
            join_stopped(&token_id, task, TOKEN_STOP_TIMEOUT).await;
        }
        if let Err(e) = self.backend.deinitialize().await {
            error!(module_id = %self.module.id, "Failed to deinitialize module: {}", e);
        }
        info!(module_id = %self.module.id, generation = self.generation, "Module worker stopped");
    }

    async fn emit(&self, event: WorkerEvent) {
        // Supervisor gone means the process is shutting down
        let _ = self.events.send(event).await;
    }
}

impl ModuleWorkerHandle {
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn send(&self, command: ModuleCommand) -> bool {
        self.commands.try_send(command).is_ok()
    }

    /// Ask the worker to stop and wait up to `timeout` for it to clean up.
    /// Aborts the worker if it does not finish in time.
    pub async fn stop(mut self, timeout: Duration) {
        let commands = self.commands.clone();
        let module_id = self.module_id.clone();
        let task = &mut self.task;
        let stopped = tokio::time::timeout(timeout, async move {
            if commands.send(ModuleCommand::Stop).await.is_err() {
                debug!(module_id = %module_id, "Module worker already stopped");
            }
            let _ = task.await;
        })
        .await;
        if stopped.is_err() {
            warn!(
                module_id = %self.module_id,
                "Module worker did not stop within {:?}, aborting",
                timeout
            );
            self.worker_task.abort();
            self.task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
