//! Module Supervisor
//!
//! Owns one module worker per configured module. A failed reconciliation pass
//! is resumed (the worker keeps its registry entries and tries again on the
//! next tick) until a worker exceeds `max_failures` within `failure_window`,
//! at which point only that worker is restarted with a fresh backend.
//! Registry state is never touched by a restart.

use super::worker::{ModuleCommand, ModuleWorker, ModuleWorkerHandle, WorkerEvent};
use super::BackendFactory;
use crate::config::{ModuleConfig, SupervisorConfig};
use crate::registry::TokenRegistry;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Unknown token: {0}")]
    UnknownToken(String),
    #[error("Module worker not running: {0}")]
    ModuleNotRunning(String),
    #[error("Supervisor is not running")]
    NotRunning,
}

/// Decision taken for a reported worker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Resume,
    Restart,
}

/// Sliding window of failure timestamps for one worker.
#[derive(Debug, Clone)]
pub struct FailureWindow {
    max_failures: usize,
    window: Duration,
    failures: VecDeque<Instant>,
}

impl FailureWindow {
    pub fn new(max_failures: usize, window: Duration) -> Self {
        Self {
            max_failures,
            window,
            failures: VecDeque::new(),
        }
    }

    /// Record a failure at `now`. Returns `Restart` once more than
    /// `max_failures` fall inside the window, and clears the window.
    pub fn record(&mut self, now: Instant) -> Directive {
        self.failures.push_back(now);
        while let Some(&oldest) = self.failures.front() {
            if now.duration_since(oldest) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }

        if self.failures.len() > self.max_failures {
            self.failures.clear();
            Directive::Restart
        } else {
            Directive::Resume
        }
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn reset(&mut self) {
        self.failures.clear();
    }
}

enum SupervisorCommand {
    ActivateToken {
        token_id: String,
        pin: String,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    DeactivateToken {
        token_id: String,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle for talking to a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Route a PIN to the token worker owning `token_id`.
    ///
    /// Success means the request was delivered; the outcome shows up as the
    /// token's `active` flag in the registry.
    pub async fn activate_token(&self, token_id: &str, pin: &str) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SupervisorCommand::ActivateToken {
                token_id: token_id.to_string(),
                pin: pin.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn deactivate_token(&self, token_id: &str) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SupervisorCommand::DeactivateToken {
                token_id: token_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    async fn request(
        &self,
        command: SupervisorCommand,
        rx: oneshot::Receiver<Result<(), SupervisorError>>,
    ) -> Result<(), SupervisorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SupervisorError::NotRunning)?;
        rx.await.map_err(|_| SupervisorError::NotRunning)?
    }

    /// Stop every module worker and wait for the supervisor to exit.
    pub async fn shutdown(&self) {
        let (ack, rx) = oneshot::channel();
        if self.commands.send(SupervisorCommand::Shutdown(ack)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct Child {
    module: ModuleConfig,
    generation: u64,
    handle: Option<ModuleWorkerHandle>,
    failures: FailureWindow,
}

pub struct ModuleSupervisor {
    config: SupervisorConfig,
    registry: TokenRegistry,
    factory: BackendFactory,
    children: HashMap<String, Child>,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    restart_tx: mpsc::Sender<(String, u64)>,
    restart_rx: mpsc::Receiver<(String, u64)>,
    commands: mpsc::Receiver<SupervisorCommand>,
}

impl ModuleSupervisor {
    pub fn new(
        modules: Vec<ModuleConfig>,
        config: SupervisorConfig,
        registry: TokenRegistry,
        factory: BackendFactory,
    ) -> (Self, SupervisorHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (restart_tx, restart_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let children = modules
            .into_iter()
            .map(|module| {
                let child = Child {
                    failures: FailureWindow::new(config.max_failures, config.failure_window),
                    module: module.clone(),
                    generation: 0,
                    handle: None,
                };
                (module.id, child)
            })
            .collect();

        let supervisor = Self {
            config,
            registry,
            factory,
            children,
            events_tx,
            events_rx,
            restart_tx,
            restart_rx,
            commands: commands_rx,
        };
        let handle = SupervisorHandle {
            commands: commands_tx,
        };
        (supervisor, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("Starting module supervisor with {} modules", self.children.len());
        let module_ids: Vec<String> = self.children.keys().cloned().collect();
        for module_id in module_ids {
            self.start_child(&module_id);
        }

        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                }
                Some((module_id, generation)) = self.restart_rx.recv() => {
                    if self.is_current(&module_id, generation) {
                        self.restart_child(&module_id).await;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::ActivateToken { token_id, pin, reply }) => {
                        let result = self.route(&token_id, |token_id| ModuleCommand::ActivateToken {
                            token_id,
                            pin,
                        });
                        let _ = reply.send(result);
                    }
                    Some(SupervisorCommand::DeactivateToken { token_id, reply }) => {
                        let result = self.route(&token_id, |token_id| {
                            ModuleCommand::DeactivateToken { token_id }
                        });
                        let _ = reply.send(result);
                    }
                    Some(SupervisorCommand::Shutdown(ack)) => {
                        self.stop_all().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.stop_all().await;
                        break;
                    }
                },
            }
        }
        info!("Module supervisor stopped");
    }

    fn is_current(&self, module_id: &str, generation: u64) -> bool {
        self.children
            .get(module_id)
            .is_some_and(|child| child.generation == generation)
    }

    fn start_child(&mut self, module_id: &str) {
        let Some(child) = self.children.get_mut(module_id) else {
            return;
        };
        let backend = (self.factory)(&child.module);
        let worker = ModuleWorker::new(
            child.module.clone(),
            child.generation,
            backend,
            self.registry.clone(),
            self.config.removal_policy,
            self.events_tx.clone(),
        );
        debug!(module_id = %module_id, generation = child.generation, "Starting module worker");
        child.handle = Some(worker.spawn(self.config.update_interval));
    }

    async fn restart_child(&mut self, module_id: &str) {
        let Some(child) = self.children.get_mut(module_id) else {
            return;
        };
        if let Some(handle) = child.handle.take() {
            handle.stop(self.config.shutdown_timeout).await;
        }
        child.generation += 1;
        child.failures.reset();
        info!(
            module_id = %module_id,
            generation = child.generation,
            "Restarting module worker"
        );
        self.start_child(module_id);
    }

    fn schedule_restart(&self, module_id: &str, generation: u64) {
        let restart_tx = self.restart_tx.clone();
        let backoff = self.config.restart_backoff;
        let module_id = module_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = restart_tx.send((module_id, generation)).await;
        });
    }

    async fn handle_event(&mut self, event: WorkerEvent) {
        if !self.is_current(event.module_id(), event.generation()) {
            debug!(
                module_id = %event.module_id(),
                generation = event.generation(),
                "Ignoring event from replaced worker"
            );
            return;
        }

        match event {
            WorkerEvent::TokenAdded {
                module_id,
                token_id,
                ..
            } => {
                debug!(module_id = %module_id, token_id = %token_id, "Token added");
            }
            WorkerEvent::TokenLost {
                module_id,
                token_id,
                ..
            } => {
                debug!(module_id = %module_id, token_id = %token_id, "Token lost");
            }
            WorkerEvent::Failure {
                module_id, error, ..
            } => {
                let Some(child) = self.children.get_mut(&module_id) else {
                    return;
                };
                match child.failures.record(Instant::now()) {
                    Directive::Resume => {
                        warn!(
                            module_id = %module_id,
                            failures = child.failures.len(),
                            "Module worker failed, resuming: {}",
                            error
                        );
                    }
                    Directive::Restart => {
                        error!(
                            module_id = %module_id,
                            "Module worker exceeded {} failures within {:?}, restarting: {}",
                            self.config.max_failures,
                            self.config.failure_window,
                            error
                        );
                        self.restart_child(&module_id).await;
                    }
                }
            }
            WorkerEvent::InitializationFailed {
                module_id,
                generation,
                error,
            } => {
                error!(
                    module_id = %module_id,
                    "Module failed to initialize, retrying in {:?}: {}",
                    self.config.restart_backoff,
                    error
                );
                self.schedule_restart(&module_id, generation);
            }
            WorkerEvent::Crashed {
                module_id,
                generation,
            } => {
                error!(
                    module_id = %module_id,
                    "Module worker crashed, restarting in {:?}",
                    self.config.restart_backoff
                );
                self.schedule_restart(&module_id, generation);
            }
            WorkerEvent::Stopped { module_id, .. } => {
                debug!(module_id = %module_id, "Module worker reported stop");
            }
        }
    }

    fn route(
        &self,
        token_id: &str,
        command: impl FnOnce(String) -> ModuleCommand,
    ) -> Result<(), SupervisorError> {
        let token = self
            .registry
            .get(token_id)
            .ok_or_else(|| SupervisorError::UnknownToken(token_id.to_string()))?;
        let handle = self
            .children
            .get(&token.module_id)
            .and_then(|child| child.handle.as_ref())
            .filter(|handle| !handle.is_finished())
            .ok_or_else(|| SupervisorError::ModuleNotRunning(token.module_id.clone()))?;

        if handle.send(command(token_id.to_string())) {
            Ok(())
        } else {
            Err(SupervisorError::ModuleNotRunning(token.module_id))
        }
    }

    async fn stop_all(&mut self) {
        info!("Stopping {} module workers", self.children.len());
        for child in self.children.values_mut() {
            if let Some(handle) = child.handle.take() {
                handle.stop(self.config.shutdown_timeout).await;
            }
        }
    }
}
