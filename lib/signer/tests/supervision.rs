#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end token supervision tests
//!
//! Drives module workers and the supervisor against in-memory backends.

use async_trait::async_trait;
use signer::module::{ModuleWorker, SoftwareModule, WorkerEvent};
use signer::{
    BackendFactory, KeyInfo, ModuleBackend, ModuleConfig, ModuleError, ModuleSupervisor,
    RemovalPolicy, SupervisorConfig, TokenDescriptor, TokenRegistry,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Replays a fixed sequence of token listings.
struct ListingBackend {
    module_id: String,
    listings: Mutex<VecDeque<Vec<&'static str>>>,
}

impl ListingBackend {
    fn new(module_id: &str, listings: Vec<Vec<&'static str>>) -> Self {
        Self {
            module_id: module_id.to_string(),
            listings: Mutex::new(listings.into()),
        }
    }
}

#[async_trait]
impl ModuleBackend for ListingBackend {
    async fn initialize(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn deinitialize(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn list_tokens(&self) -> Result<Vec<TokenDescriptor>, ModuleError> {
        let ids = self.listings.lock().unwrap().pop_front().unwrap_or_default();
        Ok(ids
            .into_iter()
            .map(|id| TokenDescriptor::new(id, self.module_id.clone(), id))
            .collect())
    }

    async fn list_keys(&self, token: &TokenDescriptor) -> Result<Vec<KeyInfo>, ModuleError> {
        Ok(vec![KeyInfo::new(format!("{}-key", token.id), "key")])
    }

    async fn login(&self, _token: &TokenDescriptor, _pin: &str) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn logout(&self, _token: &TokenDescriptor) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Fails listing while the shared budget lasts, then reports one token.
struct FlakyBackend {
    module_id: String,
    failures_left: Arc<AtomicUsize>,
}

#[async_trait]
impl ModuleBackend for FlakyBackend {
    async fn initialize(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn deinitialize(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn list_tokens(&self) -> Result<Vec<TokenDescriptor>, ModuleError> {
        let consumed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(ModuleError::Listing("slot enumeration failed".to_string()));
        }
        let id = format!("{}-token", self.module_id);
        Ok(vec![TokenDescriptor::new(id.clone(), self.module_id.clone(), id)])
    }

    async fn list_keys(&self, _token: &TokenDescriptor) -> Result<Vec<KeyInfo>, ModuleError> {
        Ok(Vec::new())
    }

    async fn login(&self, _token: &TokenDescriptor, _pin: &str) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn logout(&self, _token: &TokenDescriptor) -> Result<(), ModuleError> {
        Ok(())
    }
}

fn available(registry: &TokenRegistry) -> Vec<String> {
    registry.available_tokens().into_iter().map(|t| t.id).collect()
}

fn drain(rx: &mut mpsc::Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// ==================== Reconciliation ====================

#[tokio::test]
async fn test_token_appears_then_disappears() {
    let module = ModuleConfig::software("soft", "/unused");
    let backend = Arc::new(ListingBackend::new(
        "soft",
        vec![vec!["T1"], vec!["T1", "T2"], vec!["T2"]],
    ));
    let registry = TokenRegistry::new();
    let (tx, mut rx) = mpsc::channel(64);
    let mut worker = ModuleWorker::new(
        module,
        0,
        backend,
        registry.clone(),
        RemovalPolicy::Retain,
        tx,
    );

    worker.on_update().await.unwrap();
    assert_eq!(available(&registry), vec!["T1"]);

    worker.on_update().await.unwrap();
    assert_eq!(available(&registry), vec!["T1", "T2"]);
    let before_lost = drain(&mut rx);
    assert!(
        !before_lost
            .iter()
            .any(|e| matches!(e, WorkerEvent::TokenLost { .. }))
    );

    worker.on_update().await.unwrap();
    assert_eq!(available(&registry), vec!["T2"]);
    assert_eq!(worker.token_ids(), vec!["T2".to_string()]);

    let lost: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            WorkerEvent::TokenLost { token_id, .. } => Some(token_id),
            _ => None,
        })
        .collect();
    assert_eq!(lost, vec!["T1".to_string()]);

    // T1 is retained for warm re-insertion, just flagged unavailable
    let t1 = registry.get("T1").unwrap();
    assert!(!t1.available);
    worker.shutdown().await;
}

async fn software_worker(
    module_id: &str,
    dir: &TempDir,
    registry: &TokenRegistry,
    events: mpsc::Sender<WorkerEvent>,
) -> ModuleWorker {
    let backend = Arc::new(SoftwareModule::new(module_id, dir.path().to_path_buf()));
    backend.initialize().await.unwrap();
    ModuleWorker::new(
        ModuleConfig::software(module_id, dir.path()),
        0,
        backend,
        registry.clone(),
        RemovalPolicy::Retain,
        events,
    )
}

#[tokio::test]
async fn test_two_software_keystores_keep_separate_tokens() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let registry = TokenRegistry::new();
    let (tx, _rx) = mpsc::channel(64);

    let mut worker_a = software_worker("a", &dir_a, &registry, tx.clone()).await;
    let mut worker_b = software_worker("b", &dir_b, &registry, tx).await;

    worker_a.on_update().await.unwrap();
    worker_b.on_update().await.unwrap();
    assert_eq!(available(&registry), vec!["a-0", "b-0"]);
    assert_eq!(registry.get("a-0").unwrap().module_id, "a");
    assert_eq!(registry.get("b-0").unwrap().module_id, "b");

    // Keystore a goes away; b is unaffected
    dir_a.close().unwrap();
    worker_a.on_update().await.unwrap();
    worker_b.on_update().await.unwrap();

    assert_eq!(available(&registry), vec!["b-0"]);
    assert!(!registry.get("a-0").unwrap().available);
    assert_eq!(worker_b.token_ids(), vec!["b-0".to_string()]);
    assert!(worker_a.token_ids().is_empty());

    worker_a.shutdown().await;
    worker_b.shutdown().await;
}

// ==================== Fault Isolation ====================

#[tokio::test]
async fn test_sustained_failures_restart_only_the_failing_module() {
    let created: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let failures_left = Arc::new(AtomicUsize::new(15));

    let factory: BackendFactory = {
        let created = created.clone();
        let failures_left = failures_left.clone();
        Arc::new(move |module: &ModuleConfig| {
            *created.lock().unwrap().entry(module.id.clone()).or_default() += 1;
            let budget = if module.id == "flaky" {
                failures_left.clone()
            } else {
                Arc::new(AtomicUsize::new(0))
            };
            Arc::new(FlakyBackend {
                module_id: module.id.clone(),
                failures_left: budget,
            }) as Arc<dyn ModuleBackend>
        })
    };

    let config = SupervisorConfig {
        update_interval: Duration::from_millis(5),
        max_failures: 10,
        failure_window: Duration::from_secs(60),
        restart_backoff: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(1),
        removal_policy: RemovalPolicy::Retain,
    };
    let registry = TokenRegistry::new();
    let (supervisor, handle) = ModuleSupervisor::new(
        vec![
            ModuleConfig::software("flaky", "/unused"),
            ModuleConfig::software("healthy", "/unused"),
        ],
        config,
        registry.clone(),
        factory,
    );
    let task = supervisor.spawn();

    wait_until(|| registry.get("flaky-token").is_some_and(|t| t.available)).await;
    assert_eq!(failures_left.load(Ordering::SeqCst), 0);
    // Let a few healthy ticks pass after recovery
    tokio::time::sleep(Duration::from_millis(100)).await;

    {
        let created = created.lock().unwrap();
        assert_eq!(created.get("flaky"), Some(&2));
        assert_eq!(created.get("healthy"), Some(&1));
    }
    assert!(registry.get("healthy-token").unwrap().available);

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_failures_below_threshold_never_restart() {
    let created = Arc::new(AtomicUsize::new(0));
    let factory: BackendFactory = {
        let created = created.clone();
        let failures_left = Arc::new(AtomicUsize::new(10));
        Arc::new(move |module: &ModuleConfig| {
            created.fetch_add(1, Ordering::SeqCst);
            Arc::new(FlakyBackend {
                module_id: module.id.clone(),
                failures_left: failures_left.clone(),
            }) as Arc<dyn ModuleBackend>
        })
    };

    let config = SupervisorConfig {
        update_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let registry = TokenRegistry::new();
    let (supervisor, handle) = ModuleSupervisor::new(
        vec![ModuleConfig::software("flaky", "/unused")],
        config,
        registry.clone(),
        factory,
    );
    let task = supervisor.spawn();

    wait_until(|| registry.get("flaky-token").is_some()).await;
    assert_eq!(created.load(Ordering::SeqCst), 1);

    handle.shutdown().await;
    task.await.unwrap();
}
