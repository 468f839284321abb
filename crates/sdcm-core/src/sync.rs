//! Periodic refresh of cached models from the remote registry.
//!
//! Models that were never synced, or not within the staleness window, are
//! re-fetched with bounded concurrency. Each model gets a fixed number of
//! attempts with exponential backoff; a model the registry no longer serves
//! is flagged withdrawn and never selected again.

use crate::cancel::CancellationToken;
use crate::config::LibraryConfig;
use crate::error::{Result, SdcmError};
use crate::events::{Event, EventBus, SyncEvent, SyncStatus};
use crate::registry::{RegistryClient, RegistryIngestor, RegistryResponse};
use crate::retry::{retry_with_backoff, AttemptFailure, RetryPolicy};
use crate::scan::WorkerPool;
use crate::store::{CacheStore, ModelRecord};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-status totals of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub total: usize,
    pub success: usize,
    pub withdrawn: usize,
    pub failed: usize,
}

impl SyncReport {
    fn record(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Success => self.success += 1,
            SyncStatus::Withdrawn => self.withdrawn += 1,
            _ => self.failed += 1,
        }
    }
}

/// What one successful attempt did.
enum Refreshed {
    Ingested,
    Withdrawn,
}

/// Refreshes stale models from a [`RegistryClient`].
#[derive(Clone)]
pub struct RemoteSyncScheduler {
    config: Arc<LibraryConfig>,
    store: CacheStore,
    ingestor: RegistryIngestor,
    client: Arc<dyn RegistryClient>,
    events: EventBus,
    policy: RetryPolicy,
    cooldown: Duration,
}

impl std::fmt::Debug for RemoteSyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSyncScheduler")
            .field("policy", &self.policy)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl RemoteSyncScheduler {
    pub fn new(
        config: Arc<LibraryConfig>,
        store: CacheStore,
        client: Arc<dyn RegistryClient>,
        events: EventBus,
    ) -> Self {
        let policy = RetryPolicy::from_sync_settings(&config.sync);
        let cooldown = config.sync.task_cooldown();
        Self {
            ingestor: RegistryIngestor::new(store.clone()),
            config,
            store,
            client,
            events,
            policy,
            cooldown,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Pause each worker holds its slot for after finishing a model.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Refresh every model due for sync and report how each ended.
    pub async fn sync_stale_models(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let cutoff = Utc::now() - self.config.sync.stale_after();
        let due = self.store.models_due_for_sync(cutoff)?;
        info!("{} models due for registry sync", due.len());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(self.config.sync.concurrency);
        let mut report = SyncReport {
            total: due.len(),
            ..Default::default()
        };

        for model in due {
            let this = self.clone();
            let tx = tx.clone();
            let spawned = pool
                .spawn(cancel, async move {
                    let status = this.sync_model(&model).await;
                    tokio::time::sleep(this.cooldown).await;
                    let _ = tx.send(status);
                })
                .await;
            if let Err(e) = spawned {
                warn!("Registry sync cancelled, draining workers");
                pool.join().await;
                return Err(e);
            }
        }
        drop(tx);
        pool.join().await;

        while let Some(status) = rx.recv().await {
            report.record(status);
        }
        info!(
            "Registry sync finished: {} ok, {} withdrawn, {} failed",
            report.success, report.withdrawn, report.failed
        );
        self.events.emit(Event::ModelSyncFinished(report.clone()));
        Ok(report)
    }

    /// Refresh one model with retries. Never fails; the outcome is the
    /// returned status and the events emitted along the way.
    pub async fn sync_model(&self, model: &ModelRecord) -> SyncStatus {
        let outcome = retry_with_backoff(
            &self.policy,
            |attempt| {
                self.emit(model, SyncStatus::Start, attempt, None);
                self.refresh(model.id)
            },
            |e: &SdcmError| !e.is_cancelled(),
            |e, failure| {
                let attempt = match failure {
                    AttemptFailure::Retrying { attempt, .. } | AttemptFailure::Final { attempt } => attempt,
                };
                self.emit(model, SyncStatus::Error, attempt, Some(e.to_string()));
            },
        )
        .await;

        let retries = outcome.attempts.saturating_sub(1);
        let status = match outcome.result {
            Ok(Refreshed::Ingested) => SyncStatus::Success,
            Ok(Refreshed::Withdrawn) => SyncStatus::Withdrawn,
            Err(e) => {
                warn!("Giving up on model {} ({}): {}", model.id, model.name, e);
                SyncStatus::Failed
            }
        };
        self.emit(model, status, retries, None);
        status
    }

    async fn refresh(&self, model_id: i64) -> Result<Refreshed> {
        match self.client.fetch_model(model_id).await? {
            RegistryResponse::NotFound => {
                info!("Model {} is gone from the registry", model_id);
                self.store.mark_model_withdrawn(model_id)?;
                Ok(Refreshed::Withdrawn)
            }
            RegistryResponse::Found(bytes) => {
                let ingestor = self.ingestor.clone();
                let ingested =
                    tokio::task::spawn_blocking(move || ingestor.ingest_model(&bytes)).await??;
                debug!(
                    "Refreshed model {} with {} versions",
                    model_id,
                    ingested.versions.len()
                );
                Ok(Refreshed::Ingested)
            }
        }
    }

    fn emit(&self, model: &ModelRecord, status: SyncStatus, retries: u32, message: Option<String>) {
        self.events.emit(Event::ModelSync(SyncEvent {
            model_id: model.id,
            name: model.name.clone(),
            status,
            retries,
            message,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Registry double serving queued responses per model id.
    #[derive(Default)]
    struct FakeRegistry {
        responses: Mutex<HashMap<i64, VecDeque<Result<RegistryResponse>>>>,
        calls: AtomicU32,
    }

    impl FakeRegistry {
        fn queue(&self, model_id: i64, response: Result<RegistryResponse>) {
            self.responses
                .lock()
                .unwrap()
                .entry(model_id)
                .or_default()
                .push_back(response);
        }
    }

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn fetch_model(&self, model_id: i64) -> Result<RegistryResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .get_mut(&model_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    Err(SdcmError::RegistryStatus {
                        url: format!("/models/{}", model_id),
                        status: 503,
                    })
                })
        }

        async fn fetch_version(&self, _version_id: i64) -> Result<RegistryResponse> {
            Ok(RegistryResponse::NotFound)
        }

        async fn fetch_version_by_hash(&self, _hash: &str) -> Result<RegistryResponse> {
            Ok(RegistryResponse::NotFound)
        }

        async fn fetch_image(&self, _url: &str) -> Result<RegistryResponse> {
            Ok(RegistryResponse::NotFound)
        }
    }

    fn stub(id: i64) -> ModelRecord {
        ModelRecord {
            id,
            name: format!("model {}", id),
            description: None,
            creator: None,
            nsfw: false,
            poi: false,
            kind: "LORA".into(),
            mode: None,
            original: None,
            last_synced_at: None,
            withdrawn: false,
        }
    }

    fn model_doc(id: i64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "name": "Refreshed",
            "type": "LORA",
            "modelVersions": [
                {"id": id * 10, "name": "v1", "files": [{"id": id * 100, "sizeKB": 1.0}]}
            ]
        }))
        .unwrap()
    }

    fn scheduler(store: &CacheStore, registry: Arc<FakeRegistry>, events: &EventBus) -> RemoteSyncScheduler {
        RemoteSyncScheduler::new(
            Arc::new(LibraryConfig::default()),
            store.clone(),
            registry,
            events.clone(),
        )
    }

    fn sync_statuses(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<(SyncStatus, u32)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::ModelSync(e) = event {
                out.push((e.status, e.retries));
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_makes_three_attempts() {
        let store = CacheStore::in_memory().unwrap();
        store.insert_model_stub(&stub(1)).unwrap();
        let registry = Arc::new(FakeRegistry::default());
        let events = EventBus::default();
        let mut rx = events.subscribe();

        let report = scheduler(&store, registry.clone(), &events)
            .sync_stale_models(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(registry.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            report,
            SyncReport {
                total: 1,
                success: 0,
                withdrawn: 0,
                failed: 1
            }
        );
        let statuses = sync_statuses(&mut rx);
        assert_eq!(statuses.last(), Some(&(SyncStatus::Failed, 2)));
        assert_eq!(
            statuses
                .iter()
                .filter(|(s, _)| *s == SyncStatus::Error)
                .count(),
            3
        );
        // Still selectable next time.
        assert_eq!(store.models_due_for_sync(Utc::now()).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_marks_withdrawn_without_retry() {
        let store = CacheStore::in_memory().unwrap();
        store.insert_model_stub(&stub(2)).unwrap();
        let registry = Arc::new(FakeRegistry::default());
        registry.queue(2, Ok(RegistryResponse::NotFound));
        let events = EventBus::default();

        let report = scheduler(&store, registry.clone(), &events)
            .sync_stale_models(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.withdrawn, 1);
        assert!(store.model(2).unwrap().unwrap().withdrawn);
        assert!(store.models_due_for_sync(Utc::now()).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_error() {
        let store = CacheStore::in_memory().unwrap();
        store.insert_model_stub(&stub(3)).unwrap();
        let registry = Arc::new(FakeRegistry::default());
        registry.queue(
            3,
            Err(SdcmError::RegistryStatus {
                url: "/models/3".into(),
                status: 502,
            }),
        );
        registry.queue(3, Ok(RegistryResponse::Found(model_doc(3))));
        let events = EventBus::default();
        let mut rx = events.subscribe();

        let report = scheduler(&store, registry.clone(), &events)
            .sync_stale_models(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.success, 1);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 2);
        let model = store.model(3).unwrap().unwrap();
        assert_eq!(model.name, "Refreshed");
        assert!(model.last_synced_at.is_some());
        assert_eq!(sync_statuses(&mut rx).last(), Some(&(SyncStatus::Success, 1)));
    }

    #[tokio::test]
    async fn test_fresh_and_withdrawn_models_are_not_selected() {
        let store = CacheStore::in_memory().unwrap();
        let mut fresh = stub(4);
        fresh.last_synced_at = Some(Utc::now());
        store.upsert_model(&fresh).unwrap();
        let mut gone = stub(5);
        gone.withdrawn = true;
        store.upsert_model(&gone).unwrap();

        let registry = Arc::new(FakeRegistry::default());
        let events = EventBus::default();
        let report = scheduler(&store, registry.clone(), &events)
            .sync_stale_models(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_event_carries_report() {
        let store = CacheStore::in_memory().unwrap();
        let registry = Arc::new(FakeRegistry::default());
        let events = EventBus::default();
        let mut rx = events.subscribe();

        scheduler(&store, registry, &events)
            .sync_stale_models(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::ModelSyncFinished(SyncReport::default())
        );
    }
}
