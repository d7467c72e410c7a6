//! Sync Coordinator
//!
//! Reconciles the local store with a remote authority, one namespace at a
//! time: pull remote changes since the last marker, then push the outbox.
//! Conflicts resolve last-writer-wins on revision, ties going to the remote.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tilldb_core::{Document, ListOptions, Precondition, StoreError};
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::store::{ChangeOp, LocalStore, PendingChange, StoreHandle};
use crate::remote::RemoteStore;

/// Configuration for the sync coordinator
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Periodic sync interval
    pub interval: Duration,
    /// Documents per remote listing page
    pub batch_size: usize,
    /// Failed pushes after which a change is only retried by an explicit sync
    pub max_retries: u32,
    /// Run periodic passes in the background task
    pub auto_sync: bool,
    /// Namespaces to sync; empty means every namespace known locally
    pub namespaces: Vec<String>,
    /// Automatic passes skip a namespace this long after it failed
    pub min_retry_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 100,
            max_retries: 5,
            auto_sync: true,
            namespaces: Vec::new(),
            min_retry_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sync pass superseded by a newer one")]
    Superseded,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What started a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Explicit,
    Periodic,
    Connectivity,
    Visibility,
}

impl SyncTrigger {
    fn is_automatic(&self) -> bool {
        !matches!(self, SyncTrigger::Explicit)
    }
}

/// Commands accepted by the background task
#[derive(Debug, Clone)]
pub enum SyncCommand {
    /// Run a pass immediately
    SyncNow,
    /// Connectivity changed; coming online triggers a pass
    SetOnline(bool),
    /// Foreground state changed; becoming visible triggers a pass
    SetVisible(bool),
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
}

/// Per-namespace coordinator state
#[derive(Debug, Clone, Default)]
pub struct NamespaceState {
    pub status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    last_failure: Option<Instant>,
}

/// Outcome of one namespace within a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceReport {
    pub namespace: String,
    pub pulled: usize,
    pub pushed: usize,
    pub conflicts: usize,
    pub failed: usize,
    /// Changes left queued because they exhausted their retries
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Outcome of a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub namespaces: Vec<NamespaceReport>,
    /// Namespaces skipped by the retry interval
    pub throttled: Vec<String>,
    /// A newer pass started; results after that point were not applied
    pub superseded: bool,
    /// Failures not tied to a single document
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn pulled(&self) -> usize {
        self.namespaces.iter().map(|n| n.pulled).sum()
    }

    pub fn pushed(&self) -> usize {
        self.namespaces.iter().map(|n| n.pushed).sum()
    }

    pub fn conflicts(&self) -> usize {
        self.namespaces.iter().map(|n| n.conflicts).sum()
    }

    pub fn failed(&self) -> usize {
        self.namespaces.iter().map(|n| n.failed).sum()
    }

    pub fn namespace(&self, namespace: &str) -> Option<&NamespaceReport> {
        self.namespaces.iter().find(|n| n.namespace == namespace)
    }

    /// No errors and not superseded
    pub fn is_clean(&self) -> bool {
        !self.superseded
            && self.errors.is_empty()
            && self.namespaces.iter().all(|n| n.errors.is_empty())
    }
}

enum PushOutcome {
    Pushed,
    RemoteWon,
    LocalWon,
}

pub struct SyncCoordinator {
    store: StoreHandle,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    pass: AtomicU64,
    states: Mutex<HashMap<String, NamespaceState>>,
    online: AtomicBool,
    visible: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(store: StoreHandle, remote: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
            pass: AtomicU64::new(0),
            states: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            visible: AtomicBool::new(true),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub async fn state(&self, namespace: &str) -> NamespaceState {
        self.states
            .lock()
            .await
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Run a pass now, ignoring the retry interval
    pub async fn sync_now(&self) -> SyncReport {
        self.sync(SyncTrigger::Explicit).await
    }

    /// Run a pass over every configured namespace.
    ///
    /// Starting a pass supersedes any pass still running; the older one
    /// stops applying results before its next local write.
    pub async fn sync(&self, trigger: SyncTrigger) -> SyncReport {
        let pass = self.begin_pass();
        self.run_pass(pass, trigger).await
    }

    /// Claim the next pass number, superseding any pass still running
    fn begin_pass(&self) -> u64 {
        self.pass.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn run_pass(&self, pass: u64, trigger: SyncTrigger) -> SyncReport {
        let mut report = SyncReport::default();

        let namespaces = match self.namespaces().await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                error!("Sync pass {} could not enumerate namespaces: {}", pass, e);
                report.errors.push(e.to_string());
                return report;
            }
        };

        info!(pass, ?trigger, namespaces = namespaces.len(), "Sync pass started");

        for namespace in namespaces {
            if trigger.is_automatic() && self.throttled(&namespace).await {
                debug!(namespace = %namespace, "Skipping namespace inside retry interval");
                report.throttled.push(namespace);
                continue;
            }

            self.set_status(&namespace, SyncStatus::Syncing).await;
            let mut ns_report = NamespaceReport {
                namespace: namespace.clone(),
                ..NamespaceReport::default()
            };
            let explicit = !trigger.is_automatic();
            let result = self.sync_namespace(pass, &namespace, explicit, &mut ns_report).await;

            match result {
                Ok(()) => self.finish(&namespace, &ns_report, None).await,
                Err(SyncError::Superseded) => {
                    info!(pass, namespace = %namespace, "Sync pass superseded");
                    self.set_status(&namespace, SyncStatus::Idle).await;
                    report.superseded = true;
                    report.namespaces.push(ns_report);
                    break;
                }
                Err(SyncError::Store(e)) => {
                    error!("Sync of namespace '{}' failed: {}", namespace, e);
                    ns_report.errors.push(e.to_string());
                    self.finish(&namespace, &ns_report, Some(e.to_string())).await;
                }
            }
            report.namespaces.push(ns_report);
        }

        if !report.superseded {
            if let Err(e) = self.record_sync_time(pass, "last_sync_at").await {
                warn!("Failed to record sync time: {}", e);
            }
        }

        info!(
            pass,
            pulled = report.pulled(),
            pushed = report.pushed(),
            conflicts = report.conflicts(),
            failed = report.failed(),
            "Sync pass finished"
        );
        report
    }

    async fn namespaces(&self) -> Result<Vec<String>, StoreError> {
        if !self.config.namespaces.is_empty() {
            return Ok(self.config.namespaces.clone());
        }
        let store = self.store.lock().await;
        let mut namespaces: Vec<String> = store.namespaces()?;
        for ns in store.pending_namespaces()? {
            if !namespaces.contains(&ns) {
                namespaces.push(ns);
            }
        }
        namespaces.sort();
        Ok(namespaces)
    }

    async fn throttled(&self, namespace: &str) -> bool {
        let states = self.states.lock().await;
        states
            .get(namespace)
            .and_then(|s| s.last_failure)
            .map(|at| at.elapsed() < self.config.min_retry_interval)
            .unwrap_or(false)
    }

    async fn set_status(&self, namespace: &str, status: SyncStatus) {
        let mut states = self.states.lock().await;
        states.entry(namespace.to_string()).or_default().status = status;
    }

    async fn finish(&self, namespace: &str, report: &NamespaceReport, failure: Option<String>) {
        let failure = failure.or_else(|| report.errors.first().cloned());
        let mut states = self.states.lock().await;
        let state = states.entry(namespace.to_string()).or_default();
        state.status = SyncStatus::Idle;
        match failure {
            Some(e) => {
                state.last_error = Some(e);
                state.last_failure = Some(Instant::now());
            }
            None => {
                state.last_error = None;
                state.last_failure = None;
                state.last_synced_at = Some(Utc::now());
            }
        }
    }

    /// Lock the store for a write of `pass`, failing if a newer pass began
    /// while waiting for the lock
    async fn lock_current(&self, pass: u64) -> Result<MutexGuard<'_, LocalStore>, SyncError> {
        let store = self.store.lock().await;
        self.ensure_current(pass)?;
        Ok(store)
    }

    fn ensure_current(&self, pass: u64) -> Result<(), SyncError> {
        if self.pass.load(Ordering::SeqCst) == pass {
            Ok(())
        } else {
            Err(SyncError::Superseded)
        }
    }

    async fn record_sync_time(&self, pass: u64, key: &str) -> Result<(), SyncError> {
        let mut store = self.lock_current(pass).await?;
        store.set_metadata(key, &Utc::now().to_rfc3339())?;
        Ok(())
    }

    async fn sync_namespace(
        &self,
        pass: u64,
        namespace: &str,
        explicit: bool,
        report: &mut NamespaceReport,
    ) -> Result<(), SyncError> {
        debug!(namespace, "Pulling remote changes");
        self.pull(pass, namespace, report).await?;

        debug!(namespace, "Pushing pending changes");
        self.push(pass, namespace, explicit, report).await?;

        if report.errors.is_empty() {
            self.record_sync_time(pass, &format!("last_sync:{}", namespace))
                .await?;
        }
        Ok(())
    }

    // === Pull ===

    async fn pull(
        &self,
        pass: u64,
        namespace: &str,
        report: &mut NamespaceReport,
    ) -> Result<(), SyncError> {
        let marker = self.store.lock().await.marker(namespace)?;
        let first_pass = marker.is_none();
        let mut remote_ids = HashSet::new();
        let mut highest = marker;
        let mut apply_failed = false;
        let batch = self.config.batch_size.max(1);
        let mut cursor: Option<String> = None;

        loop {
            // Keyset paging; '\0' makes the successor of the last id inclusive
            let mut options = ListOptions::namespace_range(namespace)
                .include_docs(true)
                .limit(batch);
            if let Some(last) = &cursor {
                options = options.start_key(format!("{}\u{0}", last));
            }
            if let Some(since) = marker {
                options = options.since(since);
            }

            let page = self.remote.list(namespace, &options).await?;
            let fetched = page.len();
            cursor = page.rows.last().map(|r| r.id.clone());

            let mut store = self.lock_current(pass).await?;
            for doc in page.into_docs() {
                highest = highest.max(Some(doc.revision));
                if first_pass {
                    remote_ids.insert(doc.id.clone());
                }
                match reconcile_pulled(&mut store, &doc) {
                    Ok(Reconciled::Applied) => report.pulled += 1,
                    Ok(Reconciled::LocalNewer) => report.conflicts += 1,
                    Ok(Reconciled::Unchanged) => {}
                    Err(e) => {
                        warn!("Failed to apply remote '{}': {}", doc.id, e);
                        apply_failed = true;
                        report.failed += 1;
                        report.errors.push(format!("{}: {}", doc.id, e));
                    }
                }
            }
            drop(store);

            if fetched < batch {
                break;
            }
        }

        let mut store = self.lock_current(pass).await?;

        // Local documents the remote has never seen get pushed
        if first_pass {
            let local = store.list(namespace, &ListOptions::namespace_range(namespace))?;
            for id in local.ids() {
                if !remote_ids.contains(id) {
                    store.enqueue_unsynced(id, None)?;
                }
            }
        }

        // A failed apply keeps the marker so the document is pulled again
        if !apply_failed {
            if let Some(rev) = highest {
                if Some(rev) != marker {
                    store.set_marker(namespace, rev)?;
                }
            }
        }
        Ok(())
    }

    // === Push ===

    async fn push(
        &self,
        pass: u64,
        namespace: &str,
        explicit: bool,
        report: &mut NamespaceReport,
    ) -> Result<(), SyncError> {
        let changes = self.store.lock().await.pending_changes(namespace)?;

        for change in changes {
            if !explicit && change.retry_count >= self.config.max_retries {
                report.skipped += 1;
                continue;
            }
            self.ensure_current(pass)?;

            match self.push_change(pass, &change).await {
                Ok(PushOutcome::Pushed) => report.pushed += 1,
                Ok(PushOutcome::RemoteWon) => report.conflicts += 1,
                Ok(PushOutcome::LocalWon) => {
                    report.conflicts += 1;
                    report.pushed += 1;
                }
                Err(SyncError::Superseded) => return Err(SyncError::Superseded),
                Err(SyncError::Store(e)) => {
                    warn!("Failed to push '{}': {}", change.doc_id, e);
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", change.doc_id, e));
                    self.lock_current(pass)
                        .await?
                        .record_failure(&change.doc_id, &e.to_string())?;
                }
            }
        }
        Ok(())
    }

    async fn push_change(&self, pass: u64, change: &PendingChange) -> Result<PushOutcome, SyncError> {
        let precondition = match change.base_revision {
            Some(rev) => Precondition::Revision(rev),
            None => Precondition::Absent,
        };

        match self.send(change, precondition).await {
            Ok(remote_rev) => {
                self.lock_current(pass).await?.mark_pushed(change, remote_rev)?;
                debug!(id = %change.doc_id, "Change pushed");
                Ok(PushOutcome::Pushed)
            }
            Err(StoreError::Conflict(reason)) => {
                debug!(id = %change.doc_id, reason = %reason, "Push conflicted");
                self.resolve_conflict(pass, change).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send one change; returns the revision the remote stored for puts
    async fn send(
        &self,
        change: &PendingChange,
        precondition: Precondition,
    ) -> Result<Option<u64>, StoreError> {
        match change.operation {
            ChangeOp::Put => {
                let doc = self.store.lock().await.get(&change.doc_id)?;
                let resp = self.remote.put(&doc, precondition).await?;
                Ok(Some(resp.revision))
            }
            ChangeOp::Delete => {
                self.remote.remove(&change.doc_id, precondition).await?;
                Ok(None)
            }
        }
    }

    /// Last-writer-wins between a rejected push and the remote copy
    async fn resolve_conflict(
        &self,
        pass: u64,
        change: &PendingChange,
    ) -> Result<PushOutcome, SyncError> {
        let remote = match self.remote.get(&change.doc_id).await {
            Ok(doc) => Some(doc),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        match remote {
            Some(remote_doc) if remote_doc.revision >= change.revision => {
                self.lock_current(pass).await?.apply_remote(&remote_doc)?;
                info!(id = %change.doc_id, "Conflict resolved, remote copy kept");
                Ok(PushOutcome::RemoteWon)
            }
            remote => {
                let precondition = match remote {
                    Some(doc) => Precondition::Revision(doc.revision),
                    None => Precondition::Absent,
                };
                let remote_rev = self.send(change, precondition).await?;
                self.lock_current(pass).await?.mark_pushed(change, remote_rev)?;
                info!(id = %change.doc_id, "Conflict resolved, local copy kept");
                Ok(PushOutcome::LocalWon)
            }
        }
    }

    // === Background task ===

    /// Spawn the background task. Passes run on the periodic interval and
    /// on the commands sent through the returned handle.
    ///
    /// Each pass runs in its own task, so a command arriving mid-pass starts
    /// a new pass that supersedes the running one. Periodic ticks never
    /// interrupt a running pass.
    pub fn start(self: Arc<Self>) -> SyncHandle {
        let (tx, mut rx) = mpsc::channel(100);
        let coordinator = self;

        let task = tokio::spawn(async move {
            let period = coordinator.config.interval.max(Duration::from_millis(1));
            let mut sync_interval = interval(period);
            sync_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            sync_interval.tick().await;

            let mut running: Option<JoinHandle<SyncReport>> = None;

            loop {
                tokio::select! {
                    _ = sync_interval.tick(), if coordinator.config.auto_sync => {
                        let idle = running.as_ref().map_or(true, |pass| pass.is_finished());
                        if idle && coordinator.should_run_automatic() {
                            debug!("Starting periodic sync");
                            running = Some(coordinator.spawn_pass(SyncTrigger::Periodic));
                        }
                    }

                    cmd = rx.recv() => {
                        let Some(cmd) = cmd else {
                            debug!("Sync command channel closed");
                            break;
                        };
                        match cmd {
                            SyncCommand::SyncNow => {
                                info!("Manual sync triggered");
                                running = Some(coordinator.spawn_pass(SyncTrigger::Explicit));
                            }
                            SyncCommand::SetOnline(online) => {
                                let was_online = coordinator.online.swap(online, Ordering::SeqCst);
                                if online {
                                    info!("Going online - will sync");
                                    if !was_online && coordinator.visible.load(Ordering::SeqCst) {
                                        running = Some(coordinator.spawn_pass(SyncTrigger::Connectivity));
                                    }
                                } else {
                                    warn!("Going offline - queueing changes");
                                }
                            }
                            SyncCommand::SetVisible(visible) => {
                                let was_visible = coordinator.visible.swap(visible, Ordering::SeqCst);
                                if visible && !was_visible && coordinator.is_online() {
                                    debug!("Became visible - syncing");
                                    running = Some(coordinator.spawn_pass(SyncTrigger::Visibility));
                                }
                            }
                            SyncCommand::Stop => {
                                info!("Sync coordinator stopping");
                                break;
                            }
                        }
                    }
                }
            }

            if let Some(pass) = running {
                if let Err(e) = pass.await {
                    error!("Sync pass ended abnormally: {}", e);
                }
            }
        });

        SyncHandle { tx, task }
    }

    /// Claim a pass number now and run the pass in its own task
    fn spawn_pass(self: &Arc<Self>, trigger: SyncTrigger) -> JoinHandle<SyncReport> {
        let pass = self.begin_pass();
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run_pass(pass, trigger).await })
    }

    fn should_run_automatic(&self) -> bool {
        self.online.load(Ordering::SeqCst) && self.visible.load(Ordering::SeqCst)
    }
}

enum Reconciled {
    Applied,
    LocalNewer,
    Unchanged,
}

/// Apply one pulled document unless the local copy is strictly newer
fn reconcile_pulled(store: &mut LocalStore, remote: &Document) -> Result<Reconciled, StoreError> {
    if let Some(change) = store.pending_change(&remote.id)? {
        if change.revision > remote.revision {
            // Local write stays queued, now against the revision just seen
            store.set_pending_base(&remote.id, Some(remote.revision))?;
            return Ok(Reconciled::LocalNewer);
        }
    } else if let Some(local) = store.try_get(&remote.id)? {
        if local == *remote {
            return Ok(Reconciled::Unchanged);
        }
        if local.revision > remote.revision {
            // Newer local copy the outbox never saw, push it over the pulled one
            store.enqueue_unsynced(&remote.id, Some(remote.revision))?;
            return Ok(Reconciled::LocalNewer);
        }
    }
    store.apply_remote(remote)?;
    Ok(Reconciled::Applied)
}

/// Handle to a running background sync task
pub struct SyncHandle {
    tx: mpsc::Sender<SyncCommand>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub async fn send(&self, cmd: SyncCommand) {
        if self.tx.send(cmd).await.is_err() {
            warn!("Sync task is no longer running");
        }
    }

    pub async fn sync_now(&self) {
        self.send(SyncCommand::SyncNow).await;
    }

    pub async fn set_online(&self, online: bool) {
        self.send(SyncCommand::SetOnline(online)).await;
    }

    pub async fn set_visible(&self, visible: bool) {
        self.send(SyncCommand::SetVisible(visible)).await;
    }

    /// Stop the task and wait for the current pass to end
    pub async fn stop(self) {
        self.send(SyncCommand::Stop).await;
        if let Err(e) = self.task.await {
            error!("Sync task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use async_trait::async_trait;
    use serde_json::json;
    use tilldb_core::{next_revision, ListResult, PutResponse, RemoveResponse, StoreResult};

    fn local() -> StoreHandle {
        StoreHandle::new(LocalStore::open_in_memory("test-device".to_string()).unwrap())
    }

    fn coordinator(store: &StoreHandle, remote: Arc<dyn RemoteStore>) -> SyncCoordinator {
        SyncCoordinator::new(store.clone(), remote, SyncConfig::default())
    }

    /// Remote whose listings come back empty, so conflicts surface on push
    struct HiddenListing(Arc<MemoryRemote>);

    #[async_trait]
    impl RemoteStore for HiddenListing {
        async fn get(&self, id: &str) -> StoreResult<Document> {
            self.0.get(id).await
        }

        async fn put(&self, doc: &Document, pre: Precondition) -> StoreResult<PutResponse> {
            self.0.put(doc, pre).await
        }

        async fn remove(&self, id: &str, pre: Precondition) -> StoreResult<RemoveResponse> {
            self.0.remove(id, pre).await
        }

        async fn list(&self, _namespace: &str, _options: &ListOptions) -> StoreResult<ListResult> {
            Ok(ListResult::default())
        }
    }

    #[tokio::test]
    async fn test_remote_newer_converges() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        store
            .lock()
            .await
            .apply_remote(&Document::new("products:1", json!({"name": "Burger"})).with_revision(1))
            .unwrap();
        remote
            .seed(Document::new("products:1", json!({"name": "Cheeseburger"})).with_revision(2))
            .await
            .unwrap();

        let report = coordinator(&store, remote.clone()).sync_now().await;
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.pulled(), 1);

        let doc = store.get("products:1").await.unwrap();
        assert_eq!(doc.get("name"), Some(json!("Cheeseburger")));
        assert_eq!(doc.revision, 2);
        assert_eq!(store.lock().await.marker("products").unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_push_restamps_local_revision() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        let put = store
            .put(Document::new("orders:1", json!({"customer_name": "Ana"})))
            .await
            .unwrap();

        let report = coordinator(&store, remote.clone()).sync_now().await;
        assert_eq!(report.pushed(), 1);

        let pushed = remote.peek("orders:1").await.unwrap();
        let local_doc = store.get("orders:1").await.unwrap();
        assert_eq!(local_doc, pushed);
        assert!(pushed.revision >= put.revision);
        assert_eq!(store.lock().await.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        store.put(Document::new("orders:a", json!({"total": 1}))).await.unwrap();
        store.put(Document::new("orders:b", json!({"total": 2}))).await.unwrap();
        remote.fail_id("orders:a").await;

        let sync = coordinator(&store, remote.clone());
        let report = sync.sync_now().await;
        let ns = report.namespace("orders").unwrap();
        assert_eq!(ns.pushed, 1);
        assert_eq!(ns.failed, 1);
        assert!(!report.superseded);

        assert!(remote.peek("orders:b").await.is_some());
        assert!(remote.peek("orders:a").await.is_none());

        let guard = store.lock().await;
        let change = guard.pending_change("orders:a").unwrap().unwrap();
        assert_eq!(change.retry_count, 1);
        assert!(change.last_error.is_some());
        assert!(guard.pending_change("orders:b").unwrap().is_none());
        drop(guard);

        assert!(sync.state("orders").await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_pending_local_write_beats_older_remote() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        remote
            .seed(Document::new("orders:1", json!({"status": "pending"})))
            .await
            .unwrap();
        store
            .put(Document::new("orders:1", json!({"status": "completed"})))
            .await
            .unwrap();

        let report = coordinator(&store, remote.clone()).sync_now().await;
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.conflicts(), 1);
        assert_eq!(report.pushed(), 1);

        let stored = remote.peek("orders:1").await.unwrap();
        assert_eq!(stored.get("status"), Some(json!("completed")));
        assert_eq!(store.get("orders:1").await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_newer_unqueued_local_copy_is_pushed() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        remote
            .seed(Document::new("products:1", json!({"name": "Old"})).with_revision(3))
            .await
            .unwrap();
        store
            .lock()
            .await
            .apply_remote(&Document::new("products:1", json!({"name": "New"})).with_revision(5))
            .unwrap();

        let report = coordinator(&store, remote.clone()).sync_now().await;
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.conflicts(), 1);
        assert_eq!(report.pushed(), 1);

        let stored = remote.peek("products:1").await.unwrap();
        assert_eq!(stored.get("name"), Some(json!("New")));
        assert_eq!(stored, store.get("products:1").await.unwrap());
        assert_eq!(store.lock().await.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_conflict_remote_wins() {
        let store = local();
        let inner = Arc::new(MemoryRemote::new());
        let future = next_revision(0) + 3_600_000;
        inner
            .seed(Document::new("orders:1", json!({"status": "cancelled"})).with_revision(future))
            .await
            .unwrap();
        store
            .put(Document::new("orders:1", json!({"status": "completed"})))
            .await
            .unwrap();

        let remote = Arc::new(HiddenListing(inner.clone()));
        let report = coordinator(&store, remote).sync_now().await;
        assert_eq!(report.conflicts(), 1);
        assert_eq!(report.pushed(), 0);

        let doc = store.get("orders:1").await.unwrap();
        assert_eq!(doc.get("status"), Some(json!("cancelled")));
        assert_eq!(doc.revision, future);
        assert_eq!(store.lock().await.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_conflict_local_wins() {
        let store = local();
        let inner = Arc::new(MemoryRemote::new());
        inner
            .seed(Document::new("orders:1", json!({"status": "pending"})))
            .await
            .unwrap();
        store
            .put(Document::new("orders:1", json!({"status": "completed"})))
            .await
            .unwrap();

        let remote = Arc::new(HiddenListing(inner.clone()));
        let report = coordinator(&store, remote).sync_now().await;
        assert_eq!(report.conflicts(), 1);
        assert_eq!(report.pushed(), 1);

        let stored = inner.peek("orders:1").await.unwrap();
        assert_eq!(stored.get("status"), Some(json!("completed")));
        assert_eq!(store.lock().await.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_propagates() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        let sync = coordinator(&store, remote.clone());

        store.put(Document::new("sales:1", json!({"total": 30}))).await.unwrap();
        sync.sync_now().await;
        assert!(remote.peek("sales:1").await.is_some());

        let doc = store.get("sales:1").await.unwrap();
        store.remove(&doc).await.unwrap();
        let report = sync.sync_now().await;
        assert!(report.is_clean(), "{:?}", report);
        assert!(remote.peek("sales:1").await.is_none());
    }

    #[tokio::test]
    async fn test_first_pass_pushes_local_only_documents() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        store
            .lock()
            .await
            .apply_remote(&Document::new("products:9", json!({"name": "Fries"})).with_revision(7))
            .unwrap();

        let report = coordinator(&store, remote.clone()).sync_now().await;
        assert_eq!(report.pushed(), 1);
        assert_eq!(remote.peek("products:9").await.unwrap().revision, 7);
    }

    #[tokio::test]
    async fn test_marker_limits_later_pulls() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        for i in 0..5 {
            remote
                .seed(Document::new(format!("products:{}", i), json!({"n": i})))
                .await
                .unwrap();
        }
        let config = SyncConfig {
            batch_size: 2,
            namespaces: vec!["products".to_string()],
            ..SyncConfig::default()
        };
        let sync = SyncCoordinator::new(store.clone(), remote.clone(), config);

        let report = sync.sync_now().await;
        assert_eq!(report.pulled(), 5);
        assert_eq!(remote.list_count(), 3);

        let report = sync.sync_now().await;
        assert_eq!(report.pulled(), 0);

        remote
            .seed(Document::new("products:2", json!({"n": 20})))
            .await
            .unwrap();
        let report = sync.sync_now().await;
        assert_eq!(report.pulled(), 1);
        assert_eq!(store.get("products:2").await.unwrap().get("n"), Some(json!(20)));
    }

    #[tokio::test]
    async fn test_failed_namespace_is_throttled() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        store.put(Document::new("orders:1", json!({"total": 1}))).await.unwrap();
        remote.set_online(false);

        let config = SyncConfig {
            min_retry_interval: Duration::from_secs(3600),
            ..SyncConfig::default()
        };
        let sync = SyncCoordinator::new(store.clone(), remote.clone(), config);

        let report = sync.sync(SyncTrigger::Periodic).await;
        assert!(!report.is_clean());
        assert_eq!(sync.state("orders").await.status, SyncStatus::Idle);

        let report = sync.sync(SyncTrigger::Connectivity).await;
        assert_eq!(report.throttled, vec!["orders"]);
        assert!(report.namespaces.is_empty());

        // Explicit passes ignore the retry interval
        remote.set_online(true);
        let report = sync.sync_now().await;
        assert!(report.throttled.is_empty());
        assert_eq!(report.pushed(), 1);
        assert!(sync.state("orders").await.last_error.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_changes_wait_for_explicit_sync() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        store.put(Document::new("orders:1", json!({"total": 1}))).await.unwrap();
        remote.fail_id("orders:1").await;

        let config = SyncConfig {
            max_retries: 1,
            min_retry_interval: Duration::ZERO,
            ..SyncConfig::default()
        };
        let sync = SyncCoordinator::new(store.clone(), remote.clone(), config);

        assert_eq!(sync.sync(SyncTrigger::Periodic).await.failed(), 1);
        let report = sync.sync(SyncTrigger::Periodic).await;
        assert_eq!(report.namespace("orders").unwrap().skipped, 1);

        remote.heal_id("orders:1").await;
        assert_eq!(sync.sync_now().await.pushed(), 1);
    }

    #[tokio::test]
    async fn test_newer_pass_supersedes_running_one() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        remote
            .seed(Document::new("products:1", json!({"name": "Burger"})))
            .await
            .unwrap();
        remote.set_latency(Some(Duration::from_millis(200))).await;

        let config = SyncConfig {
            namespaces: vec!["products".to_string()],
            ..SyncConfig::default()
        };
        let sync = Arc::new(SyncCoordinator::new(store.clone(), remote.clone(), config));

        let first = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_now().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = sync.sync_now().await;
        let first = first.await.unwrap();

        assert!(first.superseded);
        assert_eq!(first.pulled(), 0);
        assert!(!second.superseded);
        assert_eq!(second.pulled(), 1);
    }

    #[tokio::test]
    async fn test_pass_superseded_while_waiting_for_store_lock() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        remote
            .seed(Document::new("products:1", json!({"name": "Burger"})))
            .await
            .unwrap();
        remote.set_latency(Some(Duration::from_millis(200))).await;

        let config = SyncConfig {
            namespaces: vec!["products".to_string()],
            ..SyncConfig::default()
        };
        let sync = Arc::new(SyncCoordinator::new(store.clone(), remote.clone(), config));

        let first = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_now().await }
        });

        // The pass is listing; hold the store until the listing returns
        tokio::time::sleep(Duration::from_millis(50)).await;
        let guard = store.lock().await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        sync.begin_pass();
        drop(guard);

        let first = first.await.unwrap();
        assert!(first.superseded);
        assert!(store.lock().await.try_get("products:1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_background_trigger_supersedes_running_pass() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        remote
            .seed(Document::new("products:1", json!({"name": "Burger"})))
            .await
            .unwrap();
        remote.set_latency(Some(Duration::from_millis(300))).await;

        let config = SyncConfig {
            auto_sync: false,
            namespaces: vec!["products".to_string()],
            ..SyncConfig::default()
        };
        let sync = Arc::new(SyncCoordinator::new(store.clone(), remote.clone(), config));
        let handle = sync.clone().start();

        handle.sync_now().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.sync_now().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sync.pass.load(Ordering::SeqCst), 2);

        let mut pulled = false;
        for _ in 0..100 {
            if store.lock().await.try_get("products:1").unwrap().is_some() {
                pulled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(pulled);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_background_task_handles_commands() {
        let store = local();
        let remote = Arc::new(MemoryRemote::new());
        let config = SyncConfig {
            auto_sync: false,
            ..SyncConfig::default()
        };
        let sync = Arc::new(SyncCoordinator::new(store.clone(), remote.clone(), config));
        let handle = sync.clone().start();

        store.put(Document::new("orders:1", json!({"total": 9}))).await.unwrap();
        handle.sync_now().await;

        let mut pushed = false;
        for _ in 0..50 {
            if remote.peek("orders:1").await.is_some() {
                pushed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(pushed);

        handle.set_online(false).await;
        handle.stop().await;
        assert!(!sync.is_online());
    }
}
