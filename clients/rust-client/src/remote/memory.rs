use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tilldb_core::{
    Authority, Document, DocumentStore, ListOptions, ListResult, MemoryMedium, Precondition,
    PutResponse, RemoveResponse, StoreError, StoreResult,
};
use tokio::sync::Mutex;

use super::RemoteStore;

/// In-process authoritative copy.
///
/// Applies the same revision rules as the server. Connectivity loss and
/// per-document failures can be injected for tests and offline demos.
pub struct MemoryRemote {
    authority: Mutex<Authority<MemoryMedium>>,
    failing: Mutex<HashSet<String>>,
    online: AtomicBool,
    latency: Mutex<Option<Duration>>,
    puts: AtomicUsize,
    lists: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let store = DocumentStore::new(MemoryMedium::new());
        Self {
            authority: Mutex::new(Authority::with_clock(store, 0)),
            failing: Mutex::new(HashSet::new()),
            online: AtomicBool::new(true),
            latency: Mutex::new(None),
            puts: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        }
    }

    /// Simulate losing or regaining connectivity
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Every operation on `id` fails with `Unavailable` until healed
    pub async fn fail_id(&self, id: &str) {
        self.failing.lock().await.insert(id.to_string());
    }

    pub async fn heal_id(&self, id: &str) {
        self.failing.lock().await.remove(id);
    }

    /// Delay applied before every operation
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().await = latency;
    }

    /// Write directly on the authoritative side, as another device would
    pub async fn seed(&self, doc: Document) -> StoreResult<PutResponse> {
        self.authority.lock().await.put(doc, Precondition::Any)
    }

    /// Authoritative copy of a document, bypassing fault injection
    pub async fn peek(&self, id: &str) -> Option<Document> {
        self.authority.lock().await.store().try_get(id).ok().flatten()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    async fn check(&self, id: Option<&str>) -> StoreResult<()> {
        let latency = *self.latency.lock().await;
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("remote is offline".to_string()));
        }
        if let Some(id) = id {
            if self.failing.lock().await.contains(id) {
                return Err(StoreError::Unavailable(format!("injected failure for '{}'", id)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get(&self, id: &str) -> StoreResult<Document> {
        self.check(Some(id)).await?;
        self.authority.lock().await.get(id)
    }

    async fn put(&self, doc: &Document, precondition: Precondition) -> StoreResult<PutResponse> {
        self.check(Some(&doc.id)).await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.authority.lock().await.put(doc.clone(), precondition)
    }

    async fn remove(&self, id: &str, precondition: Precondition) -> StoreResult<RemoveResponse> {
        self.check(Some(id)).await?;
        self.authority.lock().await.remove(id, precondition)
    }

    async fn list(&self, namespace: &str, options: &ListOptions) -> StoreResult<ListResult> {
        self.check(None).await?;
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.authority.lock().await.list(namespace, options)
    }
}
