//! Offline Local Storage
//!
//! SQLite-backed local store. Documents live in a flat `documents` table
//! keyed by id; sync bookkeeping (pending changes, markers, device id) lives
//! in separate tables outside the document key-space.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use tilldb_core::{
    keyspace, next_revision, Document, DocumentStore, ListOptions, ListResult, Medium,
    PutResponse, RemoveResponse, StoreError, StoreResult,
};
use tokio::sync::{Mutex, MutexGuard};

/// Map SQLite failures onto the store taxonomy
pub(crate) fn sqlite_error(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DiskFull) => StoreError::StorageFull(err.to_string()),
        _ => StoreError::Medium(err.to_string()),
    }
}

/// Flat key/value medium over a SQLite table
pub struct SqliteMedium {
    conn: Connection,
}

impl SqliteMedium {
    fn new(conn: Connection) -> StoreResult<Self> {
        let medium = Self { conn };
        medium.init_schema().map_err(sqlite_error)?;
        Ok(medium)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        // Documents, one row per id
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
            [],
        )?;

        // Pending changes queue, coalesced per document
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS pending_changes (
                doc_id TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                operation TEXT NOT NULL,
                revision INTEGER NOT NULL,
                base_revision INTEGER,
                queued_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )",
            [],
        )?;

        // Sync metadata (device id, markers, ...)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pending_namespace ON pending_changes(namespace, queued_at)",
            [],
        )?;

        Ok(())
    }

    /// Cap the database file size. Writes beyond it fail with `StorageFull`.
    fn set_quota_bytes(&self, bytes: u64) -> StoreResult<()> {
        let page_size: i64 = self
            .conn
            .pragma_query_value(None, "page_size", |row| row.get(0))
            .map_err(sqlite_error)?;
        let pages = (bytes as i64 / page_size.max(1)).max(1);
        self.conn
            .pragma_update(None, "max_page_count", pages)
            .map_err(sqlite_error)?;
        Ok(())
    }
}

impl Medium for SqliteMedium {
    fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT data FROM documents WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|data| data.map(String::into_bytes))
            .map_err(sqlite_error)
    }

    fn write(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        let data = std::str::from_utf8(value)
            .map_err(|e| StoreError::Medium(format!("document body is not UTF-8: {}", e)))?;
        self.conn
            .execute(
                "INSERT INTO documents (key, data) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET data = excluded.data",
                params![key, data],
            )
            .map_err(sqlite_error)?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StoreResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM documents WHERE key = ?1", params![key])
            .map_err(sqlite_error)?;
        Ok(removed > 0)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM documents WHERE key >= ?1 ORDER BY key")
            .map_err(sqlite_error)?;
        let rows = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))
            .map_err(sqlite_error)?;

        let mut keys = Vec::new();
        for key in rows {
            let key = key.map_err(sqlite_error)?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    fn len(&self) -> StoreResult<usize> {
        self.conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(sqlite_error)
    }
}

/// Configuration for the offline queue bounds
///
/// When the queue is full, writes that would add a new pending change are
/// rejected with `StorageFull` instead of dropping queued changes.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of pending changes (default: 10,000)
    pub max_count: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_count: 10_000 }
    }
}

impl QueueConfig {
    pub fn new(max_count: usize) -> Self {
        Self { max_count }
    }

    /// Config for a register terminal with little storage
    pub fn terminal() -> Self {
        Self { max_count: 1_000 }
    }

    /// Config for a back-office desktop
    pub fn desktop() -> Self {
        Self { max_count: 50_000 }
    }
}

/// Options for opening a [`LocalStore`]
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Namespace for documents put without an id
    pub default_namespace: Option<String>,
    /// Database size cap in bytes
    pub quota_bytes: Option<u64>,
    pub queue: QueueConfig,
}

/// Kind of a queued change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Put,
    Delete,
}

impl ChangeOp {
    fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Put => "PUT",
            ChangeOp::Delete => "DELETE",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "DELETE" => ChangeOp::Delete,
            _ => ChangeOp::Put,
        }
    }
}

/// A local change waiting to be pushed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub doc_id: String,
    pub namespace: String,
    pub operation: ChangeOp,
    /// Local revision of the change
    pub revision: u64,
    /// Last revision known to the remote, `None` if never pushed or pulled
    pub base_revision: Option<u64>,
    pub queued_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// Local storage with a sync outbox
pub struct LocalStore {
    docs: DocumentStore<SqliteMedium>,
    device_id: String,
    queue: QueueConfig,
}

impl LocalStore {
    /// Open or create a local store at the given path
    pub fn open<P: AsRef<Path>>(path: P, device_id: String) -> StoreResult<Self> {
        Self::open_with(path, device_id, StoreOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        device_id: String,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(sqlite_error)?;
        Self::from_connection(conn, device_id, options)
    }

    /// Store that lives only as long as the process
    pub fn open_in_memory(device_id: String) -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(sqlite_error)?;
        Self::from_connection(conn, device_id, StoreOptions::default())
    }

    /// Open a local store in the default location (user data directory)
    pub fn open_default(app_name: &str, device_id: String) -> StoreResult<Self> {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf())
            })
            .join(app_name);

        std::fs::create_dir_all(&data_dir).map_err(|e| {
            StoreError::Medium(format!("cannot create {}: {}", data_dir.display(), e))
        })?;

        Self::open(data_dir.join("tilldb.db"), device_id)
    }

    fn from_connection(
        conn: Connection,
        device_id: String,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        let medium = SqliteMedium::new(conn)?;
        if let Some(bytes) = options.quota_bytes {
            medium.set_quota_bytes(bytes)?;
        }

        let mut docs = DocumentStore::new(medium);
        if let Some(ns) = &options.default_namespace {
            docs = docs.with_default_namespace(ns)?;
        }

        let mut store = Self {
            docs,
            device_id,
            queue: options.queue,
        };

        // An empty device id reuses the stored one, or mints a new one
        if store.device_id.is_empty() {
            store.device_id = match store.get_metadata("device_id")? {
                Some(id) => id,
                None => uuid::Uuid::new_v4().to_string(),
            };
        }
        let device_id = store.device_id.clone();
        store.set_metadata("device_id", &device_id)?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.docs.medium().conn
    }

    /// Run `f` inside a savepoint; any error rolls back every write it made.
    ///
    /// Document writes go through the medium, so the savepoint is driven
    /// with plain statements rather than a borrowed `Transaction`.
    fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> StoreResult<T>) -> StoreResult<T> {
        self.conn()
            .execute_batch("SAVEPOINT local_write")
            .map_err(sqlite_error)?;

        let result = f(self).and_then(|value| {
            self.conn()
                .execute_batch("RELEASE local_write")
                .map_err(sqlite_error)?;
            Ok(value)
        });

        if result.is_err() {
            if let Err(e) = self
                .conn()
                .execute_batch("ROLLBACK TO local_write; RELEASE local_write")
            {
                tracing::error!("Failed to roll back local write: {}", e);
            }
        }
        result
    }

    // === Document Operations ===

    pub fn get(&self, id: &str) -> StoreResult<Document> {
        self.docs.get(id)
    }

    pub fn try_get(&self, id: &str) -> StoreResult<Option<Document>> {
        self.docs.try_get(id)
    }

    /// Store a document locally and queue it for push
    pub fn put(&mut self, doc: Document) -> StoreResult<PutResponse> {
        let previous = if keyspace::validate_id(&doc.id).is_ok() {
            self.docs.try_get(&doc.id)?
        } else {
            None
        };
        if previous.is_none() || self.pending_change(&doc.id)?.is_none() {
            self.ensure_queue_capacity()?;
        }

        let previous_rev = previous.as_ref().map(|d| d.revision);
        self.atomically(|store| {
            let resp = store.docs.put(doc)?;
            if previous_rev != Some(resp.revision) {
                store.enqueue(&resp.id, ChangeOp::Put, resp.revision, previous_rev)?;
            }
            Ok(resp)
        })
    }

    /// Read, shallow-merge, put. Not atomic with respect to other writers.
    pub fn merge(&mut self, id: &str, patch: Value) -> StoreResult<PutResponse> {
        let mut doc = self.docs.get(id)?;
        doc.merge(patch);
        self.put(doc)
    }

    pub fn remove(&mut self, doc: &Document) -> StoreResult<RemoveResponse> {
        self.remove_id(&doc.id)
    }

    /// Delete a document locally and queue the removal for push
    pub fn remove_id(&mut self, id: &str) -> StoreResult<RemoveResponse> {
        let Some(previous) = self.docs.try_get(id)? else {
            return Ok(RemoveResponse { ok: true });
        };

        let pending = self.pending_change(id)?;
        let known_remotely = match &pending {
            Some(change) => change.base_revision.is_some(),
            None => true,
        };
        if pending.is_none() {
            self.ensure_queue_capacity()?;
        }

        self.atomically(|store| {
            let resp = store.docs.remove_id(id)?;
            if known_remotely {
                let base = match pending {
                    Some(change) => change.base_revision,
                    None => Some(previous.revision),
                };
                store.enqueue(id, ChangeOp::Delete, next_revision(previous.revision), base)?;
            } else {
                // Never reached the remote, nothing to delete there
                store.drop_pending(id)?;
            }
            Ok(resp)
        })
    }

    /// Remove every document of a namespace and forget its pending changes.
    ///
    /// Local reset only; nothing is pushed.
    pub fn clear(&mut self, namespace: &str) -> StoreResult<usize> {
        let removed = self.docs.clear(namespace)?;
        self.conn()
            .execute(
                "DELETE FROM pending_changes WHERE namespace = ?1",
                params![namespace],
            )
            .map_err(sqlite_error)?;
        self.delete_metadata(&marker_key(namespace))?;
        Ok(removed)
    }

    pub fn list(&self, namespace: &str, options: &ListOptions) -> StoreResult<ListResult> {
        self.docs.list(namespace, options)
    }

    pub fn namespaces(&self) -> StoreResult<Vec<String>> {
        self.docs.namespaces()
    }

    // === Sync-side Operations ===

    /// Write a reconciled remote document and drop its pending change
    pub fn apply_remote(&mut self, doc: &Document) -> StoreResult<()> {
        self.atomically(|store| {
            store.docs.put_synced(doc)?;
            store.drop_pending(&doc.id)
        })
    }

    /// Record a successful push of `change`; the remote stored it at
    /// `remote_revision` (`None` for deletes).
    ///
    /// A local write that raced the push keeps its queue entry and only
    /// learns the new base revision.
    pub fn mark_pushed(
        &mut self,
        change: &PendingChange,
        remote_revision: Option<u64>,
    ) -> StoreResult<()> {
        let current = self.pending_change(&change.doc_id)?;
        let unchanged = current
            .as_ref()
            .map(|c| c.revision == change.revision && c.operation == change.operation)
            .unwrap_or(false);

        if unchanged {
            self.drop_pending(&change.doc_id)?;
            if let (ChangeOp::Put, Some(remote_rev)) = (change.operation, remote_revision) {
                if let Some(mut doc) = self.docs.try_get(&change.doc_id)? {
                    if doc.revision == change.revision && doc.revision != remote_rev {
                        doc.revision = remote_rev;
                        self.docs.put_synced(&doc)?;
                    }
                }
            }
        } else if current.is_some() {
            self.set_pending_base(&change.doc_id, remote_revision)?;
        }
        Ok(())
    }

    /// Point a queued change at the revision the remote now holds
    pub fn set_pending_base(&mut self, id: &str, base_revision: Option<u64>) -> StoreResult<()> {
        self.conn()
            .execute(
                "UPDATE pending_changes SET base_revision = ?1 WHERE doc_id = ?2",
                params![base_revision.map(|r| r as i64), id],
            )
            .map_err(sqlite_error)?;
        Ok(())
    }

    /// Queue a push for a local document the outbox does not hold.
    ///
    /// `base_revision` is the revision the remote holds, `None` when the
    /// remote has never seen the document.
    pub fn enqueue_unsynced(&mut self, id: &str, base_revision: Option<u64>) -> StoreResult<()> {
        if self.pending_change(id)?.is_some() {
            return Ok(());
        }
        if let Some(doc) = self.docs.try_get(id)? {
            self.enqueue(id, ChangeOp::Put, doc.revision, base_revision)?;
        }
        Ok(())
    }

    // === Pending Changes ===

    fn ensure_queue_capacity(&self) -> StoreResult<()> {
        let count = self.pending_count()?;
        if count >= self.queue.max_count {
            return Err(StoreError::StorageFull(format!(
                "sync queue holds {} changes, limit is {}",
                count, self.queue.max_count
            )));
        }
        Ok(())
    }

    fn enqueue(
        &mut self,
        id: &str,
        operation: ChangeOp,
        revision: u64,
        base_revision: Option<u64>,
    ) -> StoreResult<()> {
        let namespace = keyspace::namespace_of(id).unwrap_or_default();
        let now = chrono::Utc::now().timestamp_millis();

        // Coalesce: the latest operation wins, the first base revision stays
        self.conn()
            .execute(
                "INSERT INTO pending_changes (doc_id, namespace, operation, revision, base_revision, queued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(doc_id) DO UPDATE SET
                 operation = excluded.operation,
                 revision = excluded.revision,
                 queued_at = excluded.queued_at",
                params![
                    id,
                    namespace,
                    operation.as_str(),
                    revision as i64,
                    base_revision.map(|r| r as i64),
                    now
                ],
            )
            .map_err(sqlite_error)?;

        tracing::debug!(id, op = operation.as_str(), revision, "change queued");
        Ok(())
    }

    pub fn pending_change(&self, id: &str) -> StoreResult<Option<PendingChange>> {
        self.conn()
            .query_row(
                "SELECT doc_id, namespace, operation, revision, base_revision, queued_at, retry_count, last_error
                 FROM pending_changes WHERE doc_id = ?1",
                params![id],
                row_to_change,
            )
            .optional()
            .map_err(sqlite_error)
    }

    /// Pending changes of a namespace, oldest first
    pub fn pending_changes(&self, namespace: &str) -> StoreResult<Vec<PendingChange>> {
        let mut stmt = self
            .conn()
            .prepare(
                "SELECT doc_id, namespace, operation, revision, base_revision, queued_at, retry_count, last_error
                 FROM pending_changes WHERE namespace = ?1
                 ORDER BY queued_at ASC, doc_id ASC",
            )
            .map_err(sqlite_error)?;
        let rows = stmt
            .query_map(params![namespace], row_to_change)
            .map_err(sqlite_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sqlite_error)
    }

    /// Namespaces with at least one pending change
    pub fn pending_namespaces(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT DISTINCT namespace FROM pending_changes ORDER BY namespace")
            .map_err(sqlite_error)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sqlite_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sqlite_error)
    }

    pub fn pending_count(&self) -> StoreResult<usize> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(sqlite_error)
    }

    fn drop_pending(&mut self, id: &str) -> StoreResult<()> {
        self.conn()
            .execute("DELETE FROM pending_changes WHERE doc_id = ?1", params![id])
            .map_err(sqlite_error)?;
        Ok(())
    }

    /// Increment the retry count of a change after a failed push
    pub fn record_failure(&mut self, id: &str, error: &str) -> StoreResult<()> {
        self.conn()
            .execute(
                "UPDATE pending_changes SET retry_count = retry_count + 1, last_error = ?1
                 WHERE doc_id = ?2",
                params![error, id],
            )
            .map_err(sqlite_error)?;
        Ok(())
    }

    // === Metadata ===

    pub fn set_metadata(&mut self, key: &str, value: &str) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn()
            .execute(
                "INSERT INTO sync_metadata (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .map_err(sqlite_error)?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> StoreResult<Option<String>> {
        self.conn()
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sqlite_error)
    }

    fn delete_metadata(&mut self, key: &str) -> StoreResult<()> {
        self.conn()
            .execute("DELETE FROM sync_metadata WHERE key = ?1", params![key])
            .map_err(sqlite_error)?;
        Ok(())
    }

    /// Highest remote revision pulled for a namespace
    pub fn marker(&self, namespace: &str) -> StoreResult<Option<u64>> {
        Ok(self
            .get_metadata(&marker_key(namespace))?
            .and_then(|v| v.parse().ok()))
    }

    pub fn set_marker(&mut self, namespace: &str, revision: u64) -> StoreResult<()> {
        self.set_metadata(&marker_key(namespace), &revision.to_string())
    }

    // === Utility ===

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn default_namespace(&self) -> &str {
        self.docs.default_namespace()
    }
}

fn marker_key(namespace: &str) -> String {
    format!("marker:{}", namespace)
}

fn row_to_change(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingChange> {
    let operation: String = row.get(2)?;
    let revision: i64 = row.get(3)?;
    let base_revision: Option<i64> = row.get(4)?;
    let retry_count: i64 = row.get(6)?;
    Ok(PendingChange {
        doc_id: row.get(0)?,
        namespace: row.get(1)?,
        operation: ChangeOp::parse(&operation),
        revision: revision as u64,
        base_revision: base_revision.map(|r| r as u64),
        queued_at: row.get(5)?,
        retry_count: retry_count as u32,
        last_error: row.get(7)?,
    })
}

/// Cloneable handle to a shared [`LocalStore`].
///
/// Each call holds the lock only for its own duration; a `get` followed by
/// a `put` is not atomic.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<LocalStore>>,
}

impl StoreHandle {
    pub fn new(store: LocalStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Exclusive access for a sequence of operations
    pub async fn lock(&self) -> MutexGuard<'_, LocalStore> {
        self.inner.lock().await
    }

    pub async fn get(&self, id: &str) -> StoreResult<Document> {
        self.inner.lock().await.get(id)
    }

    pub async fn put(&self, doc: Document) -> StoreResult<PutResponse> {
        self.inner.lock().await.put(doc)
    }

    pub async fn merge(&self, id: &str, patch: Value) -> StoreResult<PutResponse> {
        self.inner.lock().await.merge(id, patch)
    }

    pub async fn remove(&self, doc: &Document) -> StoreResult<RemoveResponse> {
        self.inner.lock().await.remove(doc)
    }

    pub async fn list(&self, namespace: &str, options: &ListOptions) -> StoreResult<ListResult> {
        self.inner.lock().await.list(namespace, options)
    }

    pub async fn clear(&self, namespace: &str) -> StoreResult<usize> {
        self.inner.lock().await.clear(namespace)
    }
}
