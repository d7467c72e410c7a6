use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tilldb_core::{
    Authority, Document, DocumentStore, ListOptions, ListResult, Precondition, PutResponse,
    RemoveResponse, DEFAULT_NAMESPACE,
};

use super::medium::RocksMedium;
use crate::error::{DbError, DbResult};

/// Metadata column family name
const META_CF: &str = "_meta";

/// Highest revision ever issued, so restarts never reuse one
const LAST_ISSUED_KEY: &[u8] = b"last_issued";

/// The authoritative storage engine backed by RocksDB
pub struct StorageEngine {
    /// Precondition check, stamping and write happen under this lock
    authority: Mutex<Authority<RocksMedium>>,
    db: Arc<DB>,
    path: PathBuf,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path)
            .finish()
    }
}

impl StorageEngine {
    /// Create a new storage engine
    pub fn new<P: AsRef<Path>>(data_dir: P) -> DbResult<Self> {
        Self::with_default_namespace(data_dir, DEFAULT_NAMESPACE)
    }

    pub fn with_default_namespace<P: AsRef<Path>>(data_dir: P, namespace: &str) -> DbResult<Self> {
        let path = data_dir.as_ref().to_path_buf();

        // Configure RocksDB options
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        // Limit WAL file size to prevent unbounded disk growth
        opts.set_max_total_wal_size(50 * 1024 * 1024);
        opts.set_keep_log_file_num(5);
        opts.set_recycle_log_file_num(3);

        // Get existing column families or create default
        let mut cf_names = match DB::list_cf(&opts, &path) {
            Ok(cfs) => cfs,
            Err(_) => vec!["default".to_string()],
        };
        if !cf_names.contains(&META_CF.to_string()) {
            cf_names.push(META_CF.to_string());
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)
            .map_err(|e| DbError::InternalError(format!("Failed to open RocksDB: {}", e)))?;
        let db = Arc::new(db);

        let persisted = read_last_issued(&db)?;
        let store =
            DocumentStore::new(RocksMedium::new(db.clone())).with_default_namespace(namespace)?;
        let authority = Authority::new(store)?.with_last_issued(persisted);

        tracing::info!(
            path = %path.display(),
            last_issued = authority.last_issued(),
            "Storage engine opened"
        );

        Ok(Self {
            authority: Mutex::new(authority),
            db,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest revision issued so far
    pub fn last_issued(&self) -> u64 {
        self.authority.lock().last_issued()
    }

    pub fn get(&self, id: &str) -> DbResult<Document> {
        Ok(self.authority.lock().get(id)?)
    }

    /// Store a document if `precondition` holds, stamping the next revision
    pub fn put(&self, doc: Document, precondition: Precondition) -> DbResult<PutResponse> {
        let mut authority = self.authority.lock();
        let before = authority.last_issued();
        let resp = authority.put(doc, precondition)?;
        if authority.last_issued() != before {
            self.persist_last_issued(authority.last_issued())?;
        }
        Ok(resp)
    }

    pub fn remove(&self, id: &str, precondition: Precondition) -> DbResult<RemoveResponse> {
        Ok(self.authority.lock().remove(id, precondition)?)
    }

    pub fn list(&self, namespace: &str, options: &ListOptions) -> DbResult<ListResult> {
        Ok(self.authority.lock().list(namespace, options)?)
    }

    pub fn namespaces(&self) -> DbResult<Vec<String>> {
        Ok(self.authority.lock().store().namespaces()?)
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn persist_last_issued(&self, revision: u64) -> DbResult<()> {
        let meta_cf = self
            .db
            .cf_handle(META_CF)
            .ok_or_else(|| DbError::InternalError("META_CF missing".to_string()))?;
        self.db
            .put_cf(meta_cf, LAST_ISSUED_KEY, revision.to_string().as_bytes())?;
        Ok(())
    }
}

fn read_last_issued(db: &DB) -> DbResult<u64> {
    let meta_cf = db
        .cf_handle(META_CF)
        .ok_or_else(|| DbError::InternalError("META_CF missing".to_string()))?;
    let value = db.get_cf(meta_cf, LAST_ISSUED_KEY)?;
    Ok(value
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0))
}
