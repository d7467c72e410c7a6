use rocksdb::{Direction, IteratorMode, DB};
use std::sync::Arc;
use tilldb_core::{Medium, StoreError, StoreResult};

/// [`Medium`] over the default column family of a RocksDB instance.
///
/// Keys compare bytewise, which matches the ordering of UTF-8 ids.
pub struct RocksMedium {
    db: Arc<DB>,
}

impl RocksMedium {
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }
}

fn medium_error(err: rocksdb::Error) -> StoreError {
    let message = err.into_string();
    if message.contains("No space left") {
        StoreError::StorageFull(message)
    } else {
        StoreError::Medium(message)
    }
}

impl Medium for RocksMedium {
    fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.db.get(key.as_bytes()).map_err(medium_error)
    }

    fn write(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.db.put(key.as_bytes(), value).map_err(medium_error)
    }

    fn delete(&mut self, key: &str) -> StoreResult<bool> {
        let existed = self
            .db
            .get_pinned(key.as_bytes())
            .map_err(medium_error)?
            .is_some();
        if existed {
            self.db.delete(key.as_bytes()).map_err(medium_error)?;
        }
        Ok(existed)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(medium_error)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            match String::from_utf8(key.to_vec()) {
                Ok(key) => keys.push(key),
                Err(_) => tracing::warn!("Skipping non UTF-8 key in document keyspace"),
            }
        }
        Ok(keys)
    }
}
