//! Persistent media backing a [`DocumentStore`](crate::store::DocumentStore).
//!
//! A medium is a flat string-keyed byte map, the equivalent of browser
//! local storage. It knows nothing about documents or namespaces.

use std::collections::BTreeMap;

use crate::error::{StoreError, StoreResult};

/// Flat key/value medium.
///
/// Implementations must apply every mutating call synchronously; there is
/// no flush step.
pub trait Medium {
    fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or overwrite `key`. Quota exhaustion is reported as
    /// [`StoreError::StorageFull`].
    fn write(&mut self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`, returning whether it existed.
    fn delete(&mut self, key: &str) -> StoreResult<bool>;

    /// Keys starting with `prefix`. Order is not guaranteed.
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.read(key)?.is_some())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.keys_with_prefix("")?.len())
    }

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// In-memory medium with an optional byte quota
#[derive(Debug, Default, Clone)]
pub struct MemoryMedium {
    entries: BTreeMap<String, Vec<u8>>,
    used_bytes: usize,
    quota_bytes: Option<usize>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Medium that rejects writes once keys plus values exceed `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }
}

impl Medium for MemoryMedium {
    fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        let released = self
            .entries
            .get(key)
            .map(|old| key.len() + old.len())
            .unwrap_or(0);
        let projected = self.used_bytes - released + key.len() + value.len();

        if let Some(quota) = self.quota_bytes {
            if projected > quota {
                return Err(StoreError::StorageFull(format!(
                    "writing '{}' needs {} bytes, quota is {}",
                    key, projected, quota
                )));
            }
        }

        self.entries.insert(key.to_string(), value.to_vec());
        self.used_bytes = projected;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StoreResult<bool> {
        match self.entries.remove(key) {
            Some(old) => {
                self.used_bytes -= key.len() + old.len();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.entries.len())
    }
}
