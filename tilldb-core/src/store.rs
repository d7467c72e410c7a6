//! Document store over a [`Medium`].
//!
//! Keys are stored flat, one key per document id. The store assigns
//! revisions on local writes and generates ids for documents that arrive
//! without a local key.

use std::collections::BTreeSet;

use chrono::Utc;
use serde_json::Value;

use crate::codec;
use crate::document::{next_revision, Document, PutResponse, RemoveResponse};
use crate::error::{StoreError, StoreResult};
use crate::keyspace;
use crate::medium::Medium;
use crate::query::{self, ListOptions, ListResult};

/// Namespace used for documents put without any id
pub const DEFAULT_NAMESPACE: &str = "docs";

/// Generates timestamp-derived local keys, strictly increasing per generator
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    pub fn next_key(&mut self) -> String {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last = now.max(self.last + 1);
        self.last.to_string()
    }
}

pub struct DocumentStore<M: Medium> {
    medium: M,
    default_namespace: String,
    ids: IdGenerator,
}

impl<M: Medium> DocumentStore<M> {
    pub fn new(medium: M) -> Self {
        Self {
            medium,
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            ids: IdGenerator::default(),
        }
    }

    /// Use `namespace` for documents put with an empty id
    pub fn with_default_namespace(mut self, namespace: &str) -> StoreResult<Self> {
        keyspace::validate_namespace(namespace)?;
        self.default_namespace = namespace.to_string();
        Ok(self)
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn medium_mut(&mut self) -> &mut M {
        &mut self.medium
    }

    pub fn into_medium(self) -> M {
        self.medium
    }

    /// Get a document by id
    pub fn get(&self, id: &str) -> StoreResult<Document> {
        self.try_get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Get a document by id, `None` when absent
    pub fn try_get(&self, id: &str) -> StoreResult<Option<Document>> {
        match self.medium.read(id)? {
            Some(bytes) => Ok(Some(codec::decode(id, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Resolve the id a put of `doc` will be stored under, generating one
    /// when the local key is missing.
    fn assign_id(&mut self, id: &str) -> StoreResult<String> {
        let namespace = if id.is_empty() {
            self.default_namespace.clone()
        } else {
            match id.split_once(keyspace::DELIMITER) {
                Some((ns, "")) => ns.to_string(),
                _ => {
                    keyspace::validate_id(id)?;
                    return Ok(id.to_string());
                }
            }
        };
        keyspace::validate_namespace(&namespace)?;

        loop {
            let candidate = keyspace::join(&namespace, &self.ids.next_key());
            if !self.medium.contains(&candidate)? {
                return Ok(candidate);
            }
        }
    }

    /// Insert or replace a document.
    ///
    /// The stored revision is bumped past the previous one. Re-putting an
    /// identical payload leaves the stored document untouched.
    pub fn put(&mut self, mut doc: Document) -> StoreResult<PutResponse> {
        doc.id = self.assign_id(&doc.id)?;

        let previous = self.try_get(&doc.id)?;
        if let Some(existing) = &previous {
            if existing.payload == doc.payload {
                tracing::debug!(id = %doc.id, "put skipped, payload unchanged");
                return Ok(PutResponse {
                    id: doc.id,
                    ok: true,
                    revision: existing.revision,
                });
            }
        }

        doc.revision = next_revision(previous.map(|d| d.revision).unwrap_or(0));
        self.medium.write(&doc.id, &codec::encode(&doc)?)?;
        tracing::debug!(id = %doc.id, revision = doc.revision, "document stored");

        Ok(PutResponse {
            id: doc.id,
            ok: true,
            revision: doc.revision,
        })
    }

    /// Write a document exactly as given, revision included.
    ///
    /// Reserved for reconciliation results and authoritative writes; callers
    /// must supply a full id.
    pub fn put_synced(&mut self, doc: &Document) -> StoreResult<PutResponse> {
        keyspace::validate_id(&doc.id)?;
        self.medium.write(&doc.id, &codec::encode(doc)?)?;
        tracing::debug!(id = %doc.id, revision = doc.revision, "synced document stored");
        Ok(PutResponse {
            id: doc.id.clone(),
            ok: true,
            revision: doc.revision,
        })
    }

    /// Read, shallow-merge `patch` into the payload, and put the result
    pub fn merge(&mut self, id: &str, patch: Value) -> StoreResult<PutResponse> {
        let mut doc = self.get(id)?;
        doc.merge(patch);
        self.put(doc)
    }

    /// Remove a document. Removing an absent id succeeds.
    pub fn remove(&mut self, doc: &Document) -> StoreResult<RemoveResponse> {
        self.remove_id(&doc.id)
    }

    pub fn remove_id(&mut self, id: &str) -> StoreResult<RemoveResponse> {
        let existed = self.medium.delete(id)?;
        tracing::debug!(id, existed, "document removed");
        Ok(RemoveResponse { ok: true })
    }

    /// Remove every document of `namespace`, returning how many were removed
    pub fn clear(&mut self, namespace: &str) -> StoreResult<usize> {
        keyspace::validate_namespace(namespace)?;
        let keys = self.medium.keys_with_prefix(&keyspace::prefix(namespace))?;
        let mut removed = 0;
        for key in keys {
            if self.medium.delete(&key)? {
                removed += 1;
            }
        }
        tracing::debug!(namespace, removed, "namespace cleared");
        Ok(removed)
    }

    pub fn list(&self, namespace: &str, options: &ListOptions) -> StoreResult<ListResult> {
        query::list(&self.medium, namespace, options)
    }

    /// Distinct namespaces present in the medium
    pub fn namespaces(&self) -> StoreResult<Vec<String>> {
        let namespaces: BTreeSet<String> = self
            .medium
            .keys_with_prefix("")?
            .iter()
            .filter_map(|k| keyspace::namespace_of(k))
            .map(str::to_string)
            .collect();
        Ok(namespaces.into_iter().collect())
    }
}
