//! Authoritative write rules.
//!
//! The authoritative copy checks write preconditions and stamps every
//! accepted write with a revision strictly greater than any it issued
//! before, so `since` listings never miss a later write.

use serde::{Deserialize, Serialize};

use crate::document::{Document, PutResponse, RemoveResponse};
use crate::error::{StoreError, StoreResult};
use crate::keyspace;
use crate::medium::Medium;
use crate::query::{ListOptions, ListResult};
use crate::store::DocumentStore;

/// Write precondition against the authoritative revision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precondition {
    /// No check
    #[default]
    Any,
    /// The document must not exist
    Absent,
    /// The document must be at exactly this revision
    Revision(u64),
}

impl Precondition {
    /// Check against the current revision (`None` when absent)
    pub fn check(&self, id: &str, current: Option<u64>) -> StoreResult<()> {
        match (self, current) {
            (Precondition::Any, _) => Ok(()),
            (Precondition::Absent, None) => Ok(()),
            (Precondition::Absent, Some(rev)) => Err(StoreError::Conflict(format!(
                "'{}' already exists at revision {}",
                id, rev
            ))),
            (Precondition::Revision(expected), Some(rev)) if *expected == rev => Ok(()),
            (Precondition::Revision(expected), current) => Err(StoreError::Conflict(format!(
                "'{}' expected revision {}, found {}",
                id,
                expected,
                current.map(|r| r.to_string()).unwrap_or_else(|| "none".to_string())
            ))),
        }
    }
}

pub struct Authority<M: Medium> {
    store: DocumentStore<M>,
    last_issued: u64,
}

impl<M: Medium> Authority<M> {
    /// Wrap a store, recovering the revision clock from the stored documents
    pub fn new(store: DocumentStore<M>) -> StoreResult<Self> {
        let mut last_issued = 0;
        for key in store.medium().keys_with_prefix("")? {
            if keyspace::namespace_of(&key).is_none() {
                continue;
            }
            if let Some(doc) = store.try_get(&key)? {
                last_issued = last_issued.max(doc.revision);
            }
        }
        Ok(Self { store, last_issued })
    }

    /// Wrap a store whose revision clock is already known
    pub fn with_clock(store: DocumentStore<M>, last_issued: u64) -> Self {
        Self { store, last_issued }
    }

    /// Never issue revisions at or below `revision` (persisted clock)
    pub fn with_last_issued(mut self, revision: u64) -> Self {
        self.last_issued = self.last_issued.max(revision);
        self
    }

    pub fn last_issued(&self) -> u64 {
        self.last_issued
    }

    pub fn store(&self) -> &DocumentStore<M> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DocumentStore<M> {
        &mut self.store
    }

    pub fn get(&self, id: &str) -> StoreResult<Document> {
        self.store.get(id)
    }

    /// Accept a write if `precondition` holds.
    ///
    /// The stored revision is the writer's revision or the next clock tick,
    /// whichever is greater. An unchanged payload keeps the current revision.
    pub fn put(&mut self, mut doc: Document, precondition: Precondition) -> StoreResult<PutResponse> {
        keyspace::validate_id(&doc.id)?;
        let current = self.store.try_get(&doc.id)?;
        precondition.check(&doc.id, current.as_ref().map(|d| d.revision))?;

        if let Some(existing) = current {
            if existing.payload == doc.payload {
                return Ok(PutResponse {
                    id: doc.id,
                    ok: true,
                    revision: existing.revision,
                });
            }
        }

        doc.revision = doc.revision.max(self.last_issued.saturating_add(1));
        self.store.put_synced(&doc)?;
        self.last_issued = doc.revision;
        tracing::debug!(id = %doc.id, revision = doc.revision, "authoritative write accepted");

        Ok(PutResponse {
            id: doc.id,
            ok: true,
            revision: doc.revision,
        })
    }

    /// Remove if `precondition` holds. Removing an absent id succeeds.
    pub fn remove(&mut self, id: &str, precondition: Precondition) -> StoreResult<RemoveResponse> {
        let current = self.store.try_get(id)?;
        if let Some(existing) = &current {
            precondition.check(id, Some(existing.revision))?;
        }
        self.store.remove_id(id)
    }

    pub fn list(&self, namespace: &str, options: &ListOptions) -> StoreResult<ListResult> {
        self.store.list(namespace, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MemoryMedium;
    use serde_json::json;

    fn authority() -> Authority<MemoryMedium> {
        Authority::new(DocumentStore::new(MemoryMedium::new())).unwrap()
    }

    #[test]
    fn test_precondition_check() {
        assert!(Precondition::Any.check("a:1", Some(3)).is_ok());
        assert!(Precondition::Absent.check("a:1", None).is_ok());
        assert!(Precondition::Absent.check("a:1", Some(3)).is_err());
        assert!(Precondition::Revision(3).check("a:1", Some(3)).is_ok());
        assert!(Precondition::Revision(3).check("a:1", Some(4)).is_err());
        assert!(Precondition::Revision(3).check("a:1", None).is_err());
    }

    #[test]
    fn test_revisions_strictly_increase() {
        let mut auth = authority();
        let a = auth
            .put(Document::new("products:1", json!({"n": 1})).with_revision(500), Precondition::Any)
            .unwrap();
        assert_eq!(a.revision, 500);

        // An older writer clock is moved past the last issued revision
        let b = auth
            .put(Document::new("products:2", json!({"n": 2})).with_revision(10), Precondition::Any)
            .unwrap();
        assert_eq!(b.revision, 501);
        assert_eq!(auth.last_issued(), 501);
    }

    #[test]
    fn test_conflict_leaves_document_untouched() {
        let mut auth = authority();
        let first = auth
            .put(Document::new("orders:1", json!({"status": "pending"})), Precondition::Absent)
            .unwrap();

        let err = auth
            .put(
                Document::new("orders:1", json!({"status": "completed"})),
                Precondition::Revision(first.revision + 7),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(auth.get("orders:1").unwrap().get("status"), Some(json!("pending")));

        let err = auth
            .put(Document::new("orders:1", json!({"status": "x"})), Precondition::Absent)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_unchanged_payload_keeps_revision() {
        let mut auth = authority();
        let first = auth
            .put(Document::new("orders:1", json!({"total": 3})), Precondition::Any)
            .unwrap();
        let again = auth
            .put(Document::new("orders:1", json!({"total": 3})), Precondition::Revision(first.revision))
            .unwrap();
        assert_eq!(again.revision, first.revision);
    }

    #[test]
    fn test_remove_preconditions() {
        let mut auth = authority();
        let put = auth
            .put(Document::new("orders:1", json!({"total": 3})), Precondition::Any)
            .unwrap();
        assert!(auth.remove("orders:1", Precondition::Revision(put.revision + 1)).is_err());
        assert!(auth.remove("orders:1", Precondition::Revision(put.revision)).unwrap().ok);
        assert!(auth.remove("orders:1", Precondition::Revision(put.revision)).unwrap().ok);
    }

    #[test]
    fn test_clock_recovered_from_documents() {
        let mut store = DocumentStore::new(MemoryMedium::new());
        store
            .put_synced(&Document::new("sales:1", json!({})).with_revision(77))
            .unwrap();
        let auth = Authority::new(store).unwrap().with_last_issued(40);
        assert_eq!(auth.last_issued(), 77);
        assert_eq!(auth.with_last_issued(90).last_issued(), 90);
    }
}
