//! Remote authoritative store.
//!
//! [`RemoteStore`] mirrors the local store operations against a network
//! service. Writes carry a [`Precondition`] so the authority can reject a
//! push made against a stale revision.

mod builder;
mod http;
mod memory;

pub use builder::RemoteBuilder;
pub use http::HttpRemoteStore;
pub use memory::MemoryRemote;

use std::sync::Arc;

use async_trait::async_trait;
use tilldb_core::{
    Document, ListOptions, ListResult, Precondition, PutResponse, RemoveResponse, StoreResult,
};

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a document, `NotFound` when absent
    async fn get(&self, id: &str) -> StoreResult<Document>;

    /// Store `doc` if `precondition` holds. The response carries the
    /// revision the authority stored.
    async fn put(&self, doc: &Document, precondition: Precondition) -> StoreResult<PutResponse>;

    /// Remove a document. Removing an absent id succeeds.
    async fn remove(&self, id: &str, precondition: Precondition) -> StoreResult<RemoveResponse>;

    async fn list(&self, namespace: &str, options: &ListOptions) -> StoreResult<ListResult>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn get(&self, id: &str) -> StoreResult<Document> {
        (**self).get(id).await
    }

    async fn put(&self, doc: &Document, precondition: Precondition) -> StoreResult<PutResponse> {
        (**self).put(doc, precondition).await
    }

    async fn remove(&self, id: &str, precondition: Precondition) -> StoreResult<RemoveResponse> {
        (**self).remove(id, precondition).await
    }

    async fn list(&self, namespace: &str, options: &ListOptions) -> StoreResult<ListResult> {
        (**self).list(namespace, options).await
    }
}
