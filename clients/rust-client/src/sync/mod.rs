//! Offline Sync Module
//!
//! Offline-first storage and synchronization for the tilldb client.
//!
//! # Features
//! - Local SQLite storage for offline data
//! - Outbox of pending changes, coalesced per document
//! - Pull/push passes against any [`RemoteStore`](crate::remote::RemoteStore)
//! - Last-writer-wins conflict resolution on revision
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tilldb_client::{LocalStore, RemoteBuilder, StoreHandle, SyncConfig, SyncCoordinator};
//! use tilldb_core::Document;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let remote = RemoteBuilder::new("http://localhost:6745")
//!         .bearer_token("secret")
//!         .build()?;
//!
//!     let store = StoreHandle::new(LocalStore::open_default("till", "device-123".to_string())?);
//!
//!     // Works offline
//!     store
//!         .put(Document::new("orders:1", serde_json::json!({"customer_name": "Ana"})))
//!         .await?;
//!
//!     let coordinator = Arc::new(SyncCoordinator::new(store, Arc::new(remote), SyncConfig::default()));
//!     let handle = coordinator.start();
//!     handle.sync_now().await;
//!     handle.stop().await;
//!     Ok(())
//! }
//! ```

pub mod coordinator;
pub mod store;

pub use coordinator::{
    NamespaceReport, NamespaceState, SyncCommand, SyncConfig, SyncCoordinator, SyncError,
    SyncHandle, SyncReport, SyncStatus, SyncTrigger,
};
pub use store::{ChangeOp, LocalStore, PendingChange, QueueConfig, StoreHandle, StoreOptions};
