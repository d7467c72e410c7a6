//! tilldb Rust Client
//!
//! Offline-first embedded document store with synchronization against a
//! tilldb server over HTTP.
//!
//! # Example
//!
//! ```rust
//! use tilldb_client::{entities, LocalStore};
//! use tilldb_core::ListOptions;
//!
//! let mut store = LocalStore::open_in_memory("till-1".to_string()).unwrap();
//! entities::seed_sample_products(&mut store).unwrap();
//!
//! let products = store
//!     .list("products", &ListOptions::namespace_range("products").include_docs(true))
//!     .unwrap();
//! assert_eq!(products.ids(), vec!["products:1", "products:2"]);
//! ```

pub mod entities;
pub mod remote;
pub mod sync;

pub use remote::{HttpRemoteStore, MemoryRemote, RemoteBuilder, RemoteStore};
pub use sync::{
    LocalStore, NamespaceReport, PendingChange, QueueConfig, StoreHandle, StoreOptions,
    SyncCommand, SyncConfig, SyncCoordinator, SyncError, SyncHandle, SyncReport, SyncTrigger,
};
pub use tilldb_core::{Document, ListOptions, ListResult, Precondition, StoreError, StoreResult};
