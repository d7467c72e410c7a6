//! tilldb-core - storage-independent document model and query engine.
//!
//! This crate holds everything the embedded store and the authoritative
//! server share: the document shape, the codec, key-space rules, the
//! [`Medium`] abstraction, the [`DocumentStore`] built on it and the query
//! engine. It has no async runtime and no backend dependencies.
//!
//! # Example
//!
//! ```rust
//! use tilldb_core::{Document, DocumentStore, ListOptions, MemoryMedium};
//! use serde_json::json;
//!
//! let mut store = DocumentStore::new(MemoryMedium::new());
//! store.put(Document::new("products:1", json!({"name": "Burger", "price": 12.99}))).unwrap();
//! store.put(Document::new("products:2", json!({"name": "Pizza", "price": 14.99}))).unwrap();
//!
//! let result = store
//!     .list("products", &ListOptions::namespace_range("products").include_docs(true))
//!     .unwrap();
//! assert_eq!(result.ids(), vec!["products:1", "products:2"]);
//! ```

pub mod authority;
pub mod codec;
pub mod document;
pub mod error;
pub mod keyspace;
pub mod medium;
pub mod query;
pub mod store;

pub use authority::{Authority, Precondition};
pub use document::{next_revision, Document, PutResponse, RemoveResponse};
pub use error::{StoreError, StoreResult};
pub use medium::{Medium, MemoryMedium};
pub use query::{ListOptions, ListResult, Row};
pub use store::{DocumentStore, IdGenerator, DEFAULT_NAMESPACE};
