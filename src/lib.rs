//! Authoritative tilldb server.
//!
//! Holds the shared copy of every namespace in RocksDB and serves it over
//! HTTP to the offline-first clients in `tilldb-client`.

pub mod error;
pub mod server;
pub mod storage;

pub use error::{DbError, DbResult};
pub use server::create_router;
pub use storage::{RocksMedium, StorageEngine};
pub use tilldb_core::{Document, ListOptions, ListResult, Precondition};
