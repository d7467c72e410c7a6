//! Document codec.
//!
//! Documents are persisted as flat JSON objects (`{"_id", "_rev", ...payload}`)
//! under a key equal to their id.

use crate::document::Document;
use crate::error::StoreResult;

/// Encode a document into the bytes written to a medium
pub fn encode(doc: &Document) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(doc)?)
}

/// Decode bytes read from a medium under `key`.
///
/// The key is authoritative for the id: a stored body carrying a different
/// or missing `_id` is normalized to the key it was stored under.
pub fn decode(key: &str, bytes: &[u8]) -> StoreResult<Document> {
    let mut doc: Document = serde_json::from_slice(bytes)?;
    if doc.id != key {
        doc.id = key.to_string();
    }
    Ok(doc)
}
