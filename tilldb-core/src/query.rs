//! Query engine: prefix-bounded range enumeration with offset pagination.

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::document::Document;
use crate::error::StoreResult;
use crate::keyspace;
use crate::medium::Medium;

/// Options for [`list`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    /// Materialize each row's document
    pub include_docs: bool,
    /// Inclusive lower bound, a full namespace-qualified key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_key: Option<String>,
    /// Inclusive upper bound, a full namespace-qualified key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_key: Option<String>,
    /// Maximum rows; `None` or `0` means unbounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Rows to skip before collecting
    pub skip: usize,
    /// Only documents with a revision strictly greater than this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical full-namespace bounds, `<ns>:` to `<ns>:\u{FFF0}`
    pub fn namespace_range(namespace: &str) -> Self {
        Self {
            start_key: Some(keyspace::lower_bound(namespace)),
            end_key: Some(keyspace::upper_bound(namespace)),
            ..Self::default()
        }
    }

    pub fn include_docs(mut self, include: bool) -> Self {
        self.include_docs = include;
        self
    }

    pub fn start_key(mut self, key: impl Into<String>) -> Self {
        self.start_key = Some(key.into());
        self
    }

    pub fn end_key(mut self, key: impl Into<String>) -> Self {
        self.end_key = Some(key.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn since(mut self, revision: u64) -> Self {
        self.since = Some(revision);
        self
    }

    /// 1-based page of `per_page` rows
    pub fn page(self, page: usize, per_page: usize) -> Self {
        self.skip(page.saturating_sub(1).saturating_mul(per_page)).limit(per_page)
    }

    fn in_bounds(&self, key: &str) -> bool {
        if let Some(start) = &self.start_key {
            if key < start.as_str() {
                return false;
            }
        }
        if let Some(end) = &self.end_key {
            if key > end.as_str() {
                return false;
            }
        }
        true
    }
}

/// One row of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
}

/// Result of a listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    pub rows: Vec<Row>,
    /// Highest revision among the returned rows, when documents were read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<u64>,
}

impl ListResult {
    pub fn ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.id.as_str()).collect()
    }

    /// Materialized documents, in row order
    pub fn docs(&self) -> impl Iterator<Item = &Document> {
        self.rows.iter().filter_map(|r| r.doc.as_ref())
    }

    pub fn into_docs(self) -> Vec<Document> {
        self.rows.into_iter().filter_map(|r| r.doc).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// List documents of `namespace` held in `medium`.
///
/// Keys are filtered to the namespace prefix, sorted, cut to the inclusive
/// `start_key`/`end_key` bounds and the `since` revision, then paginated
/// with `skip` followed by `limit`.
pub fn list<M: Medium + ?Sized>(
    medium: &M,
    namespace: &str,
    options: &ListOptions,
) -> StoreResult<ListResult> {
    keyspace::validate_namespace(namespace)?;

    let mut keys = medium.keys_with_prefix(&keyspace::prefix(namespace))?;
    keys.sort_unstable();
    keys.retain(|k| options.in_bounds(k));

    let mut marker: Option<u64> = None;

    // `since` needs revisions, so documents are read before paginating
    let rows: Vec<Row> = if let Some(since) = options.since {
        let mut matching = Vec::new();
        for key in keys {
            if let Some(doc) = read_doc(medium, &key)? {
                if doc.revision > since {
                    matching.push((key, doc));
                }
            }
        }
        paginate(matching.into_iter(), options)
            .map(|(id, doc)| {
                marker = marker.max(Some(doc.revision));
                Row {
                    id,
                    doc: options.include_docs.then_some(doc),
                }
            })
            .collect()
    } else {
        let mut rows = Vec::new();
        for id in paginate(keys.into_iter(), options) {
            if options.include_docs {
                // Removed between enumeration and read
                let Some(doc) = read_doc(medium, &id)? else {
                    continue;
                };
                marker = marker.max(Some(doc.revision));
                rows.push(Row { id, doc: Some(doc) });
            } else {
                rows.push(Row { id, doc: None });
            }
        }
        rows
    };

    tracing::debug!(namespace, rows = rows.len(), "listed documents");
    Ok(ListResult { rows, marker })
}

fn paginate<I: Iterator>(items: I, options: &ListOptions) -> impl Iterator<Item = I::Item> {
    let limit = match options.limit {
        None | Some(0) => usize::MAX,
        Some(n) => n,
    };
    items.skip(options.skip).take(limit)
}

fn read_doc<M: Medium + ?Sized>(medium: &M, key: &str) -> StoreResult<Option<Document>> {
    match medium.read(key)? {
        Some(bytes) => Ok(Some(codec::decode(key, &bytes)?)),
        None => Ok(None),
    }
}
