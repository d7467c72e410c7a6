use axum::{
    extract::{Path, Query, State},
    http::{
        header::{IF_MATCH, IF_NONE_MATCH},
        HeaderMap,
    },
    response::Json,
};
use serde_json::Value;
use std::sync::Arc;
use tilldb_core::{Document, ListOptions, ListResult, Precondition, PutResponse, RemoveResponse};

use crate::error::{DbError, DbResult};
use crate::storage::StorageEngine;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<StorageEngine>,
    /// Bearer token required on `/_api` routes, `None` disables auth
    pub api_token: Option<String>,
}

/// Translate `If-None-Match: *` and `If-Match: "<rev>"` into a precondition
pub(crate) fn precondition_from(headers: &HeaderMap) -> DbResult<Precondition> {
    if let Some(value) = headers.get(IF_NONE_MATCH) {
        return match value.to_str() {
            Ok("*") => Ok(Precondition::Absent),
            _ => Err(DbError::BadRequest(
                "If-None-Match only supports '*'".to_string(),
            )),
        };
    }

    if let Some(value) = headers.get(IF_MATCH) {
        let raw = value
            .to_str()
            .map_err(|_| DbError::BadRequest("If-Match is not valid text".to_string()))?;
        let revision = raw
            .trim()
            .trim_start_matches("W/")
            .trim_matches('"')
            .parse::<u64>()
            .map_err(|_| DbError::BadRequest(format!("Invalid revision in If-Match: {}", raw)))?;
        return Ok(Precondition::Revision(revision));
    }

    Ok(Precondition::Any)
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "last_issued": state.storage.last_issued(),
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DbResult<Json<Value>> {
    let doc = state.storage.get(&id)?;
    Ok(Json(doc.to_value()))
}

/// Store the body under the path id. The body's `_rev` is the writer's
/// revision; the response carries the revision actually stored.
pub async fn put_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> DbResult<Json<PutResponse>> {
    let precondition = precondition_from(&headers)?;
    if !body.is_object() {
        return Err(DbError::BadRequest(
            "Document body must be a JSON object".to_string(),
        ));
    }

    let mut doc: Document = serde_json::from_value(body)?;
    if !doc.id.is_empty() && doc.id != id {
        return Err(DbError::BadRequest(format!(
            "Body _id '{}' does not match path id '{}'",
            doc.id, id
        )));
    }
    doc.id = id;

    let resp = state.storage.put(doc, precondition)?;
    tracing::debug!(id = %resp.id, revision = resp.revision, "Document stored");
    Ok(Json(resp))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> DbResult<Json<RemoveResponse>> {
    let precondition = precondition_from(&headers)?;
    Ok(Json(state.storage.remove(&id, precondition)?))
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(options): Query<ListOptions>,
) -> DbResult<Json<ListResult>> {
    Ok(Json(state.storage.list(&namespace, &options)?))
}

pub async fn list_namespaces(State(state): State<AppState>) -> DbResult<Json<Vec<String>>> {
    Ok(Json(state.storage.namespaces()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_precondition_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(precondition_from(&headers).unwrap(), Precondition::Any);

        headers.insert(IF_MATCH, HeaderValue::from_static("\"1700000000000\""));
        assert_eq!(
            precondition_from(&headers).unwrap(),
            Precondition::Revision(1_700_000_000_000)
        );

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert_eq!(precondition_from(&headers).unwrap(), Precondition::Absent);
    }

    #[test]
    fn test_bad_precondition_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(IF_MATCH, HeaderValue::from_static("\"abc\""));
        assert!(matches!(precondition_from(&headers), Err(DbError::BadRequest(_))));

        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"12\""));
        assert!(matches!(precondition_from(&headers), Err(DbError::BadRequest(_))));
    }
}
