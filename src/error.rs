use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tilldb_core::StoreError;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Document '{0}' not found")]
    DocumentNotFound(String),

    #[error("Conflict: {0}")]
    ConflictError(String),

    #[error("Storage full: {0}")]
    StorageFull(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<rocksdb::Error> for DbError {
    fn from(err: rocksdb::Error) -> Self {
        DbError::InternalError(err.into())
    }
}

impl From<StoreError> for DbError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => DbError::DocumentNotFound(id),
            StoreError::Conflict(msg) => DbError::ConflictError(msg),
            StoreError::StorageFull(msg) => DbError::StorageFull(msg),
            StoreError::Unavailable(msg) => DbError::Unavailable(msg),
            StoreError::Unauthorized(msg) => DbError::Unauthorized(msg),
            StoreError::InvalidKey(msg) => DbError::BadRequest(msg),
            StoreError::Codec(e) => DbError::JsonError(e),
            StoreError::Medium(msg) => DbError::InternalError(msg),
        }
    }
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DbError::DocumentNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            DbError::ConflictError(msg) => (StatusCode::CONFLICT, msg.clone()),
            DbError::StorageFull(msg) => (StatusCode::INSUFFICIENT_STORAGE, msg.clone()),
            DbError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            DbError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            DbError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            // Default to 500
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = serde_json::json!({
            "error": message,
            "code": status.as_u16(),
            "type": format!("{:?}", self).split('(').next().unwrap_or("Error")
        });

        (status, Json(body)).into_response()
    }
}
