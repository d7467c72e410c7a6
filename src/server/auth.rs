use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};

use crate::error::DbError;
use crate::server::handlers::AppState;

/// Compare two byte strings without leaking where they differ
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Bearer token from an `Authorization` header value
fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
}

/// Axum middleware guarding the document API.
///
/// When the server runs without a token every request passes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, DbError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token);

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(req).await)
        }
        Some(_) => {
            tracing::warn!(path = %req.uri().path(), "Rejected request with invalid token");
            Err(DbError::Unauthorized("Invalid token".to_string()))
        }
        None => {
            tracing::warn!(path = %req.uri().path(), "Rejected request without token");
            Err(DbError::Unauthorized("Missing bearer token".to_string()))
        }
    }
}
