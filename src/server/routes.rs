use axum::http::{header, Method};
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::auth_middleware;
use super::handlers::*;
use crate::storage::StorageEngine;

pub fn create_router(storage: Arc<StorageEngine>, api_token: Option<String>) -> Router {
    let state = AppState { storage, api_token };

    let api_routes = Router::new()
        .route(
            "/_api/docs/{id}",
            get(get_document).put(put_document).delete(delete_document),
        )
        .route("/_api/namespaces", get(list_namespaces))
        .route("/_api/namespaces/{namespace}/docs", get(list_documents))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::IF_MATCH,
                    header::IF_NONE_MATCH,
                ]),
        )
}
