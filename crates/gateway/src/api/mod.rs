//! HTTP surface: router, handlers, response shapes.

mod dto;
mod error;
mod handlers;

pub use dto::*;
pub use error::ApiError;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use barge_broker::Broker;

use crate::client::FileClient;

/// Uploads stream to the broker one frame at a time, but the multipart
/// body itself is buffered per file; cap it well past any practical file.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Shared state for all handlers.
pub struct AppState<B> {
    pub client: FileClient<B>,
}

/// Builds the application router.
pub fn router<B: Broker>(state: Arc<AppState<B>>, cors_origin: &str) -> Router {
    let cors = match cors_origin.parse::<HeaderValue>() {
        Ok(origin) if cors_origin != "*" => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Router::new()
        .route("/files/upload", axum::routing::post(handlers::upload::<B>))
        .route(
            "/files/s/{id}",
            get(handlers::list::<B>).delete(handlers::delete_folder::<B>),
        )
        .route(
            "/files/s/{id}/d/{filename}",
            get(handlers::download::<B>).delete(handlers::delete_file::<B>),
        )
        .route("/test/services", get(handlers::diagnose::<B>))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Storage-id path parameters are checked before any broker round-trip.
pub(crate) fn validate_storage_id(id: &str) -> Result<(), ApiError> {
    if id.len() != 10 {
        return Err(ApiError::bad_request(
            "invalid ID format: must be exactly 10 characters",
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(ApiError::bad_request(
            "invalid ID format: only lowercase letters and numbers are allowed",
        ));
    }
    Ok(())
}
