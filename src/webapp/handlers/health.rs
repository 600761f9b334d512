use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::{webapp::state::AppState, GIT_COMMIT_HASH};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    build: String,
    backend: String,
    storage: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Storage backend is reachable", body = Health),
        (status = 503, description = "Storage backend is unreachable", body = Health)
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(Extension(state): Extension<AppState>) -> impl IntoResponse {
    // Any lookup proves the backend answers; the ID never exists.
    let storage = state.stores().users.find("health").await;
    if let Err(err) = &storage {
        error!("Storage health check failed: {err}");
    }

    let health = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: GIT_COMMIT_HASH.to_string(),
        backend: state.config().backend().to_string(),
        storage: if storage.is_ok() { "ok" } else { "error" }.to_string(),
    };

    let short_hash = GIT_COMMIT_HASH.get(0..7).unwrap_or_default();
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )) {
        headers.insert("X-App", value);
    }

    let status = if storage.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, Json(health))
}
