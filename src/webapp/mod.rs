//! HTTP surface: routing, gate chain, handlers and rendering.

pub mod gate;
pub mod handlers;
mod openapi;
pub mod render;
pub mod state;

pub use openapi::openapi;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    response::Json,
    routing::{delete, get},
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, services::ServeDir, set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

use self::{
    gate::{Gate, GateChain},
    handlers::{health, home, sessions, settings, users},
    state::AppState,
};

/// Every route, grouped into gate stages, wrapped in request-id and tracing
/// layers.
pub fn router(state: AppState) -> Router {
    let mut public = Router::new()
        .route("/", get(home::home))
        .route("/health", get(health::health))
        .route(
            "/register",
            get(users::register_form).post(users::register),
        )
        .route("/login", get(sessions::login_form).post(sessions::login))
        .route("/api/v1/openapi.json", get(|| async { Json(openapi()) }));
    if let Some(dir) = state.config().assets_dir() {
        public = public.nest_service("/assets", ServeDir::new(dir));
    }

    let login = Router::new()
        .route("/signout", get(sessions::signout))
        .route(
            "/account",
            get(users::account_form).post(users::account_update),
        )
        .route("/users/:id", get(users::user_form).post(users::user_update))
        .route(
            "/settings",
            get(settings::settings_form).post(settings::settings_update),
        )
        .route("/api/v1/settings", get(settings::own_settings));

    let admin = Router::new()
        .route("/users", get(users::users_index))
        .route("/api/v1/users", get(users::list_users))
        .route("/api/v1/users/:id", delete(users::delete_user))
        .route("/api/v1/settings/:id", get(settings::user_settings));

    let chain = GateChain::new(state)
        .stage(Gate::Public, public)
        .stage(Gate::RequireLogin, login)
        .stage(Gate::RequireAdmin, admin);

    Router::new().fallback_service(chain).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    )
}

/// Bind `address` and serve until the process is stopped.
///
/// # Errors
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(address: SocketAddr, state: AppState) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    info!("Listening on {}", address);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
