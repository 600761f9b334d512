//! Per-user preferences.

use axum::{
    extract::{Extension, Form, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{page_context, redirect, render, with_flash, PageQuery};
use crate::{
    error::Result,
    store::UserConfig,
    webapp::{
        gate::Visitor,
        render::{is_language_available, Page},
        state::AppState,
    },
};

#[derive(Debug, Deserialize)]
pub struct SettingsForm {
    #[serde(default)]
    language: String,
    /// Checkbox value, `dark` when ticked.
    #[serde(default)]
    darkmode: Option<String>,
}

pub async fn settings_form(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Query(query): Query<PageQuery>,
) -> Result<Response> {
    let user = visitor.require_user()?;
    let settings = state.settings_for(&user.id).await?;
    let context = page_context(&state, &visitor, &query, Page::UserConfigsEdit)
        .await?
        .with_data("settings", json!(settings));
    render(&state, StatusCode::OK, Page::UserConfigsEdit, &context)
}

pub async fn settings_update(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Form(form): Form<SettingsForm>,
) -> Result<Response> {
    let user = visitor.require_user()?;
    let mut settings = state.settings_for(&user.id).await?;

    let language = form.language.trim();
    if is_language_available(language) {
        settings.language = language.to_string();
    } else {
        debug!(language, "ignoring unavailable language");
    }
    settings.dark_mode = form.darkmode.as_deref() == Some("dark");

    state.stores().settings.save(&settings).await?;
    info!(user_id = %user.id, language = %settings.language, dark_mode = settings.dark_mode, "settings updated");
    Ok(redirect(&with_flash("/", "settings updated")))
}

#[utoipa::path(
    get,
    path = "/api/v1/settings",
    responses(
        (status = 200, description = "Settings of the logged-in user", body = UserConfig),
        (status = 302, description = "Not logged in")
    ),
    tag = "settings"
)]
pub async fn own_settings(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
) -> Result<Json<UserConfig>> {
    let user = visitor.require_user()?;
    Ok(Json(state.settings_for(&user.id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/settings/{id}",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Settings of the given user", body = UserConfig),
        (status = 404, description = "No user with this ID")
    ),
    tag = "settings"
)]
pub async fn user_settings(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    if state.stores().users.find(&id).await?.is_none() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    Ok(Json(state.settings_for(&id).await?).into_response())
}
