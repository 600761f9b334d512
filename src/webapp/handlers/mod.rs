//! Request handlers, grouped by resource.

pub mod health;
pub mod home;
pub mod sessions;
pub mod settings;
pub mod users;

use axum::{
    http::{
        header::{CONTENT_TYPE, LOCATION},
        StatusCode,
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Map;

use super::{
    gate::Visitor,
    render::{page_title, resolve_language, Page, PageContext},
    state::AppState,
};
use crate::{error::Result, store::PublicUser};

/// Query parameters understood by every page.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub flash: Option<String>,
    pub lang: Option<String>,
    pub next: Option<String>,
}

/// Context for `page` as seen by `visitor`.
///
/// # Errors
/// Returns an error if the visitor's settings cannot be loaded.
pub async fn page_context(
    state: &AppState,
    visitor: &Visitor,
    query: &PageQuery,
    page: Page,
) -> Result<PageContext> {
    let settings = match &visitor.user {
        Some(user) => Some(state.settings_for(&user.id).await?),
        None => None,
    };
    let language = resolve_language(query.lang.as_deref(), settings.as_ref());
    Ok(PageContext {
        current_user: visitor.user.as_ref().map(PublicUser::from),
        open_registration: state.config().open_registration(),
        flash: query.flash.clone().filter(|flash| !flash.is_empty()),
        title: page_title(page, &language).to_string(),
        language,
        is_admin: visitor.is_admin(),
        app_name: state.config().app_name().to_string(),
        dark_mode: settings.as_ref().is_some_and(|settings| settings.dark_mode),
        error: None,
        data: Map::new(),
    })
}

/// # Errors
/// Returns an error if the renderer fails.
pub fn render(
    state: &AppState,
    status: StatusCode,
    page: Page,
    context: &PageContext,
) -> Result<Response> {
    let body = state.renderer().render(page, context)?;
    Ok((status, [(CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response())
}

/// `302 Found`, which browsers follow with a GET.
#[must_use]
pub fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

/// `location` with a `flash` query parameter appended.
#[must_use]
pub fn with_flash(location: &str, flash: &str) -> String {
    let flash: String = url::form_urlencoded::byte_serialize(flash.as_bytes()).collect();
    let separator = if location.contains('?') { '&' } else { '?' };
    format!("{location}{separator}flash={flash}")
}
