//! Login and logout.

use axum::{
    extract::{Extension, Form, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{page_context, redirect, render, with_flash, PageQuery};
use crate::{
    error::{Error, Result},
    webapp::{gate::Visitor, render::Page, state::AppState},
};

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Only same-site absolute paths are followed after login.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(next) if next.starts_with('/') && !next.starts_with("//") && !next.contains('\\') => {
            next
        }
        _ => "/",
    }
}

pub async fn login_form(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Query(query): Query<PageQuery>,
) -> Result<Response> {
    let context = page_context(&state, &visitor, &query, Page::SessionsNew)
        .await?
        .with_data("next", json!(query.next.as_deref().unwrap_or_default()));
    render(&state, StatusCode::OK, Page::SessionsNew, &context)
}

pub async fn login(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Query(query): Query<PageQuery>,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    let user = match state
        .credentials()
        .authenticate(&form.username, &form.password)
        .await
    {
        Ok(user) => user,
        Err(Error::Validation(err)) => {
            let context = page_context(&state, &visitor, &query, Page::SessionsNew).await?;
            let message = err.message(&context.language);
            let context = context
                .with_error(message)
                .with_data("username", json!(form.username))
                .with_data("next", json!(query.next.as_deref().unwrap_or_default()));
            return render(&state, StatusCode::BAD_REQUEST, Page::SessionsNew, &context);
        }
        Err(err) => return Err(err),
    };

    // A fresh ID on every login; the previous session is dropped.
    if let Some(previous) = &visitor.session {
        state.sessions().destroy(previous).await?;
    }
    let mut headers = HeaderMap::new();
    let session = state.sessions().issue(&mut headers);
    state.sessions().attach(session, &user.id).await?;
    info!(user_id = %user.id, "user logged in");

    let location = with_flash(safe_next(query.next.as_deref()), "Logged in");
    Ok((headers, redirect(&location)).into_response())
}

pub async fn signout(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Query(query): Query<PageQuery>,
) -> Result<Response> {
    if let Some(session) = &visitor.session {
        state.sessions().destroy(session).await?;
    }
    if let Some(user) = &visitor.user {
        info!(user_id = %user.id, "user logged out");
    }

    let mut headers = HeaderMap::new();
    state.sessions().clear_cookie(&mut headers);

    // Render as the now anonymous visitor.
    let context = page_context(&state, &Visitor::default(), &query, Page::SessionsDestroy).await?;
    let page = render(&state, StatusCode::OK, Page::SessionsDestroy, &context)?;
    Ok((headers, page).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::Role,
        webapp::{
            handlers::test_support::{body_text, location, session_cookie, TestApp},
            state::AppConfig,
        },
    };
    use anyhow::Result;
    use axum::http::Method;

    #[test]
    fn next_must_be_a_local_path() {
        assert_eq!(safe_next(Some("/users?page=2")), "/users?page=2");
        assert_eq!(safe_next(Some("//evil.example")), "/");
        assert_eq!(safe_next(Some("https://evil.example")), "/");
        assert_eq!(safe_next(Some("/\\evil.example")), "/");
        assert_eq!(safe_next(None), "/");
    }

    #[tokio::test]
    async fn login_redirects_to_next_with_new_session() -> Result<()> {
        let app = TestApp::new(AppConfig::default()).await?;
        let (user, _) = app.user("alice", "password1", Role::Standard).await?;

        let response = app
            .send(
                Method::POST,
                "/login?next=%2Faccount",
                None,
                Some("username=ALICE&password=password1"),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response).as_deref(), Some("/account?flash=Logged+in"));

        let cookie = session_cookie(&response).unwrap_or_default();
        assert!(cookie.starts_with("WebApp=sess_"));
        let owned = app.state.sessions().owned_by(&user.id).await?;
        // One from the fixture, one from this login.
        assert_eq!(owned.len(), 2);

        let response = app.send(Method::GET, "/account", Some(&cookie), None).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn failed_login_rerenders_form_with_same_message() -> Result<()> {
        let app = TestApp::new(AppConfig::default()).await?;
        app.user("bob", "password1", Role::Standard).await?;

        let wrong = app
            .send(Method::POST, "/login", None, Some("username=bob&password=nope"))
            .await?;
        assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);
        assert!(session_cookie(&wrong).is_none());
        let wrong = body_text(wrong).await?;

        let unknown = app
            .send(Method::POST, "/login", None, Some("username=nobody&password=nope"))
            .await?;
        let unknown = body_text(unknown).await?;

        let message = "couldn&#x27;t find a user with this username+password combination";
        assert!(wrong.contains(message));
        assert!(unknown.contains(message));
        Ok(())
    }

    #[tokio::test]
    async fn signout_destroys_session_and_clears_cookie() -> Result<()> {
        let app = TestApp::new(AppConfig::default()).await?;
        let (user, cookie) = app.user("carol", "password1", Role::Standard).await?;

        let response = app.send(Method::GET, "/signout", Some(&cookie), None).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(session_cookie(&response).as_deref(), Some("WebApp="));
        assert!(app.state.sessions().owned_by(&user.id).await?.is_empty());

        let response = app.send(Method::GET, "/account", Some(&cookie), None).await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        Ok(())
    }
}
