//! Registration, account editing and user administration.

use axum::{
    extract::{Extension, Form, Path, Query},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use super::{page_context, redirect, render, with_flash, PageQuery};
use crate::{
    auth::AccountUpdate,
    error::{Error, Result},
    store::{PublicUser, Role, User},
    webapp::{gate::Visitor, render::Page, state::AppState},
};

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default, rename = "currentPassword")]
    current_password: String,
    #[serde(default, rename = "newPassword")]
    new_password: String,
}

/// A user as listed by the admin API.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListing {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    /// IDs of the sessions owned by this user.
    pub sessions: Vec<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// `json` (default), `yaml`, `csv` or `xml`.
    format: Option<String>,
}

/// Root element of the XML listing.
#[derive(Serialize)]
#[serde(rename = "users")]
struct XmlListing<'a> {
    user: &'a [UserListing],
}

pub async fn register_form(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Query(query): Query<PageQuery>,
) -> Result<Response> {
    if !state.config().open_registration() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let context = page_context(&state, &visitor, &query, Page::UsersNew).await?;
    render(&state, StatusCode::OK, Page::UsersNew, &context)
}

pub async fn register(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Query(query): Query<PageQuery>,
    Form(form): Form<RegisterForm>,
) -> Result<Response> {
    if !state.config().open_registration() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    // The store rejects a name taken since the credentials check.
    let created = async {
        let user = state
            .credentials()
            .register(&form.username, &form.email, &form.password)
            .await?;
        state.stores().users.save(&user).await?;
        Ok::<_, Error>(user)
    };
    let user = match created.await {
        Ok(user) => user,
        Err(Error::Validation(err)) => {
            let context = page_context(&state, &visitor, &query, Page::UsersNew).await?;
            let message = err.message(&context.language);
            let context = context
                .with_error(message)
                .with_data("username", json!(form.username))
                .with_data("email", json!(form.email));
            return render(&state, StatusCode::BAD_REQUEST, Page::UsersNew, &context);
        }
        Err(err) => return Err(err),
    };
    info!(user_id = %user.id, "user registered");

    let mut headers = HeaderMap::new();
    let session = state.sessions().issue(&mut headers);
    state.sessions().attach(session, &user.id).await?;

    Ok((headers, redirect(&with_flash("/", "User created"))).into_response())
}

/// Target of an edit: the visitor's own account or the one in the path.
enum Target {
    Own,
    ById(String),
}

async fn editable_user(
    state: &AppState,
    visitor: &Visitor,
    target: Target,
) -> Result<Result<User, Response>> {
    let actor = visitor.require_user()?;
    let user = match target {
        Target::Own => actor.clone(),
        Target::ById(id) => match state.stores().users.find(&id).await? {
            Some(user) => user,
            None => return Ok(Err(StatusCode::NOT_FOUND.into_response())),
        },
    };
    if user.id != actor.id && !actor.is_admin() {
        warn!(actor = %actor.id, target = %user.id, "edit user not allowed");
        return Ok(Err(StatusCode::FORBIDDEN.into_response()));
    }
    Ok(Ok(user))
}

fn edit_action(target: &Target) -> String {
    match target {
        Target::Own => "/account".to_string(),
        Target::ById(id) => format!("/users/{id}"),
    }
}

async fn show_edit(
    state: AppState,
    visitor: Visitor,
    query: PageQuery,
    target: Target,
) -> Result<Response> {
    let action = edit_action(&target);
    let user = match editable_user(&state, &visitor, target).await? {
        Ok(user) => user,
        Err(response) => return Ok(response),
    };
    let context = page_context(&state, &visitor, &query, Page::UsersEdit)
        .await?
        .with_data("user", json!(PublicUser::from(&user)))
        .with_data("action", json!(action));
    render(&state, StatusCode::OK, Page::UsersEdit, &context)
}

async fn apply_edit(
    state: AppState,
    visitor: Visitor,
    query: PageQuery,
    target: Target,
    form: AccountForm,
) -> Result<Response> {
    let action = edit_action(&target);
    let user = match editable_user(&state, &visitor, target).await? {
        Ok(user) => user,
        Err(response) => return Ok(response),
    };
    // Admins override passwords of other accounts; their own follows the
    // normal rules.
    let admin_override =
        visitor.is_admin() && visitor.user.as_ref().is_some_and(|actor| actor.id != user.id);

    let change = AccountUpdate {
        username: &form.username,
        email: &form.email,
        current_password: &form.current_password,
        new_password: &form.new_password,
    };
    let saved = async {
        let updated = state.credentials().update(&user, &change, admin_override).await?;
        state.stores().users.save(&updated).await?;
        Ok::<_, Error>(updated)
    };
    let updated = match saved.await {
        Ok(updated) => updated,
        Err(Error::Validation(err)) => {
            let context = page_context(&state, &visitor, &query, Page::UsersEdit).await?;
            let message = err.message(&context.language);
            let shown = PublicUser {
                username: form.username.clone(),
                email: form.email.clone(),
                ..PublicUser::from(&user)
            };
            let context = context
                .with_error(message)
                .with_data("user", json!(shown))
                .with_data("action", json!(action));
            return render(&state, StatusCode::BAD_REQUEST, Page::UsersEdit, &context);
        }
        Err(err) => return Err(err),
    };
    info!(user_id = %updated.id, "user updated");

    Ok(redirect(&with_flash(&format!("/users/{}", updated.id), "user updated")))
}

pub async fn account_form(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Query(query): Query<PageQuery>,
) -> Result<Response> {
    show_edit(state, visitor, query, Target::Own).await
}

pub async fn account_update(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Query(query): Query<PageQuery>,
    Form(form): Form<AccountForm>,
) -> Result<Response> {
    apply_edit(state, visitor, query, Target::Own, form).await
}

pub async fn user_form(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Response> {
    show_edit(state, visitor, query, Target::ById(id)).await
}

pub async fn user_update(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
    Form(form): Form<AccountForm>,
) -> Result<Response> {
    apply_edit(state, visitor, query, Target::ById(id), form).await
}

async fn listings(state: &AppState) -> Result<Vec<UserListing>> {
    let users = state.stores().users.all().await?;
    let mut listings = Vec::with_capacity(users.len());
    for user in users {
        let sessions = state
            .sessions()
            .owned_by(&user.id)
            .await?
            .into_iter()
            .map(|session| session.id)
            .collect();
        listings.push(UserListing {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            sessions,
        });
    }
    Ok(listings)
}

pub async fn users_index(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Query(query): Query<PageQuery>,
) -> Result<Response> {
    let users = listings(&state).await?;
    let context = page_context(&state, &visitor, &query, Page::UsersIndex)
        .await?
        .with_data("users", json!(users));
    render(&state, StatusCode::OK, Page::UsersIndex, &context)
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(ListQuery),
    responses(
        (status = 200, description = "All users, without password hashes", body = [UserListing]),
        (status = 302, description = "Not logged in or not an admin")
    ),
    tag = "users"
)]
pub async fn list_users(
    Extension(state): Extension<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let users = listings(&state).await?;
    match query.format.as_deref() {
        Some("yaml") => {
            let body = serde_yaml::to_string(&users).map_err(encode_error)?;
            Ok(([(CONTENT_TYPE, "text/yaml")], body).into_response())
        }
        Some("csv") => Ok((
            [
                (CONTENT_TYPE, "text/csv"),
                (CONTENT_DISPOSITION, "attachment;filename=users.csv"),
            ],
            users_csv(&users)?,
        )
            .into_response()),
        Some("xml") => {
            let body = quick_xml::se::to_string(&XmlListing { user: &users }).map_err(encode_error)?;
            Ok(([(CONTENT_TYPE, "application/xml")], body).into_response())
        }
        _ => Ok(Json(users).into_response()),
    }
}

fn encode_error(err: impl std::fmt::Display) -> Error {
    Error::Encode(err.to_string())
}

/// One row per user; session IDs share a cell, one per line.
fn users_csv(users: &[UserListing]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["ID", "Username", "Email", "Sessions"])
        .map_err(encode_error)?;
    for user in users {
        writer
            .write_record([
                user.id.as_str(),
                user.username.as_str(),
                user.email.as_str(),
                user.sessions.join("\n").as_str(),
            ])
            .map_err(encode_error)?;
    }
    writer.into_inner().map_err(encode_error)
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 204, description = "User, sessions and settings deleted"),
        (status = 404, description = "No user with this ID")
    ),
    tag = "users"
)]
pub async fn delete_user(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Path(id): Path<String>,
) -> Result<Response> {
    let Some(user) = state.stores().users.find(&id).await? else {
        warn!(user_id = %id, "no user found to delete");
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    // Three independent deletes; a failure midway leaves orphans behind.
    let sessions = state.sessions().destroy_all_for(&user.id).await?;
    if let Some(settings) = state.stores().settings.find(&user.id).await? {
        state.stores().settings.delete(&settings).await?;
    }
    state.stores().users.delete(&user).await?;

    let actor = visitor.user.as_ref().map_or("", |actor| actor.id.as_str());
    info!(user_id = %user.id, actor, sessions, "user deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use crate::{
        store::{Role, UserConfig},
        webapp::{
            handlers::test_support::{body_text, location, session_cookie, TestApp},
            state::AppConfig,
        },
    };
    use anyhow::Result;
    use axum::http::{Method, StatusCode};

    fn open() -> AppConfig {
        AppConfig::default().with_open_registration(true)
    }

    #[tokio::test]
    async fn registration_is_hidden_when_closed() -> Result<()> {
        let app = TestApp::new(AppConfig::default()).await?;
        let response = app.send(Method::GET, "/register", None, None).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn register_creates_user_and_session() -> Result<()> {
        let app = TestApp::new(open()).await?;
        let response = app
            .send(
                Method::POST,
                "/register",
                None,
                Some("username=alice&email=alice%40x.com&password=password1"),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response).as_deref(), Some("/?flash=User+created"));
        let cookie = session_cookie(&response).unwrap_or_default();

        let Some(alice) = app.state.stores().users.find_by_username("alice").await? else {
            anyhow::bail!("alice was not stored");
        };
        assert_ne!(alice.password_hash, "password1");
        assert_eq!(app.state.sessions().owned_by(&alice.id).await?.len(), 1);

        let response = app
            .send(
                Method::POST,
                "/register",
                None,
                Some("username=Alice&email=other%40x.com&password=password2"),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await?.contains("username is already taken"));

        let response = app.send(Method::GET, "/", Some(&cookie), None).await?;
        assert!(body_text(response).await?.contains("Welcome, alice!"));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_registrations_keep_usernames_unique() -> Result<()> {
        let app = TestApp::new(open()).await?;
        let (first, second) = tokio::join!(
            app.send(
                Method::POST,
                "/register",
                None,
                Some("username=alice&email=one%40x.com&password=password1"),
            ),
            app.send(
                Method::POST,
                "/register",
                None,
                Some("username=ALICE&email=two%40x.com&password=password2"),
            ),
        );
        let mut statuses = vec![first?.status().as_u16(), second?.status().as_u16()];
        statuses.sort_unstable();
        assert_eq!(statuses, vec![302, 400]);
        assert_eq!(app.state.stores().users.all().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn account_update_with_blank_password_changes_email_only() -> Result<()> {
        let app = TestApp::new(AppConfig::default()).await?;
        let (dave, cookie) = app.user("dave", "password1", Role::Standard).await?;

        let response = app
            .send(
                Method::POST,
                "/account",
                Some(&cookie),
                Some("username=dave&email=dave%40new.com&currentPassword=&newPassword=x"),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            location(&response),
            Some(format!("/users/{}?flash=user+updated", dave.id))
        );

        let stored = app.state.stores().users.find(&dave.id).await?;
        let Some(stored) = stored else {
            anyhow::bail!("dave disappeared");
        };
        assert_eq!(stored.email, "dave@new.com");
        assert_eq!(stored.password_hash, dave.password_hash);
        Ok(())
    }

    #[tokio::test]
    async fn editing_someone_else_requires_admin() -> Result<()> {
        let app = TestApp::new(AppConfig::default()).await?;
        let (erin, _) = app.user("erin", "password1", Role::Standard).await?;
        let (_, frank_cookie) = app.user("frank", "password1", Role::Standard).await?;
        let (_, admin_cookie) = app.user("root", "password1", Role::Admin).await?;

        let path = format!("/users/{}", erin.id);
        let response = app.send(Method::GET, &path, Some(&frank_cookie), None).await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.send(Method::GET, &path, Some(&admin_cookie), None).await?;
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .send(Method::GET, "/users/usr_missing", Some(&admin_cookie), None)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .send(
                Method::POST,
                &path,
                Some(&admin_cookie),
                Some("username=erin&email=erin%40x.com&newPassword=password7"),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(app
            .state
            .credentials()
            .authenticate("erin", "password7")
            .await
            .is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn admin_lists_users_without_hashes() -> Result<()> {
        let app = TestApp::new(AppConfig::default()).await?;
        app.user("grace", "password1", Role::Standard).await?;
        let (_, admin_cookie) = app.user("root", "password1", Role::Admin).await?;

        let response = app
            .send(Method::GET, "/api/v1/users", Some(&admin_cookie), None)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await?;
        assert!(!body.contains("$2"));
        let listed: Vec<serde_json::Value> = serde_json::from_str(&body)?;
        assert_eq!(listed.len(), 2);
        assert!(listed
            .iter()
            .all(|user| user["sessions"].as_array().is_some_and(|s| s.len() == 1)));

        let response = app
            .send(Method::GET, "/api/v1/users?format=yaml", Some(&admin_cookie), None)
            .await?;
        assert_eq!(
            response.headers().get("content-type").and_then(|v| v.to_str().ok()),
            Some("text/yaml")
        );
        assert!(body_text(response).await?.contains("username: grace"));

        let response = app
            .send(Method::GET, "/api/v1/users?format=csv", Some(&admin_cookie), None)
            .await?;
        assert_eq!(
            response.headers().get("content-type").and_then(|v| v.to_str().ok()),
            Some("text/csv")
        );
        assert_eq!(
            response
                .headers()
                .get("content-disposition")
                .and_then(|v| v.to_str().ok()),
            Some("attachment;filename=users.csv")
        );
        let body = body_text(response).await?;
        assert!(body.starts_with("ID,Username,Email,Sessions\n"));
        assert!(body.contains(",grace,grace@x.com,sess_grace"));

        let response = app
            .send(Method::GET, "/api/v1/users?format=xml", Some(&admin_cookie), None)
            .await?;
        assert_eq!(
            response.headers().get("content-type").and_then(|v| v.to_str().ok()),
            Some("application/xml")
        );
        let body = body_text(response).await?;
        assert!(body.starts_with("<users><user>"));
        assert!(body.contains("<username>grace</username>"));
        assert!(!body.contains("$2"));

        let response = app.send(Method::GET, "/users", Some(&admin_cookie), None).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn admin_delete_of_unknown_id_is_404_without_mutation() -> Result<()> {
        let app = TestApp::new(AppConfig::default()).await?;
        app.user("heidi", "password1", Role::Standard).await?;
        let (_, admin_cookie) = app.user("root", "password1", Role::Admin).await?;
        let before = app.state.stores().users.all().await?;

        let response = app
            .send(Method::DELETE, "/api/v1/users/usr_nope", Some(&admin_cookie), None)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(app.state.stores().users.all().await?, before);
        Ok(())
    }

    #[tokio::test]
    async fn admin_delete_removes_user_sessions_and_settings() -> Result<()> {
        let app = TestApp::new(AppConfig::default()).await?;
        let (ivan, ivan_cookie) = app.user("ivan", "password1", Role::Standard).await?;
        let (_, admin_cookie) = app.user("root", "password1", Role::Admin).await?;
        app.state
            .stores()
            .settings
            .save(&UserConfig::defaults(&ivan.id))
            .await?;

        // Not for standard users.
        let path = format!("/api/v1/users/{}", ivan.id);
        let response = app.send(Method::DELETE, &path, Some(&ivan_cookie), None).await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response).as_deref(), Some("/"));

        let response = app.send(Method::DELETE, &path, Some(&admin_cookie), None).await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(app.state.stores().users.find(&ivan.id).await?, None);
        assert!(app.state.sessions().owned_by(&ivan.id).await?.is_empty());
        assert_eq!(app.state.stores().settings.find(&ivan.id).await?, None);
        Ok(())
    }
}
