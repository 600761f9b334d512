//! Staged access control.
//!
//! A [`GateChain`] is an ordered list of stages. Each stage pairs a [`Gate`]
//! with the routes it protects. A request walks the stages in order: the gate
//! either lets it through or answers with a redirect, then the stage's routes
//! get a chance to answer. Routes that do not match answer with the
//! [`Unanswered`] marker and the walk continues. When no stage answers the
//! result is `404`.

use axum::{
    body::{to_bytes, Body},
    http::{header::LOCATION, HeaderMap, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Router,
};
use std::{
    convert::Infallible,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tower::{Service, ServiceExt};
use tracing::{debug, warn};

use super::state::AppState;
use crate::{
    error::{Error, Result},
    store::{Session, User},
};

/// Who is making the request, resolved once per request.
#[derive(Clone, Debug, Default)]
pub struct Visitor {
    pub session: Option<Session>,
    pub user: Option<User>,
}

impl Visitor {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(User::is_admin)
    }

    /// The logged-in user, for handlers behind [`Gate::RequireLogin`].
    ///
    /// # Errors
    /// Returns an error when the gate was bypassed and there is no user.
    pub fn require_user(&self) -> Result<&User> {
        self.user
            .as_ref()
            .ok_or_else(|| Error::Inconsistent("login-gated handler without user".to_string()))
    }

    /// Look up the session cookie and its owner.
    ///
    /// # Errors
    /// Returns an error if a store fails.
    pub async fn resolve(state: &AppState, headers: &HeaderMap) -> Result<Self> {
        let Some(session) = state.sessions().resolve(headers).await? else {
            return Ok(Self::default());
        };
        let user = if session.is_anonymous() {
            None
        } else {
            state.stores().users.find(&session.user_id).await?
        };
        Ok(Self {
            session: Some(session),
            user,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Public,
    RequireLogin,
    RequireAdmin,
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

impl Gate {
    /// `Some(response)` stops the chain, `None` lets the request through.
    #[must_use]
    pub fn check(self, visitor: &Visitor, uri: &Uri) -> Option<Response> {
        match self {
            Self::Public => None,
            Self::RequireLogin if visitor.is_authenticated() => None,
            Self::RequireLogin => {
                let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
                let next: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
                debug!(path = uri.path(), "login required");
                Some(found(&format!("/login?next={next}")))
            }
            Self::RequireAdmin if visitor.is_admin() => None,
            Self::RequireAdmin => {
                debug!(path = uri.path(), "admin required");
                Some(found("/"))
            }
        }
    }
}

/// Response extension set by a stage's fallback: "no route here".
#[derive(Clone, Copy, Debug)]
pub struct Unanswered;

async fn unanswered() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Extension(Unanswered))
}

#[derive(Clone)]
struct Stage {
    gate: Gate,
    routes: Router,
}

#[derive(Clone)]
pub struct GateChain {
    state: AppState,
    stages: Vec<Stage>,
}

impl GateChain {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            stages: Vec::new(),
        }
    }

    /// Append a stage. Its routes receive the [`AppState`] and the
    /// [`Visitor`] as extensions.
    #[must_use]
    pub fn stage(mut self, gate: Gate, routes: Router) -> Self {
        let routes = routes
            .fallback(unanswered)
            .layer(Extension(self.state.clone()));
        self.stages.push(Stage { gate, routes });
        self
    }

    async fn dispatch(self, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let bytes = match to_bytes(body, self.state.config().body_limit()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Failed to read request body: {err}");
                return StatusCode::PAYLOAD_TOO_LARGE.into_response();
            }
        };

        let visitor = match Visitor::resolve(&self.state, &parts.headers).await {
            Ok(visitor) => visitor,
            Err(err) => return err.into_response(),
        };

        for stage in self.stages {
            if let Some(response) = stage.gate.check(&visitor, &parts.uri) {
                return response;
            }

            let mut request = Request::new(Body::from(bytes.clone()));
            *request.method_mut() = parts.method.clone();
            *request.uri_mut() = parts.uri.clone();
            *request.version_mut() = parts.version;
            *request.headers_mut() = parts.headers.clone();
            request.extensions_mut().insert(visitor.clone());

            let response = match stage.routes.oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            if response.extensions().get::<Unanswered>().is_none() {
                return response;
            }
        }

        StatusCode::NOT_FOUND.into_response()
    }
}

impl Service<Request<Body>> for GateChain {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let chain = self.clone();
        Box::pin(async move { Ok(chain.dispatch(request).await) })
    }
}

impl std::fmt::Debug for GateChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateChain")
            .field(
                "stages",
                &self.stages.iter().map(|stage| stage.gate).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::{Backend, Role, Stores},
        webapp::state::AppConfig,
    };
    use anyhow::Result;
    use axum::{http::header::COOKIE, routing::get};
    use chrono::{Duration, Utc};

    async fn state() -> Result<(tempfile::TempDir, AppState)> {
        let dir = tempfile::tempdir()?;
        let stores = Stores::open(&Backend::Files {
            data_dir: dir.path().to_path_buf(),
        })
        .await?;
        Ok((dir, AppState::new(AppConfig::default(), stores)))
    }

    async fn login_as(state: &AppState, role: Role) -> Result<String> {
        let user = User {
            id: format!("usr_{}", role.as_str()),
            username: role.as_str().to_string(),
            email: format!("{}@x.com", role.as_str()),
            password_hash: "$2b$10$unused".to_string(),
            role,
        };
        state.stores().users.save(&user).await?;
        let session = Session {
            id: format!("sess_{}", role.as_str()),
            user_id: user.id.clone(),
            expiry: Utc::now() + Duration::hours(1),
        };
        state.stores().sessions.save(&session).await?;
        Ok(format!("WebApp={}", session.id))
    }

    fn chain(state: AppState) -> GateChain {
        GateChain::new(state)
            .stage(Gate::Public, Router::new().route("/", get(|| async { "home" })))
            .stage(
                Gate::RequireLogin,
                Router::new().route("/account", get(|| async { "account" })),
            )
            .stage(
                Gate::RequireAdmin,
                Router::new().route("/users", get(|| async { "users" })),
            )
    }

    fn request(path: &str, cookie: Option<&str>) -> Result<Request<Body>> {
        let mut builder = Request::builder().uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        Ok(builder.body(Body::empty())?)
    }

    fn location(response: &Response) -> Option<&str> {
        response.headers().get(LOCATION).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn admin_path_without_cookie_redirects_to_login() -> Result<()> {
        let (_dir, state) = state().await?;
        let response = chain(state).oneshot(request("/users?page=2", None)?).await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), Some("/login?next=%2Fusers%3Fpage%3D2"));
        Ok(())
    }

    #[tokio::test]
    async fn admin_path_with_standard_user_redirects_home() -> Result<()> {
        let (_dir, state) = state().await?;
        let cookie = login_as(&state, Role::Standard).await?;
        let response = chain(state).oneshot(request("/users", Some(&cookie))?).await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), Some("/"));
        Ok(())
    }

    #[tokio::test]
    async fn admin_reaches_admin_routes() -> Result<()> {
        let (_dir, state) = state().await?;
        let cookie = login_as(&state, Role::Admin).await?;
        let response = chain(state).oneshot(request("/users", Some(&cookie))?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await?;
        assert_eq!(&body[..], b"users");
        Ok(())
    }

    #[tokio::test]
    async fn public_routes_answer_before_any_gate() -> Result<()> {
        let (_dir, state) = state().await?;
        let response = chain(state).oneshot(request("/", None)?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_path_is_404_for_admin() -> Result<()> {
        let (_dir, state) = state().await?;
        let cookie = login_as(&state, Role::Admin).await?;
        let response = chain(state).oneshot(request("/nowhere", Some(&cookie))?).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.extensions().get::<Unanswered>().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn anonymous_session_does_not_authenticate() -> Result<()> {
        let (_dir, state) = state().await?;
        state
            .stores()
            .sessions
            .save(&Session {
                id: "sess_anon".to_string(),
                user_id: String::new(),
                expiry: Utc::now() + Duration::hours(1),
            })
            .await?;
        let response = chain(state)
            .oneshot(request("/account", Some("WebApp=sess_anon"))?)
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), Some("/login?next=%2Faccount"));
        Ok(())
    }
}
