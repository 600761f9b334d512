//! Cookie-bound session lifecycle.

use axum::http::{
    header::{COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error};

use super::utils::generate_session_id;
use crate::{
    error::Result,
    store::{Session, SessionStore},
};

pub const SESSION_TTL_HOURS: i64 = 72;

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[derive(Clone)]
pub struct Sessions {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
}

impl Sessions {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, cookie_name: impl Into<String>) -> Self {
        Self {
            store,
            cookie_name: cookie_name.into(),
        }
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// New anonymous session, announced to the client through `Set-Cookie`.
    /// It is only persisted once a user is attached.
    pub fn issue(&self, response_headers: &mut HeaderMap) -> Session {
        let session = Session {
            id: generate_session_id(),
            user_id: String::new(),
            expiry: Utc::now() + Duration::hours(SESSION_TTL_HOURS),
        };
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Expires={}",
            self.cookie_name,
            session.id,
            http_date(session.expiry)
        );
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response_headers.append(SET_COOKIE, value);
            }
            Err(err) => error!("Failed to build session cookie: {err}"),
        }
        session
    }

    /// Bind `session` to `user_id` and persist it.
    ///
    /// # Errors
    /// Returns an error if the session cannot be saved.
    pub async fn attach(&self, mut session: Session, user_id: &str) -> Result<Session> {
        session.user_id = user_id.to_string();
        self.store.save(&session).await?;
        debug!(session_id = %session.id, user_id, "session attached");
        Ok(session)
    }

    /// Session referenced by the request cookie, if it exists and is live.
    /// Expired sessions are deleted as they are found.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn resolve(&self, request_headers: &HeaderMap) -> Result<Option<Session>> {
        let Some(id) = self.session_id(request_headers) else {
            return Ok(None);
        };
        let Some(session) = self.store.find(&id).await? else {
            return Ok(None);
        };
        if session.is_expired() {
            debug!(session_id = %session.id, "purging expired session");
            self.store.delete(&session).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// The live session from the request, or a freshly issued one.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn resolve_or_issue(
        &self,
        request_headers: &HeaderMap,
        response_headers: &mut HeaderMap,
    ) -> Result<Session> {
        match self.resolve(request_headers).await? {
            Some(session) => Ok(session),
            None => Ok(self.issue(response_headers)),
        }
    }

    /// Deleting an unknown session is not an error.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn destroy(&self, session: &Session) -> Result<()> {
        self.store.delete(session).await?;
        Ok(())
    }

    /// Delete every session owned by `user_id`.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn destroy_all_for(&self, user_id: &str) -> Result<usize> {
        let sessions = self.store.find_by_user(user_id).await?;
        for session in &sessions {
            self.store.delete(session).await?;
        }
        Ok(sessions.len())
    }

    /// Sessions owned by `user_id`, expired ones included.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn owned_by(&self, user_id: &str) -> Result<Vec<Session>> {
        Ok(self.store.find_by_user(user_id).await?)
    }

    /// Tell the client to drop the session cookie.
    pub fn clear_cookie(&self, response_headers: &mut HeaderMap) {
        let cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.cookie_name
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response_headers.append(SET_COOKIE, value);
        }
    }

    fn session_id(&self, headers: &HeaderMap) -> Option<String> {
        for header in headers.get_all(COOKIE) {
            let Ok(value) = header.to_str() else {
                continue;
            };
            for pair in value.split(';') {
                let mut parts = pair.trim().splitn(2, '=');
                let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let val = val.trim();
                if key.trim() == self.cookie_name && !val.is_empty() {
                    return Some(val.to_string());
                }
            }
        }
        None
    }
}
