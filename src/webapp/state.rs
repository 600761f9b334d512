//! Shared application state handed to every handler.

use std::{path::PathBuf, sync::Arc};

use super::render::{HtmlRenderer, Renderer};
use crate::{
    auth::{Credentials, Sessions},
    error::Result,
    store::{Stores, UserConfig},
};

const DEFAULT_APP_NAME: &str = "WebApp";
const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

/// Characters RFC 6265 forbids in a cookie name besides controls and spaces.
const COOKIE_NAME_SEPARATORS: &str = "()<>@,;:\\\"/[]?={}";

/// The app name doubles as the session cookie name.
#[derive(Debug, thiserror::Error)]
#[error("app name {0:?} cannot be used as a cookie name")]
pub struct InvalidAppName(String);

#[derive(Clone, Debug)]
pub struct AppConfig {
    app_name: String,
    open_registration: bool,
    assets_dir: Option<PathBuf>,
    backend: String,
    body_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            open_registration: false,
            assets_dir: None,
            backend: "files".to_string(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl AppConfig {
    /// # Errors
    /// Rejects names that are not a valid cookie name: empty, non-ASCII,
    /// whitespace, control or separator characters.
    pub fn new(app_name: impl Into<String>) -> Result<Self, InvalidAppName> {
        let app_name = app_name.into();
        let valid = !app_name.is_empty()
            && app_name
                .chars()
                .all(|c| c.is_ascii_graphic() && !COOKIE_NAME_SEPARATORS.contains(c));
        if !valid {
            return Err(InvalidAppName(app_name));
        }
        Ok(Self {
            app_name,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn with_open_registration(mut self, open: bool) -> Self {
        self.open_registration = open;
        self
    }

    #[must_use]
    pub fn with_assets_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.assets_dir = dir;
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    #[must_use]
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Also the session cookie name.
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[must_use]
    pub fn open_registration(&self) -> bool {
        self.open_registration
    }

    #[must_use]
    pub fn assets_dir(&self) -> Option<&PathBuf> {
        self.assets_dir.as_ref()
    }

    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    #[must_use]
    pub fn body_limit(&self) -> usize {
        self.body_limit
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    stores: Stores,
    credentials: Credentials,
    sessions: Sessions,
    renderer: Arc<dyn Renderer>,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, stores: Stores) -> Self {
        Self::with_renderer(config, stores, Arc::new(HtmlRenderer))
    }

    #[must_use]
    pub fn with_renderer(config: AppConfig, stores: Stores, renderer: Arc<dyn Renderer>) -> Self {
        let credentials = Credentials::new(stores.users.clone());
        let sessions = Sessions::new(stores.sessions.clone(), config.app_name());
        Self {
            config: Arc::new(config),
            stores,
            credentials,
            sessions,
            renderer,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    #[must_use]
    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    #[must_use]
    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// Stored settings, or the defaults when the user never saved any.
    ///
    /// # Errors
    /// Returns an error if the settings store fails.
    pub async fn settings_for(&self, user_id: &str) -> Result<UserConfig> {
        Ok(self
            .stores
            .settings
            .find(user_id)
            .await?
            .unwrap_or_else(|| UserConfig::defaults(user_id)))
    }
}
