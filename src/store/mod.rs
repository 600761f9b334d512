//! Storage contracts and backend selection.
//!
//! Every store comes in two interchangeable flavours: YAML files in the data
//! directory, or Postgres tables. Lookups that find nothing return `Ok(None)`;
//! only I/O and database failures are errors. `save` is an upsert keyed by the
//! record's primary ID.

mod file;
pub mod models;
mod postgres;

pub use file::{FileSessionStore, FileSettingsStore, FileUserStore};
pub use models::{PublicUser, Role, Session, User, UserConfig};
pub use postgres::{PgSessionStore, PgSettingsStore, PgUserStore};

use crate::error::StoreError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, id: &str) -> StoreResult<Option<User>>;
    /// Case-insensitive; an empty name never matches.
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    /// Case-insensitive; an empty email never matches.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn all(&self) -> StoreResult<Vec<User>>;
    async fn save(&self, user: &User) -> StoreResult<()>;
    async fn delete(&self, user: &User) -> StoreResult<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find(&self, id: &str) -> StoreResult<Option<Session>>;
    async fn find_by_user(&self, user_id: &str) -> StoreResult<Vec<Session>>;
    async fn save(&self, session: &Session) -> StoreResult<()>;
    async fn delete(&self, session: &Session) -> StoreResult<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn find(&self, user_id: &str) -> StoreResult<Option<UserConfig>>;
    async fn save(&self, config: &UserConfig) -> StoreResult<()>;
    async fn delete(&self, config: &UserConfig) -> StoreResult<()>;
}

/// Which persistence mechanism backs the stores.
#[derive(Clone, Debug)]
pub enum Backend {
    Files { data_dir: PathBuf },
    Postgres { dsn: SecretString },
}

impl Backend {
    /// `files` (or nothing) selects the YAML stores, anything else is a DSN.
    #[must_use]
    pub fn from_connector(connector: Option<&str>, data_dir: PathBuf) -> Self {
        match connector.map(str::trim) {
            None | Some("" | "files") => Self::Files { data_dir },
            Some(dsn) => Self::Postgres {
                dsn: SecretString::from(dsn.to_string()),
            },
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Files { .. } => "files",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// The three stores, shared by every request.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub settings: Arc<dyn SettingsStore>,
}

impl Stores {
    /// Open (and for Postgres, migrate) the stores for the given backend.
    ///
    /// # Errors
    /// Returns an error if a data file cannot be read or parsed, or the
    /// database is unreachable or the schema cannot be created.
    pub async fn open(backend: &Backend) -> StoreResult<Self> {
        let stores = match backend {
            Backend::Files { data_dir } => {
                tokio::fs::create_dir_all(data_dir).await?;
                Self {
                    users: Arc::new(FileUserStore::open(data_dir.join("users.yaml")).await?),
                    sessions: Arc::new(
                        FileSessionStore::open(data_dir.join("sessions.yaml")).await?,
                    ),
                    settings: Arc::new(
                        FileSettingsStore::open(data_dir.join("userconfigs.yaml")).await?,
                    ),
                }
            }
            Backend::Postgres { dsn } => {
                let pool = PgPoolOptions::new()
                    .min_connections(1)
                    .max_connections(5)
                    .max_lifetime(Duration::from_secs(60 * 2))
                    .test_before_acquire(true)
                    .connect(dsn.expose_secret())
                    .await?;
                Self {
                    users: Arc::new(PgUserStore::new(pool.clone()).await?),
                    sessions: Arc::new(PgSessionStore::new(pool.clone()).await?),
                    settings: Arc::new(PgSettingsStore::new(pool).await?),
                }
            }
        };
        info!(backend = backend.kind(), "Backend storages created");
        Ok(stores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_selects_backend() {
        let dir = PathBuf::from("./data");
        assert_eq!(Backend::from_connector(None, dir.clone()).kind(), "files");
        assert_eq!(
            Backend::from_connector(Some("files"), dir.clone()).kind(),
            "files"
        );
        assert_eq!(Backend::from_connector(Some(" "), dir.clone()).kind(), "files");
        assert_eq!(
            Backend::from_connector(Some("postgres://u:p@localhost/webapp"), dir).kind(),
            "postgres"
        );
    }
}
