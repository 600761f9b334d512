//! Postgres backed stores.
//!
//! Tables are created on construction if missing. Saves are upserts on the
//! primary key, so concurrent writers of the same row resolve as
//! last-writer-wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{Instrument, Span};

use super::{
    models::{Role, Session, User, UserConfig},
    SessionStore, SettingsStore, StoreResult, UserStore,
};
use crate::error::{StoreError, ValidationError};

const USERNAME_INDEX: &str = "users_username_idx";
const EMAIL_INDEX: &str = "users_email_idx";

fn query_span(operation: &str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

async fn run_ddl(pool: &PgPool, statements: &[&str]) -> StoreResult<()> {
    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .instrument(query_span("CREATE", statement))
            .await?;
    }
    Ok(())
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Create the `users` table and its lookup indexes if needed.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn new(pool: PgPool) -> StoreResult<Self> {
        run_ddl(
            &pool,
            &[
                r"
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    username TEXT NOT NULL,
                    email TEXT NOT NULL,
                    password TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'standard'
                )",
                "CREATE UNIQUE INDEX IF NOT EXISTS users_username_idx ON users (lower(username))",
                "CREATE UNIQUE INDEX IF NOT EXISTS users_email_idx ON users (lower(email))",
            ],
        )
        .await?;
        Ok(Self { pool })
    }

    async fn find_one(&self, query: &str, value: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }
}

/// Unique index violations on save are taken usernames or emails.
fn save_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            match db.constraint() {
                Some(USERNAME_INDEX) => {
                    return StoreError::Conflict(ValidationError::UsernameTaken)
                }
                Some(EMAIL_INDEX) => return StoreError::Conflict(ValidationError::EmailTaken),
                _ => {}
            }
        }
    }
    StoreError::Database(err)
}

fn user_from_row(row: &PgRow) -> User {
    let role: String = row.get("role");
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password"),
        role: Role::parse(&role),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find(&self, id: &str) -> StoreResult<Option<User>> {
        self.find_one(
            "SELECT id, username, email, password, role FROM users WHERE id = $1",
            id,
        )
        .await
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        if username.is_empty() {
            return Ok(None);
        }
        self.find_one(
            "SELECT id, username, email, password, role FROM users WHERE lower(username) = lower($1)",
            username,
        )
        .await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        if email.is_empty() {
            return Ok(None);
        }
        self.find_one(
            "SELECT id, username, email, password, role FROM users WHERE lower(email) = lower($1)",
            email,
        )
        .await
    }

    async fn all(&self) -> StoreResult<Vec<User>> {
        let query = "SELECT id, username, email, password, role FROM users ORDER BY id";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn save(&self, user: &User) -> StoreResult<()> {
        let query = r"
            INSERT INTO users (id, username, email, password, role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                email = EXCLUDED.email,
                password = EXCLUDED.password,
                role = EXCLUDED.role
        ";
        sqlx::query(query)
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(save_error)?;
        Ok(())
    }

    async fn delete(&self, user: &User) -> StoreResult<()> {
        let query = "DELETE FROM users WHERE id = $1";
        sqlx::query(query)
            .bind(&user.id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(())
    }
}

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Create the `sessions` table if needed.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn new(pool: PgPool) -> StoreResult<Self> {
        run_ddl(
            &pool,
            &[
                r"
                CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL DEFAULT '',
                    expiry TIMESTAMPTZ NOT NULL
                )",
                "CREATE INDEX IF NOT EXISTS sessions_user_id_idx ON sessions (user_id)",
            ],
        )
        .await?;
        Ok(Self { pool })
    }
}

fn session_from_row(row: &PgRow) -> Session {
    let expiry: DateTime<Utc> = row.get("expiry");
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        expiry,
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find(&self, id: &str) -> StoreResult<Option<Session>> {
        let query = "SELECT id, user_id, expiry FROM sessions WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn find_by_user(&self, user_id: &str) -> StoreResult<Vec<Session>> {
        if user_id.is_empty() {
            return Ok(Vec::new());
        }
        let query = "SELECT id, user_id, expiry FROM sessions WHERE user_id = $1 ORDER BY id";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn save(&self, session: &Session) -> StoreResult<()> {
        let query = r"
            INSERT INTO sessions (id, user_id, expiry)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                expiry = EXCLUDED.expiry
        ";
        sqlx::query(query)
            .bind(&session.id)
            .bind(&session.user_id)
            .bind(session.expiry)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn delete(&self, session: &Session) -> StoreResult<()> {
        let query = "DELETE FROM sessions WHERE id = $1";
        sqlx::query(query)
            .bind(&session.id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(())
    }
}

pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    /// Create the `userconfigs` table if needed.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn new(pool: PgPool) -> StoreResult<Self> {
        run_ddl(
            &pool,
            &[r"
                CREATE TABLE IF NOT EXISTS userconfigs (
                    userid TEXT PRIMARY KEY,
                    language TEXT NOT NULL DEFAULT 'en',
                    darkmode BOOLEAN NOT NULL DEFAULT FALSE
                )"],
        )
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn find(&self, user_id: &str) -> StoreResult<Option<UserConfig>> {
        let query = "SELECT userid, language, darkmode FROM userconfigs WHERE userid = $1";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.map(|row| UserConfig {
            user_id: row.get("userid"),
            language: row.get("language"),
            dark_mode: row.get("darkmode"),
        }))
    }

    async fn save(&self, config: &UserConfig) -> StoreResult<()> {
        let query = r"
            INSERT INTO userconfigs (userid, language, darkmode)
            VALUES ($1, $2, $3)
            ON CONFLICT (userid) DO UPDATE SET
                language = EXCLUDED.language,
                darkmode = EXCLUDED.darkmode
        ";
        sqlx::query(query)
            .bind(&config.user_id)
            .bind(&config.language)
            .bind(config.dark_mode)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn delete(&self, config: &UserConfig) -> StoreResult<()> {
        let query = "DELETE FROM userconfigs WHERE userid = $1";
        sqlx::query(query)
            .bind(&config.user_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(())
    }
}
