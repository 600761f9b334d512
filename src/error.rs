//! Error types shared by the stores, the auth engines and the HTTP layer.
//!
//! Two classes exist: [`ValidationError`] is the user's fault and is rendered
//! back into the originating form, everything else in [`Error`] is an
//! infrastructure failure that ends up as a `500` response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// User-correctable input problems.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("you must supply a username")]
    EmptyUsername,
    #[error("you must supply an email")]
    EmptyEmail,
    #[error("you must supply a password")]
    EmptyPassword,
    #[error("your password is too short")]
    PasswordTooShort,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("an account has already been registered with that email address")]
    EmailTaken,
    #[error("couldn't find a user with this username+password combination")]
    CredentialsIncorrect,
    #[error("passwords didn't match")]
    PasswordIncorrect,
}

impl ValidationError {
    /// Localized message, falls back to English for unknown languages.
    #[must_use]
    pub fn message(self, lang: &str) -> &'static str {
        match (lang, self) {
            ("de", Self::EmptyUsername) => "Sie müssen einen Benutzernamen angeben",
            ("de", Self::EmptyEmail) => "Sie müssen eine E-Mail Adresse angeben",
            ("de", Self::EmptyPassword) => "Sie müssen ein Passwort angeben",
            ("de", Self::PasswordTooShort) => "Das angegebene Passwort ist zu kurz",
            ("de", Self::UsernameTaken) => "Der Benutzername ist bereits vergeben",
            ("de", Self::EmailTaken) => "Ein Konto mit der E-Mail Adresse existiert bereits",
            ("de", Self::CredentialsIncorrect) => {
                "Kein Benutzer mit diesem Namen und dem angegebenen Passwort gefunden"
            }
            ("de", Self::PasswordIncorrect) => "Die Passwörter stimmen nicht überein",
            (_, Self::EmptyUsername) => "you must supply a username",
            (_, Self::EmptyEmail) => "you must supply an email",
            (_, Self::EmptyPassword) => "you must supply a password",
            (_, Self::PasswordTooShort) => "your password is too short",
            (_, Self::UsernameTaken) => "username is already taken",
            (_, Self::EmailTaken) => {
                "an account has already been registered with that email address"
            }
            (_, Self::CredentialsIncorrect) => {
                "couldn't find a user with this username+password combination"
            }
            (_, Self::PasswordIncorrect) => "passwords didn't match",
        }
    }
}

/// Persistence failures from either storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    /// A save would give two users the same username or email.
    #[error("conflict: {0}")]
    Conflict(ValidationError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("store: {0}")]
    Store(StoreError),
    #[error("password hashing: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("blocking task: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("render: {0}")]
    Render(String),
    #[error("encode: {0}")]
    Encode(String),
    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

impl Error {
    /// Returns the validation error when this is a user-correctable failure.
    #[must_use]
    pub fn validation(&self) -> Option<ValidationError> {
        match self {
            Self::Validation(err) => Some(*err),
            _ => None,
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(err) => Self::Validation(err),
            err => Self::Store(err),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Some(err) = self.validation() {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
        error!("request failed: {self}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
