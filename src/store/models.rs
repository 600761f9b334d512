//! Records persisted by the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const DEFAULT_LANGUAGE: &str = "en";

/// ID of the administrator in data files that predate [`Role`].
pub const LEGACY_ADMIN_ID: &str = "admin";

/// Privilege level, decided when the account is created.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Standard,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Admin => "admin",
        }
    }

    /// Unknown values from the database degrade to `Standard`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "admin" {
            Self::Admin
        } else {
            Self::Standard
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "hashedPassword", default)]
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,
}

impl User {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A user as shown to clients; never carries the password hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// Server-side proof of a login, referenced by the cookie value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Empty until a user has logged in with this session.
    #[serde(rename = "userID", default)]
    pub user_id: String,
    pub expiry: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_empty()
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Per-user preferences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserConfig {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub language: String,
    #[serde(rename = "darkMode", default)]
    pub dark_mode: bool,
}

impl UserConfig {
    #[must_use]
    pub fn defaults(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            dark_mode: false,
        }
    }
}
