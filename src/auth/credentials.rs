//! Account creation, login checks and account updates.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::utils::{generate_password, generate_user_id, hash_password, verify_password};
use crate::{
    error::{Error, Result, ValidationError},
    store::{Role, User, UserStore},
};

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub const ADMIN_USERNAME: &str = "admin";

/// Log target of the one-time admin password, kept visible at every verbosity.
pub const BOOTSTRAP_TARGET: &str = "webapp::bootstrap";
pub const ADMIN_EMAIL: &str = "root@localhost";

/// Values submitted from an account form.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccountUpdate<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub current_password: &'a str,
    pub new_password: &'a str,
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn check_new_password(password: &str) -> Result<(), ValidationError> {
    if is_blank(password) {
        return Err(ValidationError::EmptyPassword);
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}

#[derive(Clone)]
pub struct Credentials {
    users: Arc<dyn UserStore>,
}

impl Credentials {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Validate and build a new standard account. The caller persists it.
    ///
    /// Only the first failing check is reported, in this order: blank
    /// username, blank email, blank password, short password, taken
    /// username, taken email.
    ///
    /// # Errors
    /// Returns a validation error as above, or a store/hash failure.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() {
            return Err(ValidationError::EmptyUsername.into());
        }
        if email.is_empty() {
            return Err(ValidationError::EmptyEmail.into());
        }
        check_new_password(password)?;

        if self.users.find_by_username(username).await?.is_some() {
            return Err(ValidationError::UsernameTaken.into());
        }
        if self.users.find_by_email(email).await?.is_some() {
            return Err(ValidationError::EmailTaken.into());
        }

        Ok(User {
            id: generate_user_id(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password).await?,
            role: Role::Standard,
        })
    }

    /// Unknown user and wrong password fail identically.
    ///
    /// # Errors
    /// Returns `CredentialsIncorrect`, or a store/hash failure.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let Some(user) = self.users.find_by_username(username.trim()).await? else {
            debug!("login for unknown username");
            return Err(ValidationError::CredentialsIncorrect.into());
        };
        if !verify_password(password, &user.password_hash).await? {
            debug!(user_id = %user.id, "login with wrong password");
            return Err(ValidationError::CredentialsIncorrect.into());
        }
        Ok(user)
    }

    /// Apply an account form to `user` and return the new record. The caller
    /// persists it.
    ///
    /// A non-admin actor leaving `current_password` blank changes only the
    /// username and email. A non-blank current password must verify. Admins
    /// skip the current password and always set a new one.
    ///
    /// # Errors
    /// Returns a validation error, or a store/hash failure.
    pub async fn update(
        &self,
        user: &User,
        change: &AccountUpdate<'_>,
        is_admin_actor: bool,
    ) -> Result<User> {
        let username = change.username.trim();
        let email = change.email.trim();
        if username.is_empty() {
            return Err(ValidationError::EmptyUsername.into());
        }
        if email.is_empty() {
            return Err(ValidationError::EmptyEmail.into());
        }
        if let Some(other) = self.users.find_by_username(username).await? {
            if other.id != user.id {
                return Err(ValidationError::UsernameTaken.into());
            }
        }
        if let Some(other) = self.users.find_by_email(email).await? {
            if other.id != user.id {
                return Err(ValidationError::EmailTaken.into());
            }
        }

        let mut updated = user.clone();
        updated.username = username.to_string();
        updated.email = email.to_string();

        if !is_admin_actor {
            if is_blank(change.current_password) {
                return Ok(updated);
            }
            if !verify_password(change.current_password, &user.password_hash).await? {
                return Err(ValidationError::PasswordIncorrect.into());
            }
        }

        check_new_password(change.new_password)?;
        updated.password_hash = hash_password(change.new_password).await?;
        Ok(updated)
    }

    /// Create the administrator account when no admin exists yet.
    ///
    /// Returns the generated password, which is also logged once at `warn`.
    ///
    /// # Errors
    /// Fails if the `admin` username belongs to a non-admin account, or on a
    /// store/hash failure.
    pub async fn bootstrap_admin(&self) -> Result<Option<SecretString>> {
        if self.users.all().await?.iter().any(User::is_admin) {
            debug!("admin account present");
            return Ok(None);
        }
        if let Some(existing) = self.users.find_by_username(ADMIN_USERNAME).await? {
            return Err(Error::Inconsistent(format!(
                "username {ADMIN_USERNAME} is taken by non-admin account {}",
                existing.id
            )));
        }

        let password = generate_password();
        let admin = User {
            id: generate_user_id(),
            username: ADMIN_USERNAME.to_string(),
            email: ADMIN_EMAIL.to_string(),
            password_hash: hash_password(password.expose_secret()).await?,
            role: Role::Admin,
        };
        self.users.save(&admin).await?;

        info!(user_id = %admin.id, "admin account created");
        warn!(
            target: BOOTSTRAP_TARGET,
            "Created admin account, username: {ADMIN_USERNAME}, password: {}",
            password.expose_secret()
        );
        Ok(Some(password))
    }
}
