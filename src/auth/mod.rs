//! Credential and session engines.

mod credentials;
mod sessions;
pub mod utils;

pub use credentials::{
    AccountUpdate, Credentials, ADMIN_EMAIL, ADMIN_USERNAME, BOOTSTRAP_TARGET, MIN_PASSWORD_LENGTH,
};
pub use sessions::{Sessions, SESSION_TTL_HOURS};
