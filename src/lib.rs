//! # WebApp
//!
//! A small multi-tenant web application: visitors register and log in, users
//! edit their account and per-user settings, and administrators list and
//! delete accounts.
//!
//! ## Layout
//!
//! - [`store`]: persistence contracts with YAML-file and Postgres backends.
//! - [`auth`]: password credentials and cookie sessions.
//! - [`webapp`]: the HTTP surface, a gate chain of public, login-only and
//!   admin-only routes in front of the handlers.
//! - [`cli`]: argument parsing, configuration and telemetry for the binary.
//!
//! On first start with an empty user store an `admin` account is created and
//! its generated password is logged once.

pub mod auth;
pub mod cli;
pub mod error;
pub mod store;
pub mod webapp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
