use utoipa::{
    openapi::{Contact, InfoBuilder, License, Tag},
    OpenApi,
};

use super::handlers::{health, settings, users};
use crate::store::{Role, UserConfig};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        users::list_users,
        users::delete_user,
        settings::own_settings,
        settings::user_settings,
    ),
    components(schemas(health::Health, users::UserListing, UserConfig, Role))
)]
struct ApiDoc;

/// `OpenAPI` document of the JSON endpoints, with info taken from Cargo.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = cargo_contact();
    info.license = cargo_license();
    doc.info = info;

    doc.tags = Some(vec![
        tag("health", "Service status"),
        tag("users", "User administration (admin only)"),
        tag("settings", "Per-user preferences"),
    ]);
    doc
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(':').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }
    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.find('<') {
        Some(start) => (
            non_empty(author[..start].trim()),
            non_empty(author[start + 1..].trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}
