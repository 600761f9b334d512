//! Page rendering and localization.
//!
//! Handlers only talk to the [`Renderer`] trait. [`HtmlRenderer`] is the
//! built-in implementation: inline HTML without a template engine, text taken
//! from a small static catalog.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::Result,
    store::{models::DEFAULT_LANGUAGE, PublicUser, UserConfig},
};

pub const AVAILABLE_LANGUAGES: [&str; 2] = ["en", "de"];

#[must_use]
pub fn is_language_available(lang: &str) -> bool {
    AVAILABLE_LANGUAGES.contains(&lang)
}

/// `lang` query parameter first (two letters, if available), then the user's
/// settings (if available), else the default.
#[must_use]
pub fn resolve_language(requested: Option<&str>, settings: Option<&UserConfig>) -> String {
    let requested = requested.map(|lang| lang.chars().take(2).collect::<String>());
    if let Some(lang) = requested.filter(|lang| is_language_available(lang)) {
        return lang;
    }
    settings
        .map(|config| config.language.as_str())
        .filter(|lang| is_language_available(lang))
        .unwrap_or(DEFAULT_LANGUAGE)
        .to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Page {
    Home,
    UsersNew,
    UsersEdit,
    UsersIndex,
    SessionsNew,
    SessionsDestroy,
    UserConfigsEdit,
}

impl Page {
    #[must_use]
    pub const fn template(self) -> &'static str {
        match self {
            Self::Home => "index/home",
            Self::UsersNew => "users/new",
            Self::UsersEdit => "users/edit",
            Self::UsersIndex => "users/index",
            Self::SessionsNew => "sessions/new",
            Self::SessionsDestroy => "sessions/destroy",
            Self::UserConfigsEdit => "userconfigs/edit",
        }
    }

    const fn title_key(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::UsersNew => "register",
            Self::UsersEdit => "account",
            Self::UsersIndex => "users",
            Self::SessionsNew => "login",
            Self::SessionsDestroy => "signed_out",
            Self::UserConfigsEdit => "settings",
        }
    }
}

/// Everything a page needs besides its own data.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PageContext {
    pub current_user: Option<PublicUser>,
    pub open_registration: bool,
    pub flash: Option<String>,
    pub language: String,
    pub is_admin: bool,
    pub app_name: String,
    pub dark_mode: bool,
    pub title: String,
    pub error: Option<String>,
    pub data: Map<String, Value>,
}

impl PageContext {
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    fn text(&self, key: &str) -> &'static str {
        translate(&self.language, key)
    }

    fn data_str(&self, key: &str) -> &str {
        self.data.get(key).and_then(Value::as_str).unwrap_or_default()
    }
}

pub trait Renderer: Send + Sync {
    /// # Errors
    /// Returns an error if the page cannot be produced from `context`.
    fn render(&self, page: Page, context: &PageContext) -> Result<Vec<u8>>;
}

/// Localized text for `key`; unknown languages use English, unknown keys
/// render empty.
#[must_use]
pub fn translate(lang: &str, key: &str) -> &'static str {
    let german = match key {
        "home" => "Startseite",
        "register" => "Registrieren",
        "login" => "Anmelden",
        "logout" => "Abmelden",
        "account" => "Konto",
        "settings" => "Einstellungen",
        "users" => "Benutzer",
        "username" => "Benutzername",
        "email" => "E-Mail",
        "password" => "Passwort",
        "current_password" => "Aktuelles Passwort",
        "new_password" => "Neues Passwort",
        "language" => "Sprache",
        "dark_mode" => "Dunkles Design",
        "save" => "Speichern",
        "welcome" => "Willkommen",
        "signed_out" => "Abgemeldet",
        "signed_out_text" => "Sie wurden erfolgreich abgemeldet.",
        "sessions" => "Sitzungen",
        "role" => "Rolle",
        "edit" => "Bearbeiten",
        _ => "",
    };
    if lang == "de" && !german.is_empty() {
        return german;
    }
    match key {
        "home" => "Home",
        "register" => "Register",
        "login" => "Login",
        "logout" => "Logout",
        "account" => "Account",
        "settings" => "Settings",
        "users" => "Users",
        "username" => "Username",
        "email" => "Email",
        "password" => "Password",
        "current_password" => "Current password",
        "new_password" => "New password",
        "language" => "Language",
        "dark_mode" => "Dark mode",
        "save" => "Save",
        "welcome" => "Welcome",
        "signed_out" => "Signed out",
        "signed_out_text" => "You have been signed out.",
        "sessions" => "Sessions",
        "role" => "Role",
        "edit" => "Edit",
        _ => "",
    }
}

/// Title for `page` in the context's language.
#[must_use]
pub fn page_title(page: Page, lang: &str) -> &'static str {
    translate(lang, page.title_key())
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

const STYLES: &str = r"
    body { font-family: sans-serif; max-width: 960px; margin: 40px auto; padding: 0 20px; }
    body.dark { background: #1e1e1e; color: #ddd; }
    body.dark a { color: #8ab4f8; }
    nav a { margin-right: 12px; }
    .flash { background: #dff0d8; padding: 10px; border-radius: 4px; }
    .error { background: #f2dede; color: #a94442; padding: 10px; border-radius: 4px; }
    label { display: block; margin-top: 10px; font-weight: bold; }
    table { width: 100%; border-collapse: collapse; }
    th, td { text-align: left; padding: 8px; border-bottom: 1px solid #ccc; }
";

#[derive(Clone, Copy, Debug, Default)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    fn nav(context: &PageContext) -> String {
        let mut links = vec![format!(r#"<a href="/">{}</a>"#, context.text("home"))];
        if context.current_user.is_some() {
            links.push(format!(r#"<a href="/account">{}</a>"#, context.text("account")));
            links.push(format!(r#"<a href="/settings">{}</a>"#, context.text("settings")));
            if context.is_admin {
                links.push(format!(r#"<a href="/users">{}</a>"#, context.text("users")));
            }
            links.push(format!(r#"<a href="/signout">{}</a>"#, context.text("logout")));
        } else {
            links.push(format!(r#"<a href="/login">{}</a>"#, context.text("login")));
            if context.open_registration {
                links.push(format!(
                    r#"<a href="/register">{}</a>"#,
                    context.text("register")
                ));
            }
        }
        format!("<nav>{}</nav>", links.join(""))
    }

    fn input(context: &PageContext, kind: &str, name: &str, key: &str, value: &str) -> String {
        format!(
            r#"<label for="{name}">{}</label><input type="{kind}" id="{name}" name="{name}" value="{}">"#,
            context.text(key),
            html_escape(value)
        )
    }

    fn body(page: Page, context: &PageContext) -> String {
        match page {
            Page::Home => match &context.current_user {
                Some(user) => format!(
                    "<p>{}, {}!</p>",
                    context.text("welcome"),
                    html_escape(&user.username)
                ),
                None => format!("<p>{}!</p>", context.text("welcome")),
            },
            Page::UsersNew => format!(
                r#"<form method="POST" action="/register">{}{}{}<button type="submit">{}</button></form>"#,
                Self::input(context, "text", "username", "username", context.data_str("username")),
                Self::input(context, "email", "email", "email", context.data_str("email")),
                Self::input(context, "password", "password", "password", ""),
                context.text("register")
            ),
            Page::SessionsNew => {
                let next = context.data_str("next");
                let action = if next.is_empty() {
                    "/login".to_string()
                } else {
                    let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
                    format!("/login?next={encoded}")
                };
                format!(
                    r#"<form method="POST" action="{}">{}{}<button type="submit">{}</button></form>"#,
                    html_escape(&action),
                    Self::input(context, "text", "username", "username", context.data_str("username")),
                    Self::input(context, "password", "password", "password", ""),
                    context.text("login")
                )
            }
            Page::SessionsDestroy => format!("<p>{}</p>", context.text("signed_out_text")),
            Page::UsersEdit => {
                let user = context.data.get("user");
                let field = |name: &str| {
                    user.and_then(|user| user.get(name))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                };
                format!(
                    r#"<form method="POST" action="{}">{}{}{}{}<button type="submit">{}</button></form>"#,
                    html_escape(context.data_str("action")),
                    Self::input(context, "text", "username", "username", field("username")),
                    Self::input(context, "email", "email", "email", field("email")),
                    Self::input(context, "password", "currentPassword", "current_password", ""),
                    Self::input(context, "password", "newPassword", "new_password", ""),
                    context.text("save")
                )
            }
            Page::UsersIndex => {
                let rows: String = context
                    .data
                    .get("users")
                    .and_then(Value::as_array)
                    .map(|users| {
                        users
                            .iter()
                            .map(|user| {
                                let field =
                                    |name: &str| user.get(name).and_then(Value::as_str).unwrap_or_default();
                                let sessions = user
                                    .get("sessions")
                                    .and_then(Value::as_array)
                                    .map_or(0, Vec::len);
                                format!(
                                    r#"<tr><td>{}</td><td>{}</td><td>{}</td><td>{sessions}</td><td><a href="/users/{}">{}</a></td></tr>"#,
                                    html_escape(field("username")),
                                    html_escape(field("email")),
                                    html_escape(field("role")),
                                    html_escape(field("id")),
                                    context.text("edit")
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                format!(
                    "<table><tr><th>{}</th><th>{}</th><th>{}</th><th>{}</th><th></th></tr>{rows}</table>",
                    context.text("username"),
                    context.text("email"),
                    context.text("role"),
                    context.text("sessions")
                )
            }
            Page::UserConfigsEdit => {
                let settings = context.data.get("settings");
                let language = settings
                    .and_then(|s| s.get("language"))
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_LANGUAGE);
                let dark_mode = settings
                    .and_then(|s| s.get("darkMode"))
                    .and_then(Value::as_bool)
                    .unwrap_or_default();
                let options: String = AVAILABLE_LANGUAGES
                    .iter()
                    .map(|lang| {
                        let selected = if *lang == language { " selected" } else { "" };
                        format!(r#"<option value="{lang}"{selected}>{lang}</option>"#)
                    })
                    .collect();
                format!(
                    r#"<form method="POST" action="/settings"><label for="language">{}</label><select id="language" name="language">{options}</select><label for="darkmode">{}</label><input type="checkbox" id="darkmode" name="darkmode" value="dark"{}><button type="submit">{}</button></form>"#,
                    context.text("language"),
                    context.text("dark_mode"),
                    if dark_mode { " checked" } else { "" },
                    context.text("save")
                )
            }
        }
    }
}

impl Renderer for HtmlRenderer {
    fn render(&self, page: Page, context: &PageContext) -> Result<Vec<u8>> {
        let flash = context.flash.as_deref().map_or(String::new(), |flash| {
            format!(r#"<div class="flash">{}</div>"#, html_escape(flash))
        });
        let error = context.error.as_deref().map_or(String::new(), |error| {
            format!(r#"<div class="error">{}</div>"#, html_escape(error))
        });
        let html = format!(
            r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
    <meta charset="utf-8">
    <title>{title} - {app}</title>
    <link rel="stylesheet" href="/assets/css/app.css">
    <style>{STYLES}</style>
</head>
<body class="{theme}" data-page="{template}">
    {nav}
    <h1>{title}</h1>
    {flash}
    {error}
    {body}
</body>
</html>"#,
            lang = html_escape(&context.language),
            title = html_escape(&context.title),
            app = html_escape(&context.app_name),
            theme = if context.dark_mode { "dark" } else { "light" },
            template = page.template(),
            nav = Self::nav(context),
            body = Self::body(page, context),
        );
        Ok(html.into_bytes())
    }
}
