pub mod logging;
pub mod storage;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};
use std::path::PathBuf;

pub const ARG_CONFIG: &str = "config";
pub const ARG_BIND: &str = "bind";
pub const ARG_OPEN_REGISTRATION: &str = "open-registration";
pub const ARG_APP_NAME: &str = "app-name";
pub const ARG_ASSETS_DIR: &str = "assets-dir";

// No clap defaults here: unset arguments fall through to the config file.
#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("webapp")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_CONFIG)
                .short('c')
                .long(ARG_CONFIG)
                .help("Path to a YAML configuration file, created with defaults if missing")
                .env("WEBAPP_CONFIG")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_BIND)
                .short('b')
                .long(ARG_BIND)
                .help("Address to listen on (default: [::]:3000)")
                .env("WEBAPP_BIND_ADDRESS"),
        )
        .arg(
            Arg::new(ARG_OPEN_REGISTRATION)
                .long(ARG_OPEN_REGISTRATION)
                .help("Let anonymous visitors create accounts")
                .env("WEBAPP_OPEN_REGISTRATION")
                .num_args(0..=1)
                .default_missing_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_APP_NAME)
                .long(ARG_APP_NAME)
                .help("Application name, also used as the session cookie name (default: WebApp)")
                .env("WEBAPP_APP_NAME"),
        )
        .arg(
            Arg::new(ARG_ASSETS_DIR)
                .long(ARG_ASSETS_DIR)
                .help("Directory served under /assets (default: ./assets)")
                .env("WEBAPP_ASSETS_DIRECTORY")
                .value_parser(clap::value_parser!(PathBuf)),
        );

    let command = storage::with_args(command);
    logging::with_args(command)
}
