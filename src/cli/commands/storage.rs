use clap::{Arg, Command};

pub const ARG_DB_CONNECTOR: &str = "db-connector";
pub const ARG_DATA_DIR: &str = "data-dir";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DB_CONNECTOR)
                .long(ARG_DB_CONNECTOR)
                .help("Storage backend: `files` or a Postgres connection string")
                .long_help(
                    "Storage backend. `files` (the default) keeps users, sessions and settings in YAML files under the data directory; anything else is used as a Postgres connection string.",
                )
                .env("WEBAPP_DB_CONNECTOR")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_DATA_DIR)
                .long(ARG_DATA_DIR)
                .help("Directory of the YAML data files (default: ./data)")
                .env("WEBAPP_DATA_DIRECTORY")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
}
