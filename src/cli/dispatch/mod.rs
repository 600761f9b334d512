use crate::{
    cli::{
        actions::{server::Args, Action},
        commands::{self, storage},
        config::{parse_bind_address, FileConfig},
    },
    store::Backend,
};
use anyhow::{Context, Result};
use clap::ArgMatches;
use std::path::PathBuf;

/// Merge arguments over the configuration file over the defaults.
///
/// # Errors
/// Returns an error if the configuration file or the bind address is invalid.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let file = match matches.get_one::<PathBuf>(commands::ARG_CONFIG) {
        Some(path) => FileConfig::load_or_create(path)
            .with_context(|| format!("Could not load configuration {}", path.display()))?,
        None => FileConfig::default(),
    };
    Ok(Action::Server(merge(matches, file)?))
}

fn merge(matches: &ArgMatches, file: FileConfig) -> Result<Args> {
    let defaults = FileConfig::defaults();
    let string = |id: &str| matches.get_one::<String>(id).cloned();
    let path = |id: &str| matches.get_one::<PathBuf>(id).cloned();

    let bind = string(commands::ARG_BIND)
        .or(file.bind_address)
        .or(defaults.bind_address)
        .unwrap_or_default();
    let bind = parse_bind_address(&bind)?;

    let data_dir = path(storage::ARG_DATA_DIR)
        .or(file.data_directory)
        .or(defaults.data_directory)
        .unwrap_or_default();
    let connector = string(storage::ARG_DB_CONNECTOR).or(file.db_connector);
    let backend = Backend::from_connector(connector.as_deref(), data_dir);

    let open_registration = matches
        .get_one::<bool>(commands::ARG_OPEN_REGISTRATION)
        .copied()
        .or(file.open_registration)
        .unwrap_or(false);

    Ok(Args {
        bind,
        backend,
        app_name: string(commands::ARG_APP_NAME).or(file.app_name),
        open_registration,
        assets_dir: path(commands::ARG_ASSETS_DIR)
            .or(file.assets_directory)
            .or(defaults.assets_directory),
    })
}
