use crate::{
    cli::telemetry,
    store::{Backend, Stores},
    webapp::{
        self,
        state::{AppConfig, AppState},
    },
};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::{net::SocketAddr, path::PathBuf};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub bind: SocketAddr,
    pub backend: Backend,
    pub app_name: Option<String>,
    pub open_registration: bool,
    pub assets_dir: Option<PathBuf>,
}

/// Open the stores, make sure an administrator exists and serve.
///
/// # Errors
/// Returns an error if the stores cannot be opened, the administrator cannot
/// be created or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let config = app_config(&args)?;

    let stores = Stores::open(&args.backend)
        .await
        .with_context(|| format!("Could not open {} storage", args.backend.kind()))?;

    let state = AppState::new(config, stores);

    state
        .credentials()
        .bootstrap_admin()
        .await
        .context("Could not create the administrator account")?;

    let result = webapp::serve(args.bind, state).await;
    telemetry::shutdown_tracer();
    result
}

fn app_config(args: &Args) -> Result<AppConfig> {
    let config = match &args.app_name {
        Some(name) if !name.trim().is_empty() => {
            AppConfig::new(name.trim()).context("Invalid --app-name")?
        }
        _ => AppConfig::default(),
    };
    let assets_dir = args.assets_dir.clone().filter(|dir| {
        let exists = dir.is_dir();
        if !exists {
            warn!("Assets directory {} not found, /assets disabled", dir.display());
        }
        exists
    });
    Ok(config
        .with_open_registration(args.open_registration)
        .with_assets_dir(assets_dir)
        .with_backend(args.backend.kind()))
}

fn log_startup_args(args: &Args) {
    let storage = match &args.backend {
        Backend::Files { data_dir } => format!("files:{}", data_dir.display()),
        Backend::Postgres { dsn } => format!("postgres:{}", redact_dsn(dsn.expose_secret())),
    };
    info!(
        bind = %args.bind,
        storage,
        open_registration = args.open_registration,
        app_name = args.app_name.as_deref().unwrap_or("WebApp"),
        "Startup configuration"
    );
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}
