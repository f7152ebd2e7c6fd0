//! Conduit binary entry point.

use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use conduit::cli::{self, AdminAction, Args};
use conduit::idle::IdleMonitor;
use conduit::install::{Installer, LocalInstaller};
use conduit::security::{is_loopback, ApiKeyFile};
use conduit::{api, logging, shutdown, AppState, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long terminal sessions get to tear down after the server stops.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run 'conduit --help' for usage.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_with_filter(config.log_filter());

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: Config) -> conduit::Result<()> {
    if args.key {
        let key_file = key_file(&config)?;
        let (key, generated) = key_file.load_or_generate()?;
        if generated {
            println!(
                "Generated new API Key (saved to {}):\n{}",
                key_file.path().display(),
                key
            );
        } else {
            println!(
                "Existing API Key found ({}):\n{}",
                key_file.path().display(),
                key
            );
        }
        return Ok(());
    }

    if let Some(action) = args.admin {
        return run_admin_action(action);
    }

    let api_key = match config.security.api_key.clone() {
        Some(key) => Some(key),
        None => match key_file(&config) {
            Ok(file) => {
                let stored = file.load()?;
                if stored.is_none() {
                    info!(
                        "No API key file found at {}. Running without an API key requirement for no-origin requests.",
                        file.path().display()
                    );
                }
                stored
            }
            Err(e) => {
                warn!("Cannot locate the API key file: {}", e);
                None
            }
        },
    };

    let server_config = config.to_server_config()?;
    let token = CancellationToken::new();
    let state = AppState::from_config(&config, api_key, token.clone())?;

    info!("File API root: {}", state.files.sandbox().root().display());
    let public = server_config
        .host
        .parse::<IpAddr>()
        .is_ok_and(|ip| !is_loopback(ip));
    if public && !state.policy.requires_key() {
        warn!("Listening beyond localhost without an API key; only allow-listed origins and loopback peers are accepted");
    }

    tokio::spawn(shutdown::watch_ctrl_c(token.clone()));
    match config.idle_timeout() {
        Some(timeout) => {
            let monitor = IdleMonitor::new(
                Arc::clone(&state.activity),
                Arc::clone(&state.sessions),
                timeout,
            );
            tokio::spawn(monitor.run(token.clone()));
        }
        None => info!("Idle shutdown disabled"),
    }

    let sessions = Arc::clone(&state.sessions);
    let served = api::serve_with_state(server_config, state).await;

    token.cancel();
    shutdown::drain_sessions(&sessions, SESSION_DRAIN_TIMEOUT).await;
    info!("Conduit stopped");
    served
}

fn key_file(config: &Config) -> conduit::Result<ApiKeyFile> {
    match config.security.key_file {
        Some(ref path) => Ok(ApiKeyFile::at(path)),
        None => ApiKeyFile::default_location(),
    }
}

fn run_admin_action(action: AdminAction) -> conduit::Result<()> {
    let installer = LocalInstaller::new();
    let message = match action {
        AdminAction::InstallUser => installer.install_user(),
        AdminAction::InstallService => installer.install_service(),
        AdminAction::Uninstall => installer.uninstall(),
    }?;
    println!("{}", message);
    Ok(())
}
