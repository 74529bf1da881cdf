//! Command-line client that keeps a persistent session against the
//! crop-yield backend.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use cropyield_session::api::{ApiRequest, HttpAuthApi, ReqwestTransport, Transport};
use cropyield_session::config::{load_config, print_schema, ConfigV1};
use cropyield_session::error::SessionResult;
use cropyield_session::gateway::RequestGateway;
use cropyield_session::models::{LoginMode, LoginRequest};
use cropyield_session::session::{SessionDeps, SessionManager, SessionSettings};
use cropyield_session::store::create_store;
use cropyield_session::utils::logger::init_logging;

#[derive(Parser)]
#[command(name = "cropyield-session")]
#[command(about = "Session client for the crop-yield platform API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "./config.yaml")]
    config: PathBuf,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    schema: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the restored session
    Status,

    /// Sign in and persist the session
    Login {
        username: String,
        password: String,

        /// Keep the session across restarts
        #[arg(long)]
        remember: bool,

        /// Sign in through the administrator endpoint
        #[arg(long)]
        admin: bool,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Trade the refresh token for a new access token
    Refresh,

    /// GET an API path with the session's credentials and print the payload
    Get { path: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.schema {
        return match print_schema() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(config, cli.command.unwrap_or(Commands::Status)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ConfigV1, command: Commands) -> SessionResult<()> {
    let store = create_store(&config.store, &config.session.storage_key)?;
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&config.api)?);
    let api = Arc::new(HttpAuthApi::new(
        Arc::clone(&transport),
        config.api.endpoints.clone(),
    ));
    let session = SessionManager::new(
        SessionSettings::from_config(&config),
        SessionDeps::new(api, store),
    );
    let gateway = RequestGateway::new(transport, Arc::clone(&session), config.api.endpoints);

    let state = session.initialize().await;
    info!(?state, session_id = session.session_id(), "Session initialised");

    match command {
        Commands::Status => match session.user() {
            Some(user) if session.is_authenticated() => println!(
                "Signed in as {} (roles: {:?}), token expires at {}",
                user.display_name(),
                user.roles,
                session.expires_at()
            ),
            _ => println!("Not signed in"),
        },
        Commands::Login {
            username,
            password,
            remember,
            admin,
        } => {
            let mode = if admin { LoginMode::Admin } else { LoginMode::Default };
            let request = LoginRequest::new(username, password).with_mode(mode);
            let user = session.login(request, remember).await?;
            println!("Signed in as {}", user.display_name());
        }
        Commands::Logout => {
            session.logout();
            // The server notification runs in the background; let it go out
            // before the runtime shuts down.
            tokio::time::sleep(Duration::from_millis(250)).await;
            println!("Signed out");
        }
        Commands::Refresh => {
            session.refresh().await?;
            println!("Token refreshed, expires at {}", session.expires_at());
        }
        Commands::Get { path } => {
            let response = gateway.send(ApiRequest::get(path)).await?;
            let rendered = serde_json::to_string_pretty(response.payload())
                .unwrap_or_else(|_| response.payload().to_string());
            println!("{}", rendered);
        }
    }
    Ok(())
}
