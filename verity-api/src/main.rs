//! verity-api - Profile picture verification service
//!
//! `serve` (default) runs the HTTP API; `enroll` creates or finds a user and
//! prints a session token for it.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use verity_common::auth::{issue_session_token, load_session_secret};
use verity_common::config::{RootLayout, VerityConfig};
use verity_common::db::init_database;
use verity_common::events::EventBus;

use verity_api::db::users;
use verity_api::error::set_development_mode;
use verity_api::AppState;

/// Event bus capacity for SSE fan-out
const EVENT_BUS_CAPACITY: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "verity-api")]
#[command(about = "Profile picture verification service")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root folder holding the database, uploads and staging area
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Create (or find) a user and print a session token
    Enroll(EnrollArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct EnrollArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    linkedin_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = VerityConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config);

    let root = config.resolve_root_folder(cli.root_folder.as_deref());
    let layout = RootLayout::new(root);

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(config, layout, args).await,
        Command::Enroll(args) => enroll(&config, &layout, args).await,
    }
}

/// Install the global subscriber; `RUST_LOG` wins over `logging.level`
fn init_tracing(config: &VerityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=debug", config.logging.level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn open_database(layout: &RootLayout) -> Result<sqlx::SqlitePool> {
    layout
        .ensure_directories_exist()
        .context("Failed to initialize root folder")?;

    let db_path = layout.database_path();
    info!("Database: {}", db_path.display());
    init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))
}

async fn serve(config: VerityConfig, layout: RootLayout, args: ServeArgs) -> Result<()> {
    let port = args.port.unwrap_or(config.port);

    info!("Starting verity-api");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", layout.root().display());
    info!("Environment: {:?}", config.environment);

    let db = open_database(&layout).await?;
    let session_secret = load_session_secret(&db)
        .await
        .context("Failed to load session secret")?;

    set_development_mode(config.is_development());

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let state = AppState::new(db, event_bus, &layout, &config, session_secret);
    let app = verity_api::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn enroll(config: &VerityConfig, layout: &RootLayout, args: EnrollArgs) -> Result<()> {
    let db = open_database(layout).await?;
    let secret = load_session_secret(&db)
        .await
        .context("Failed to load session secret")?;

    let user = users::find_or_create_user(&db, &args.email, &args.name, args.linkedin_id.as_deref())
        .await
        .context("Failed to enroll user")?;
    info!(user_id = %user.id, email = %user.email, "User enrolled");

    let token = issue_session_token(user.id, &secret, Duration::hours(config.session_ttl_hours))
        .context("Failed to issue session token")?;
    println!("{}", token);

    db.close().await;
    Ok(())
}

/// Graceful shutdown on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
