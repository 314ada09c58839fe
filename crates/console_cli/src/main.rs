mod commands;
mod config;
mod paths;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "lab-console")]
#[command(about = "Session and realtime status client for the lab backend")]
#[command(version)]
struct Cli {
    /// Config file (JSON or TOML); defaults to ~/.labconsole/config.json
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[arg(long, env = "LAB_BACKEND_URL")]
    backend_url: Option<String>,

    #[arg(long, env = "LAB_STATUS_WS_URL")]
    ws_url: Option<String>,

    /// Directory holding the persisted session
    #[arg(long, env = "LAB_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and persist the session
    Login {
        #[arg(long, short)]
        username: String,
        /// Read from stdin when omitted
        #[arg(long, env = "LAB_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Exchange the refresh token for a new token pair
    Refresh,
    /// Show the current session
    Whoami,
    /// Clear the persisted session
    Logout,
    /// Authenticated GET against the backend
    Get {
        /// Path relative to the backend URL, e.g. /api/devices
        path: String,
    },
    /// Stream connection state and status updates until Ctrl-C
    Watch,
    /// Send one query over the status channel
    Query {
        kind: String,
        /// JSON payload
        #[arg(long)]
        data: Option<String>,
    },
    /// Ask for the current status of resources
    Status {
        #[arg(required = true)]
        resource_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
                .with_file(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(backend_url) = cli.backend_url {
        config.session.backend_url = backend_url;
    }
    if let Some(ws_url) = cli.ws_url {
        config.channel.url = ws_url;
    }
    if let Some(storage_dir) = cli.storage_dir {
        config.storage_dir = Some(storage_dir);
    }

    let app = commands::App::build(config).await?;
    match cli.command {
        Commands::Login { username, password } => app.login(&username, password).await,
        Commands::Refresh => app.refresh().await,
        Commands::Whoami => app.whoami(),
        Commands::Logout => app.logout().await,
        Commands::Get { path } => app.get(&path).await,
        Commands::Watch => app.watch().await,
        Commands::Query { kind, data } => app.query(&kind, data.as_deref()).await,
        Commands::Status { resource_ids } => app.status(&resource_ids).await,
    }
}
