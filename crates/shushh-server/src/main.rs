//! Shushh Relay Server
//!
//! Authenticates WebSocket clients, negotiates a transport key with each of
//! them and relays end-to-end encrypted chat traffic, queuing it for
//! recipients that are offline.

mod handlers;
mod services;
mod storage;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use shushh_core::ports::TransportKeyStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use services::{AuthService, KeyRegistry, OfflineQueue, Relay};
use storage::Database;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub auth_service: Arc<AuthService>,
}

#[derive(Parser)]
#[command(name = "shushh-server")]
#[command(author, version, about = "Shushh relay server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default)
    Serve,

    /// Print an access token for a user, signed with the configured secret
    #[command(name = "issue-token")]
    IssueToken {
        /// User identity to embed
        user_id: String,

        /// Validity in days
        #[arg(short, long, default_value_t = 7)]
        days: i64,
    },
}

#[tokio::main]
async fn main() {
    // Set up panic hook to log crashes
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()));
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("[PANIC] at {:?}: {}", location, payload);
        tracing::error!("PANIC at {:?}: {}", location, payload);
    }));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("[FATAL] Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::IssueToken { user_id, days } => issue_token(&user_id, days),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run_server() -> Result<()> {
    info!("Starting Shushh relay v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("Failed to load configuration")?;
    info!(
        "Config loaded: bind={}, db={}, queue_ttl={}s",
        config.bind_address,
        config.database_path.as_deref().unwrap_or("<memory>"),
        config.queue_ttl_secs
    );

    let keys = match &config.database_path {
        Some(path) => {
            let db = Database::new(path)
                .await
                .context("Failed to initialize database")?;
            let store: Arc<dyn TransportKeyStore> = Arc::new(db);
            KeyRegistry::with_store(store)
        }
        None => {
            warn!("SHUSHH_DATABASE_PATH not set, transport keys will not survive a restart");
            KeyRegistry::in_memory()
        }
    };

    let queue = OfflineQueue::new(config.queue_ttl());
    queue.start_cleanup_task();

    let state = AppState {
        relay: Arc::new(Relay::new(keys, queue)),
        auth_service: Arc::new(AuthService::new(config.jwt_secret())),
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(handlers::ws::handler))
        .route("/api/v1/online", get(handlers::users::online))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("Server listening on {}", addr);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn issue_token(user_id: &str, days: i64) -> Result<()> {
    let config = load_config().context("Failed to load configuration")?;
    let auth = AuthService::new(config.jwt_secret());
    let token = auth.issue_token(user_id, chrono::Duration::days(days))?;
    println!("{}", token);
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
struct Config {
    bind_address: String,
    database_path: Option<String>,
    jwt_secret: Option<String>,
    queue_ttl_secs: u64,
}

impl Config {
    fn jwt_secret(&self) -> String {
        self.jwt_secret.clone().unwrap_or_else(|| {
            warn!("SHUSHH_JWT_SECRET not set, using default (insecure for production)");
            "change-me-in-production".to_string()
        })
    }

    fn queue_ttl(&self) -> Option<Duration> {
        (self.queue_ttl_secs > 0).then(|| Duration::from_secs(self.queue_ttl_secs))
    }
}

/// Defaults overlaid with `SHUSHH_*` environment variables
fn load_config() -> Result<Config> {
    let settings = config::Config::builder()
        .set_default("bind_address", "0.0.0.0:4000")?
        .set_default("queue_ttl_secs", 7 * 24 * 60 * 60_i64)?
        .add_source(config::Environment::with_prefix("SHUSHH").try_parsing(true))
        .build()?;

    Ok(settings.try_deserialize()?)
}
