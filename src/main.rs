use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use pinset_chat::application::errors::ChatError;
use pinset_chat::application::presence::{PresenceRegistry, SessionContext};
use pinset_chat::application::services::{ConversationDirectory, FanoutCoordinator};
use pinset_chat::domain::entities::UserProfile;
use pinset_chat::domain::traits::{IdentityProvider, MessageStore};
use pinset_chat::infrastructure::adapters::{router, AppState};
use pinset_chat::infrastructure::config::{session_expiry, Config, SeedSession};
use pinset_chat::infrastructure::database::SqliteStore;

#[derive(Parser)]
#[command(name = "pinset-chat")]
#[command(about = "Real-time presence and message fan-out for Pinset chats", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat server
    Run {
        /// Keep everything in memory instead of the database file
        #[arg(long)]
        in_memory: bool,
        /// Register a session at startup, as USER_ID:NICK_NAME:TOKEN (repeatable)
        #[arg(long = "session", value_name = "USER_ID:NICK_NAME:TOKEN")]
        sessions: Vec<SeedSession>,
    },
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
    /// Register a user and print a session token for them
    CreateSession {
        #[arg(long)]
        user_id: u64,
        #[arg(long)]
        nick_name: String,
        /// Session lifetime in hours
        #[arg(long, default_value_t = 24)]
        ttl_hours: i64,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            in_memory,
            sessions,
        } => run_server(&cli.config, in_memory, sessions),
        Commands::Version => {
            println!("pinset-chat v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig => init_config(),
        Commands::CreateSession {
            user_id,
            nick_name,
            ttl_hours,
        } => create_session(&cli.config, user_id, nick_name, ttl_hours),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(config_path: &str) -> Result<Config, ChatError> {
    if Path::new(config_path).exists() {
        Ok(Config::load(config_path)?)
    } else {
        Ok(Config::load_env()?)
    }
}

fn init_logging(filter: &str) {
    // RUST_LOG wins over the configured filter
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
}

fn run_server(
    config_path: &str,
    in_memory: bool,
    sessions: Vec<SeedSession>,
) -> Result<(), ChatError> {
    let mut config = load_config(config_path)?;
    if in_memory {
        config.database.in_memory = true;
    }
    config.database.seed.extend(sessions);
    config.validate()?;
    init_logging(&config.logging.filter);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), ChatError> {
    tracing::info!("Starting pinset-chat v{}", env!("CARGO_PKG_VERSION"));

    let db = Arc::new(SqliteStore::from_config(&config.database).await?);
    if config.database.in_memory {
        tracing::warn!("Running with in-memory storage, nothing survives a restart");
        if config.database.seed.is_empty() {
            tracing::warn!("No seed sessions configured, every connection will be rejected");
        }
    } else {
        tracing::info!("Database initialized at {}", config.database.path.display());
    }
    let store: Arc<dyn MessageStore> = db.clone();
    let identity: Arc<dyn IdentityProvider> = db;

    let directory = Arc::new(ConversationDirectory::new(store.clone(), identity.clone()));
    let registry = Arc::new(PresenceRegistry::new());
    let coordinator = Arc::new(
        FanoutCoordinator::new(store, directory.clone(), registry.clone(), config.delivery_policy())
            .with_slow_consumer_limit(config.delivery.slow_consumer_drops),
    );
    tracing::info!(
        "Delivery policy {:?}, queue capacity {}",
        coordinator.policy(),
        config.delivery.queue_capacity
    );

    let shutdown = CancellationToken::new();
    let state = AppState {
        session: SessionContext {
            registry,
            coordinator,
            queue_capacity: config.delivery.queue_capacity,
            shutdown: shutdown.clone(),
        },
        directory,
        identity,
        max_frame_bytes: config.server.max_frame_bytes,
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down, closing all sessions");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

fn init_config() -> Result<(), ChatError> {
    let yaml = Config::default().to_yaml()?;
    println!("{}", yaml);
    println!("\nSave this to config.yaml and adjust as needed.");
    Ok(())
}

fn create_session(
    config_path: &str,
    user_id: u64,
    nick_name: String,
    ttl_hours: i64,
) -> Result<(), ChatError> {
    let config = load_config(config_path)?;
    let token = uuid::Uuid::new_v4().simple().to_string();
    let expires_at = session_expiry(ttl_hours)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let db = SqliteStore::open(&config.database.path)?;
        db.upsert_user(&UserProfile::new(user_id, nick_name)).await?;
        db.create_session(&token, user_id, expires_at).await?;
        Ok::<_, ChatError>(())
    })?;

    println!("{}", token);
    Ok(())
}
