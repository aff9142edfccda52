//! threat-chat-server: WebSocket endpoint streaming augmented model replies.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use threat_chat_client::config::{self, Config};
use threat_chat_server::{
    serve, ChatHandler, ConnectionRegistry, ContextRetriever, HandlerSettings, JsonFileStore,
    KeywordIndex, MemoryStore, OpenAiCompatibleClient, ServerError, ServerState, ThreatStore,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "threat-chat-server", version, about = "Threat-intel chat WebSocket server")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", env = "THREAT_CHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address; overrides `server.host`.
    #[arg(long)]
    host: Option<String>,

    /// Listen port; overrides `server.port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// JSON threat store; overrides `server.store_path`.
    #[arg(long)]
    store: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<Config, ServerError> {
    let path = config::resolve_config_path(cli.config.as_deref());
    let mut cfg = config::load_or_default(path.as_deref())?;
    cfg.apply_env_overrides();
    if let Some(host) = &cli.host {
        cfg.server.host = Some(host.clone());
    }
    if let Some(port) = cli.port {
        cfg.server.port = Some(port);
    }
    if let Some(store) = &cli.store {
        cfg.server.store_path = Some(store.clone());
    }
    Ok(cfg)
}

fn build_state(cfg: &Config) -> Result<ServerState, ServerError> {
    let store: Arc<dyn ThreatStore> = match &cfg.server.store_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using JSON threat store");
            Arc::new(JsonFileStore::new(path))
        }
        None => {
            tracing::warn!("no threat store configured; replies will not be augmented");
            Arc::new(MemoryStore::default())
        }
    };
    let index = Arc::new(KeywordIndex::threat_terms()?);
    let backend = Arc::new(OpenAiCompatibleClient::from_config(cfg)?);
    let registry = Arc::new(ConnectionRegistry::new());
    let handler = ChatHandler::new(
        ContextRetriever::new(index, store),
        backend,
        registry.clone(),
        HandlerSettings::from_config(cfg),
    );
    Ok(ServerState {
        handler: Arc::new(handler),
        registry,
        invocation_timeout: Duration::from_secs(cfg.invocation_timeout_secs()),
    })
}

async fn run(cli: Cli) -> Result<(), ServerError> {
    let cfg = load_config(&cli)?;
    let state = Arc::new(build_state(&cfg)?);
    let listener = TcpListener::bind((cfg.host(), cfg.port())).await?;
    tracing::info!(model = %cfg.model_name(), "server ready");

    tokio::select! {
        res = serve(listener, state) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server stopped");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
