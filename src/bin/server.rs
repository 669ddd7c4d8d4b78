//! Voice concierge server binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use parley::auth::StaticTokenVerifier;
use parley::llm::OpenAiCompletion;
use parley::pipeline::{Collaborators, SystemClock};
use parley::store::SqliteStore;
use parley::stt::WhisperCliTranscriber;
use parley::tts::PiperCliSynthesizer;
use parley::{AppState, ParleyConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Parley: spoken-language event concierge over WebSocket.
#[derive(Parser)]
#[command(name = "parley-server", version, about)]
struct Cli {
    /// Path to TOML configuration file. Defaults to the user config path
    /// when that file exists.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

fn load_config(cli: &Cli) -> anyhow::Result<ParleyConfig> {
    let mut config = match &cli.config {
        Some(path) => ParleyConfig::from_file(path)?,
        None => {
            let path = ParleyConfig::default_config_path();
            if path.exists() {
                ParleyConfig::from_file(&path)?
            } else {
                ParleyConfig::default()
            }
        }
    };
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _log_guard = parley::logging::init(&config.logging)?;

    info!("parley v{}", env!("CARGO_PKG_VERSION"));
    if config.auth.tokens.is_empty() {
        warn!("no access tokens configured; every connection will be refused");
    }

    let store = Arc::new(SqliteStore::open(&config.store.database_path)?);
    info!(path = %config.store.database_path.display(), "store opened");

    let collaborators = Collaborators {
        completion: Arc::new(OpenAiCompletion::from_config(&config.llm)?),
        events: store.clone(),
        registrations: store.clone(),
        rules: store,
        synthesizer: Arc::new(PiperCliSynthesizer::new(&config.tts)),
        clock: Arc::new(SystemClock),
    };
    let verifier = Arc::new(StaticTokenVerifier::from_config(&config.auth));
    let transcriber = Arc::new(WhisperCliTranscriber::new(&config.stt));

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr()).await?;
    let state = AppState::new(config, verifier, transcriber, collaborators);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            on_signal.cancel();
        }
    });

    parley::server::serve(listener, state, shutdown).await?;
    Ok(())
}
