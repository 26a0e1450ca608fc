//! # onair
//!
//! Live session bus binary: loads settings, initialises telemetry, wires
//! store, producer and coordinator together and serves HTTP until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use onair_core::provider::CompletionOptions;
use onair_engine::{ProducerConfig, RunningSet, TurnProducer, Worker, WorkerConfig};
use onair_llm::{ChatCompletionsProvider, ProviderConfig};
use onair_server::{
    LocalProducer, ProducerStrategy, RemoteSignalProducer, ServerConfig, SessionCoordinator,
};
use onair_settings::{OnAirSettings, ProducerMode};
use onair_store::{MessageStore, SessionRegistry, TranscriptArchive};
use onair_telemetry::{init_telemetry, TelemetryConfig};

/// Bound on waiting for open viewer streams at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Live AI radio session bus.
#[derive(Parser, Debug)]
#[command(name = "onair", about = "Live AI radio session bus")]
struct Cli {
    /// Settings file (defaults to ~/.onair/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default).
    Serve {
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,

        /// Producer mode: `local` or `worker`.
        #[arg(long)]
        mode: Option<ProducerMode>,
    },
    /// Validate settings and exit.
    Check,
}

fn load(path: Option<&PathBuf>) -> Result<OnAirSettings> {
    let settings = match path {
        Some(p) => onair_settings::load_settings_from_path(p)
            .with_context(|| format!("Failed to load settings from {}", p.display()))?,
        None => onair_settings::load_settings().context("Failed to load settings")?,
    };
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn producer_config(settings: &OnAirSettings) -> ProducerConfig {
    let p = &settings.producer;
    ProducerConfig {
        total_turns: p.total_turns,
        context_window: p.context_window,
        inter_turn_delay: Duration::from_millis(p.inter_turn_delay_ms),
        completion_timeout: Duration::from_millis(p.completion_timeout_ms),
        options: CompletionOptions {
            temperature: p.temperature,
            max_tokens: p.max_tokens,
        },
        max_line_chars: p.max_line_chars,
    }
}

fn build_provider(settings: &OnAirSettings) -> Result<ChatCompletionsProvider> {
    let completion = &settings.completion;
    // validate() guarantees both are present.
    let base_url = completion.base_url.clone().unwrap_or_default();
    let token = completion.token.clone().unwrap_or_default();
    ChatCompletionsProvider::new(ProviderConfig {
        base_url,
        token: SecretString::from(token),
        model: completion.model.clone(),
        timeout: Duration::from_millis(completion.request_timeout_ms),
    })
    .context("Failed to build completion client")
}

fn build_registry(settings: &OnAirSettings) -> Result<SessionRegistry> {
    if !settings.archive.enabled {
        return Ok(SessionRegistry::new());
    }
    let path = &settings.archive.path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let archive = TranscriptArchive::open(path, settings.bus.backlog_cap)
        .with_context(|| format!("Failed to open transcript archive: {}", path.display()))?;
    info!(path = %path.display(), "transcript archive opened");
    Ok(SessionRegistry::with_archive(archive))
}

async fn serve(settings: OnAirSettings) -> Result<()> {
    let provider = build_provider(&settings)?;
    info!(model = %settings.completion.model, "completion client ready");

    let registry = Arc::new(build_registry(&settings)?);
    let store = MessageStore::new(registry, settings.bus.backlog_cap);
    let producer = Arc::new(TurnProducer::new(
        Arc::new(provider),
        store.clone(),
        producer_config(&settings),
    ));

    let cancel = CancellationToken::new();
    let mut worker_task = None;
    let strategy: Arc<dyn ProducerStrategy> = match settings.producer.mode {
        ProducerMode::Local => Arc::new(LocalProducer::new(producer)),
        ProducerMode::Worker => {
            let running = Arc::new(RunningSet::new());
            let worker = Worker::new(
                producer,
                Arc::clone(&running),
                WorkerConfig {
                    pass_delay: Duration::from_millis(settings.producer.pass_delay_ms),
                    idle_delay: Duration::from_millis(settings.producer.idle_delay_ms),
                },
            );
            let token = cancel.clone();
            worker_task = Some(tokio::spawn(async move { worker.run(token).await }));
            Arc::new(RemoteSignalProducer::new(running))
        }
    };

    let coordinator = Arc::new(SessionCoordinator::new(store, Arc::clone(&strategy)));
    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        heartbeat: settings.server.heartbeat(),
    };
    let handle = onair_server::start(config, coordinator)
        .await
        .context("Failed to start server")?;
    info!(port = handle.port, mode = %settings.producer.mode, "onair ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    info!("shutting down");

    let stopped = strategy.shutdown();
    cancel.cancel();
    if let Some(task) = worker_task {
        if let Err(e) = task.await {
            warn!(error = %e, "worker task failed");
        }
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, handle.shutdown())
        .await
        .is_err()
    {
        warn!("viewer streams still open at shutdown");
    }
    info!(stopped, "shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = load(cli.config.as_ref())?;

    let logging = &settings.logging;
    let _telemetry = init_telemetry(TelemetryConfig::from_levels(
        &logging.level,
        logging
            .module_levels
            .iter()
            .map(|(m, l)| (m.as_str(), l.as_str())),
        logging.json,
    ))?;

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        mode: None,
    }) {
        Command::Check => {
            info!(
                mode = %settings.producer.mode,
                model = %settings.completion.model,
                "configuration ok"
            );
            Ok(())
        }
        Command::Serve { port, mode } => {
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(mode) = mode {
                settings.producer.mode = mode;
            }
            serve(settings).await
        }
    }
}
