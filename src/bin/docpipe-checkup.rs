//! # Docpipe Checkup
//!
//! Runs the checkup reconciliation sweep against the PostgreSQL tracking store, either once
//! or on the configured interval until interrupted.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use docpipe::config::{CheckupAction, ConfigManager, QueueBackend};
use docpipe::logging::init_structured_logging;
use docpipe::messaging::{InMemoryWorkQueue, QueueRegistry, WorkQueue};
use docpipe::orchestration::bootstrap::{connect, pgmq_queues, run_checkup_loop};
use docpipe::orchestration::{BeginRunner, CheckupPolicy, ControlPlaneManager};
use docpipe::tracking::{PostgresTrackingStore, TrackingStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Alert,
    Resume,
    Restart,
}

impl From<ActionArg> for CheckupAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Alert => CheckupAction::Alert,
            ActionArg::Resume => CheckupAction::Resume,
            ActionArg::Restart => CheckupAction::Restart,
        }
    }
}

#[derive(Parser)]
#[command(name = "docpipe-checkup")]
#[command(about = "Find and re-drive documents that stopped moving")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Environment to load (defaults to DOCPIPE_ENV / APP_ENV)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Override the configured checkup action
    #[arg(short, long, value_enum)]
    action: Option<ActionArg>,

    /// Run one sweep, print the report as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.environment {
        Some(env) => ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), env),
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .context("loading configuration")?;
    let mut config = manager.config().clone();
    if let Some(action) = cli.action {
        config.checkup.action = action.into();
    }
    init_structured_logging(&config.logging);

    let url = config
        .database
        .url
        .clone()
        .context("checkup needs database.url (DOCPIPE_DATABASE__URL)")?;
    let pool = connect(&config, &url).await?;
    let store = Arc::new(PostgresTrackingStore::new(pool.clone()));
    store.ensure_schema().await?;

    let queues = match config.queues.backend {
        QueueBackend::Pgmq => pgmq_queues(&config.pipeline.prefix, &pool).await?,
        QueueBackend::Memory => {
            if config.checkup.action != CheckupAction::Alert {
                warn!("In-memory queues are private to this process; re-driven work will not reach the pipeline");
            }
            QueueRegistry::build(&config.pipeline.prefix, |name| {
                Arc::new(InMemoryWorkQueue::new(name)) as Arc<dyn WorkQueue>
            })
        }
    };

    let store: Arc<dyn TrackingStore> = store;
    let begin = BeginRunner::new(Arc::clone(&store), Arc::new(queues));
    let policy = CheckupPolicy::from_config(&config.checkup, &config.review);
    let control_plane = Arc::new(ControlPlaneManager::new(store, begin, policy));

    if cli.once {
        let report = control_plane.checkup().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (shutdown, receiver) = watch::channel(false);
    let sweeps = tokio::spawn(run_checkup_loop(
        Arc::clone(&control_plane),
        config.checkup.interval(),
        receiver,
    ));
    info!(
        interval_seconds = config.checkup.interval_seconds,
        action = ?config.checkup.action,
        "🩺 Checkup daemon started"
    );

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown requested");
    shutdown.send(true)?;
    sweeps.await?;
    Ok(())
}
