//! # Docpipe Configuration Validator
//!
//! Command-line tool for validating pipeline configuration files across environments.
//! Catches configuration issues before the pipeline or the checkup daemon starts.

use clap::{Parser, Subcommand};
use docpipe::config::{CheckupAction, ConfigManager, PipelineConfig, QueueBackend, QueueConfig};
use docpipe::state_machine::STAGE_SEQUENCE;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate docpipe configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate all configuration sections
    All,

    /// Validate one configuration section
    Component {
        /// Section name (pipeline, database, queues, store, inference, review, checkup)
        name: String,
    },

    /// List environments that have an override file
    Environments,

    /// Print the effective configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all_config(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Environments) => list_environments(&cli),
        Some(Commands::Show) => show_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)?;
    Ok(manager.config().clone())
}

fn validate_all_config(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating docpipe configuration");
    println!("Environment: {}", cli.environment);
    if let Some(config_dir) = &cli.config_dir {
        println!("Config Directory: {}", config_dir.display());
    }
    println!();

    let config = match load(cli) {
        Ok(config) => {
            println!("✅ Configuration loaded and validated");
            config
        }
        Err(e) => {
            println!("❌ Failed to load configuration: {e}");
            println!("   This is the same error pipeline bootstrap would report");
            return Err(e);
        }
    };

    for section in SECTIONS {
        validate_section(&config, section)?;
    }

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

const SECTIONS: [&str; 7] = [
    "pipeline",
    "database",
    "queues",
    "store",
    "inference",
    "review",
    "checkup",
];

fn validate_component(cli: &Cli, name: &str) -> anyhow::Result<()> {
    println!("🔧 Validating section: {name}");
    let config = load(cli)?;
    validate_section(&config, &name.to_lowercase())?;
    println!("✅ Section '{name}' validation passed!");
    Ok(())
}

fn validate_section(config: &PipelineConfig, section: &str) -> anyhow::Result<()> {
    match section {
        "pipeline" => {
            println!("🏷️  Pipeline");
            println!("   ✅ Prefix: {}", config.pipeline.prefix);
        }
        "database" => {
            println!("🗄️  Database");
            match &config.database.url {
                Some(_) => println!("   ✅ Database URL configured"),
                None => println!("   ℹ️  No database URL, documents are tracked in memory"),
            }
            println!(
                "   ✅ Pool: max {} connections, acquire timeout {}s",
                config.database.max_connections, config.database.acquire_timeout_seconds
            );
        }
        "queues" => {
            println!("📬 Queues");
            let backend = match config.queues.backend {
                QueueBackend::Memory => "memory",
                QueueBackend::Pgmq => "pgmq",
            };
            println!("   ✅ Backend: {backend}");
            for stage in STAGE_SEQUENCE {
                println!(
                    "   • {}",
                    QueueConfig::queue_name(&config.pipeline.prefix, stage)
                );
            }
            println!(
                "   ✅ Batch size {}, visibility timeout {}s",
                config.queues.batch_size, config.queues.visibility_timeout_seconds
            );
        }
        "store" => {
            println!("🪣 Object store");
            println!("   ✅ Document bucket: {}", config.store.document_bucket);
            println!("   ✅ Intake prefix: {}", config.store.intake_prefix);
        }
        "inference" => {
            println!("🧠 Inference");
            println!("   ✅ Model: {}", config.inference.model_id);
            println!("   ✅ Max tokens: {}", config.inference.max_tokens);
        }
        "review" => {
            println!("👀 Human review");
            for workflow in &config.review.workflows {
                println!("   ✅ {} -> {}", workflow.team, workflow.workflow_id);
            }
            println!(
                "   ✅ Review timeout: {}s",
                config.review.review_timeout_seconds
            );
        }
        "checkup" => {
            println!("🩺 Checkup");
            if !config.checkup.enabled {
                println!("   ℹ️  Checkup loop disabled");
            }
            let action = match config.checkup.action {
                CheckupAction::Alert => "alert",
                CheckupAction::Resume => "resume",
                CheckupAction::Restart => "restart",
            };
            println!(
                "   ✅ Every {}s, stale after {}s, action {action}",
                config.checkup.interval_seconds, config.checkup.stale_after_seconds
            );
        }
        other => anyhow::bail!("Unknown section: {other}"),
    }
    Ok(())
}

fn list_environments(cli: &Cli) -> anyhow::Result<()> {
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("config"));
    println!("📋 Environments in {}:", config_dir.display());

    if !config_dir.exists() {
        println!("❌ Configuration directory not found");
        return Ok(());
    }

    let mut environments = Vec::new();
    for entry in std::fs::read_dir(&config_dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if let Some(env) = name
            .strip_prefix("docpipe.")
            .and_then(|rest| rest.strip_suffix(".toml"))
        {
            environments.push(env.to_string());
        }
    }
    environments.sort();

    for env in environments {
        println!("  • {env}");
    }
    Ok(())
}

fn show_config(cli: &Cli) -> anyhow::Result<()> {
    let mut config = load(cli)?;
    if config.database.url.is_some() {
        config.database.url = Some("<redacted>".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
