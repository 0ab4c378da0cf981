//! # Threat Relay CLI
//!
//! Command-line interface for the threat event relay.
//!
//! This module provides CLI commands for:
//! - Running the polling consumer until interrupted
//! - Publishing generated events to the event topic
//! - Inspecting, purging and redriving the queue and its dead letter queue
//! - Showing the resolved configuration

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use rand::seq::SliceRandom;
use rand::Rng;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use threat_broker::{Broker, BrokerError, Queue, StoreConfig};
use threat_relay_core::{
    BrokerSettings, ConsumerError, EventRecord, HttpIngestionClient, LoggingSettings,
    ProducerError, RelayConfig, RelayConfigError, ThreatEvent, ThreatEventConsumer,
    ThreatEventProducer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Environment variable prefix for configuration overrides
/// (`THREAT_RELAY__CONSUMER__BATCH_SIZE=25` sets `consumer.batch_size`)
pub const ENV_PREFIX: &str = "THREAT_RELAY";

/// Deployment-local configuration file, extension optional
pub const DEFAULT_CONFIG_FILE: &str = "config/threat-relay";

/// Messages requested per receive while redriving
const REDRIVE_BATCH_SIZE: u32 = 100;

/// Visibility timeout of the demo queue, in seconds
const DEMO_VISIBILITY_TIMEOUT_SECONDS: u64 = 10;

const INDICATOR_TYPES: [&str; 4] = ["ip", "domain", "url", "hash"];

// ============================================================================
// CLI Structure
// ============================================================================

/// Threat Relay CLI - durable delivery of threat events to ingestion
#[derive(Parser)]
#[command(name = "threat-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Durable relay for threat intelligence events")]
#[command(
    long_about = "Threat Relay publishes threat events through a durable topic and queue, and forwards them to the ingestion endpoint"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "THREAT_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging filter, overrides `logging.level` from the configuration
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Forward queued events to the ingestion endpoint until interrupted
    Consume,

    /// Publish randomly generated events
    Publish {
        /// Number of events to publish
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        /// Source recorded on every event
        #[arg(short, long, default_value = "test_script")]
        source: String,
    },

    /// Publish, receive and delete three sample events on a private in-memory broker
    Demo,

    /// Show queue and dead letter queue sizes
    Stats {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove every message from the queue
    Purge {
        /// Purge the dead letter queue instead of the primary queue
        #[arg(long)]
        dlq: bool,

        /// Confirm the purge
        #[arg(short, long)]
        yes: bool,
    },

    /// Move dead-lettered messages back to the primary queue
    Redrive {
        /// Maximum number of messages to move
        #[arg(short, long)]
        max: Option<u64>,
    },

    /// Show the resolved configuration
    Config {
        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
}

/// Configuration format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Broker(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::Io(_) => 4,
        }
    }

    fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }
}

impl From<ProducerError> for CliError {
    fn from(error: ProducerError) -> Self {
        match error {
            ProducerError::Broker(e) => Self::Broker(e),
            ProducerError::BatchInterrupted { source, .. }
                if matches!(*source, ProducerError::Broker(_)) =>
            {
                Self::from(*source)
            }
            other => Self::command_failed(other.to_string()),
        }
    }
}

impl From<ConsumerError> for CliError {
    fn from(error: ConsumerError) -> Self {
        match error {
            ConsumerError::Broker(e) => Self::Broker(e),
            ConsumerError::Configuration(e) => Self::Configuration(ConfigError::Invalid(e)),
            other => Self::command_failed(other.to_string()),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Invalid(#[from] RelayConfigError),

    #[error("Invalid log filter '{filter}': {message}")]
    LogFilter { filter: String, message: String },

    #[error("Invalid ingestion endpoint: {message}")]
    Endpoint { message: String },
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    let mut stdout = std::io::stdout();

    // Completions must work even when the configuration is broken
    if let Commands::Completions { shell } = cli.command {
        return execute_completions_command(shell, &mut stdout);
    }

    let config = load_configuration(cli.config.as_deref())?;
    initialize_logging(&cli, &config.logging)?;

    execute_command(cli.command, &config, &mut stdout).await
}

/// Run one command against a loaded configuration, writing its report to `out`
pub async fn execute_command(
    command: Commands,
    config: &RelayConfig,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        Commands::Consume => execute_consume_command(config, out).await,
        Commands::Publish { count, source } => {
            execute_publish_command(config, count, &source, out).await
        }
        Commands::Demo => execute_demo_command(config, out).await,
        Commands::Stats { format } => execute_stats_command(config, format, out).await,
        Commands::Purge { dlq, yes } => execute_purge_command(config, dlq, yes, out).await,
        Commands::Redrive { max } => execute_redrive_command(config, max, out).await,
        Commands::Config { format } => execute_config_command(config, format, out),
        Commands::Completions { shell } => execute_completions_command(shell, out),
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Load configuration from files and environment
///
/// Sources are applied in order, later ones overriding earlier ones:
/// 1. `config/threat-relay.{yaml,toml,json}` when present
/// 2. The explicit file, which must exist when given
/// 3. `THREAT_RELAY__SECTION__KEY` environment variables
pub fn load_configuration(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config: RelayConfig = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    config.validate()?;
    Ok(config)
}

/// Initialize logging based on CLI arguments and the logging section
///
/// `RUST_LOG` wins over both. Logs go to stderr so command output on stdout
/// stays machine-readable.
fn initialize_logging(cli: &Cli, settings: &LoggingSettings) -> Result<(), CliError> {
    let level = cli.log_level.as_deref().unwrap_or(settings.level.as_str());
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| ConfigError::LogFilter {
            filter: level.to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs || settings.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::command_failed(format!("failed to initialize logging: {}", e)))
}

/// Open the configured store and declare the relay's queues and topic
async fn connect(settings: &BrokerSettings) -> Result<(Broker, ThreatEventProducer), CliError> {
    let store = settings.store.open().await?;
    let broker = Broker::new(store);
    let producer = ThreatEventProducer::new(&broker, settings)?;
    Ok((broker, producer))
}

/// Resolves once Ctrl+C or SIGTERM is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), stopping consumer"),
        _ = terminate => info!("Received SIGTERM, stopping consumer"),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute consume command
async fn execute_consume_command(config: &RelayConfig, out: &mut dyn Write) -> Result<(), CliError> {
    let (_broker, producer) = connect(&config.broker).await?;
    let client = HttpIngestionClient::new(
        config.consumer.endpoint.clone(),
        config.consumer.request_timeout(),
    )
    .map_err(|e| ConfigError::Endpoint {
        message: e.to_string(),
    })?;
    let consumer = Arc::new(ThreatEventConsumer::new(
        producer.queue().clone(),
        Arc::new(client),
        &config.consumer,
    )?);

    writeln!(out, "Threat Event Consumer")?;
    writeln!(out, "  Queue:    {}", producer.queue().name())?;
    writeln!(out, "  Endpoint: {}", config.consumer.endpoint)?;
    writeln!(out, "Press Ctrl+C to stop")?;
    out.flush()?;

    let mut runner = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.start().await })
    };

    let finished = tokio::select! {
        joined = &mut runner => Some(joined),
        _ = shutdown_signal() => None,
    };
    let joined = match finished {
        Some(joined) => joined,
        None => {
            consumer.stop();
            runner.await
        }
    };
    joined.map_err(|e| CliError::command_failed(format!("consumer task failed: {}", e)))??;

    let stats = consumer.get_stats().await?;
    writeln!(out, "Processed: {}", stats.processed)?;
    writeln!(out, "Failed:    {}", stats.failed)?;
    writeln!(out, "Remaining: {}", stats.queue_size)?;
    Ok(())
}

/// Generate `count` events with random indicators, types and techniques
fn random_events(count: usize, source: &str) -> Vec<ThreatEvent> {
    let mut rng = rand::thread_rng();

    (0..count)
        .map(|_| {
            let indicator_type = *INDICATOR_TYPES.choose(&mut rng).unwrap_or(&"ip");
            let indicator = match indicator_type {
                "domain" => format!("host-{:04}.example.net", rng.gen_range(0..10_000)),
                "url" => format!(
                    "http://host-{:04}.example.net/payload/{}",
                    rng.gen_range(0..10_000),
                    rng.gen_range(1..1_000)
                ),
                "hash" => (0..32)
                    .map(|_| format!("{:02x}", rng.gen::<u8>()))
                    .collect::<String>(),
                _ => format!(
                    "{}.{}.{}.{}",
                    rng.gen_range(1..=255),
                    rng.gen_range(1..=255),
                    rng.gen_range(1..=255),
                    rng.gen_range(1..=255)
                ),
            };

            ThreatEvent::new(indicator, indicator_type, source)
                .with_related_technique(format!("T{}", rng.gen_range(1001..=9999)))
                .with_confidence(rng.gen_range(50..=100))
        })
        .collect()
}

/// Execute publish command
async fn execute_publish_command(
    config: &RelayConfig,
    count: usize,
    source: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let (_broker, producer) = connect(&config.broker).await?;

    let published = match producer.publish_batch(random_events(count, source)).await {
        Ok(published) => published,
        Err(ProducerError::BatchInterrupted { published, source: cause }) => {
            writeln!(
                out,
                "Published {} of {} events to topic '{}' before failing",
                published,
                count,
                producer.topic().name()
            )?;
            return Err((*cause).into());
        }
        Err(e) => return Err(e.into()),
    };

    writeln!(
        out,
        "Published {} events to topic '{}'",
        published,
        producer.topic().name()
    )?;
    Ok(())
}

/// Execute demo command
async fn execute_demo_command(config: &RelayConfig, out: &mut dyn Write) -> Result<(), CliError> {
    let settings = BrokerSettings {
        store: StoreConfig::InMemory,
        visibility_timeout_seconds: DEMO_VISIBILITY_TIMEOUT_SECONDS,
        ..config.broker.clone()
    };
    let (_broker, producer) = connect(&settings).await?;

    writeln!(out, "--- Publishing events ---")?;
    for i in 0..3 {
        let event = ThreatEvent::new(format!("192.168.1.{}", i + 1), "ip", "demo_feed")
            .with_timestamp("2025-01-19T04:16:00Z")
            .with_related_technique("T1059")
            .with_confidence(80 + i);
        producer.publish_event(event).await?;
    }

    let queue = producer.queue();
    writeln!(out, "--- Receiving messages ---")?;
    writeln!(out, "Queue size: {}", queue.size().await?)?;

    for message in queue.receive(10).await? {
        writeln!(out, "Received: {}", message.message_id)?;
        match EventRecord::from_body(&message.body) {
            Ok(record) => writeln!(out, "  Indicator: {}", record.indicator_label())?,
            Err(e) => writeln!(out, "  Undecodable body: {}", e)?,
        }
        writeln!(out, "  Receive count: {}", message.receive_count)?;

        if !queue.delete(&message.receipt_handle).await? {
            warn!(message_id = %message.message_id, "Demo message lease expired before delete");
        }
    }

    writeln!(out, "Final queue size: {}", queue.size().await?)?;
    writeln!(out, "DLQ size: {}", producer.dead_letter_queue().size().await?)?;
    Ok(())
}

/// Execute stats command
async fn execute_stats_command(
    config: &RelayConfig,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let (_broker, producer) = connect(&config.broker).await?;
    let queue = producer.queue();
    let dead_letter_queue = producer.dead_letter_queue();
    let queue_size = queue.size().await?;
    let dead_letter_size = dead_letter_queue.size().await?;

    match format {
        OutputFormat::Text => {
            writeln!(out, "{}: {}", queue.name(), queue_size)?;
            writeln!(out, "{}: {}", dead_letter_queue.name(), dead_letter_size)?;
        }
        OutputFormat::Json => {
            let report = serde_json::json!({
                "queue": { "name": queue.name().as_str(), "size": queue_size },
                "dead_letter_queue": {
                    "name": dead_letter_queue.name().as_str(),
                    "size": dead_letter_size,
                },
            });
            let rendered = serde_json::to_string_pretty(&report)
                .map_err(|e| CliError::command_failed(e.to_string()))?;
            writeln!(out, "{}", rendered)?;
        }
    }
    Ok(())
}

/// Execute purge command
async fn execute_purge_command(
    config: &RelayConfig,
    dlq: bool,
    yes: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let (_broker, producer) = connect(&config.broker).await?;
    let queue: &Queue = if dlq {
        producer.dead_letter_queue()
    } else {
        producer.queue()
    };

    if !yes {
        return Err(CliError::command_failed(format!(
            "refusing to purge '{}' without --yes",
            queue.name()
        )));
    }

    let removed = queue.purge().await?;
    info!(queue = %queue.name(), removed = removed, "Queue purged");
    writeln!(out, "Removed {} messages from '{}'", removed, queue.name())?;
    Ok(())
}

/// Execute redrive command
///
/// Each message is sent to the primary queue before it is deleted from the
/// dead letter queue, so an interruption can duplicate a message but never
/// lose one.
async fn execute_redrive_command(
    config: &RelayConfig,
    max: Option<u64>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let (_broker, producer) = connect(&config.broker).await?;
    let queue = producer.queue();
    let dead_letter_queue = producer.dead_letter_queue();
    let limit = max.unwrap_or(u64::MAX);
    let mut moved: u64 = 0;

    while moved < limit {
        let want = u32::try_from(limit - moved)
            .unwrap_or(REDRIVE_BATCH_SIZE)
            .min(REDRIVE_BATCH_SIZE);
        let messages = dead_letter_queue.receive(want).await?;
        if messages.is_empty() {
            break;
        }

        for message in messages {
            let message_id = queue.send(&message.body).await?;
            if !dead_letter_queue.delete(&message.receipt_handle).await? {
                warn!(
                    dead_letter_queue = %dead_letter_queue.name(),
                    message_id = %message.message_id,
                    "Dead-lettered message lease expired during redrive, it may be redriven twice"
                );
            }
            info!(
                queue = %queue.name(),
                source_id = %message.message_id,
                message_id = %message_id,
                "Message redriven"
            );
            moved += 1;
        }
    }

    writeln!(
        out,
        "Moved {} messages from '{}' to '{}'",
        moved,
        dead_letter_queue.name(),
        queue.name()
    )?;
    Ok(())
}

/// Execute config command
fn execute_config_command(
    config: &RelayConfig,
    format: ConfigFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::to_string_pretty(config).map_err(|e| e.to_string()),
    }
    .map_err(|message| CliError::command_failed(format!("failed to render configuration: {}", message)))?;

    writeln!(out, "{}", rendered.trim_end())?;
    Ok(())
}

/// Execute completions command
fn execute_completions_command(
    shell: clap_complete::Shell,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    clap_complete::generate(shell, &mut Cli::command(), "threat-relay", out);
    Ok(())
}
