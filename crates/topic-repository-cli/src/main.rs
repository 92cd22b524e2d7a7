//! Topic Repository CLI
//!
//! Lists topics and partitions, validates cursors, publishes events and
//! recommends partition counts against a Kafka cluster.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use topic_repository_core::config::{LoggingConfig, RepositoryConfig};
use topic_repository_core::partitioning::PartitionSizeCalculator;
use topic_repository_core::{
    BatchItem, Cursor, KafkaLogEngine, MetadataRefresher, RepositoryMetrics, ThroughputProfile,
    TopicRepository,
};

/// Cursor-addressed access to Kafka topics.
#[derive(Parser)]
#[command(name = "topic-repo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Print Prometheus metrics after the command finishes.
    #[arg(long)]
    metrics: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all topics.
    Topics,

    /// Show partitions of a topic with their oldest and newest offsets.
    Partitions {
        topic: String,
    },

    /// Validate cursors and print the read positions they resolve to.
    Consume {
        topic: String,

        /// Cursor as PARTITION:OFFSET. Use BEGIN as offset to start from the
        /// oldest retained event.
        #[arg(long = "cursor", value_parser = parse_cursor)]
        cursors: Vec<Cursor>,
    },

    /// Publish one event per payload and wait for every confirmation.
    Publish {
        topic: String,

        /// Target partition. Omit to let the cluster client choose.
        #[arg(short, long)]
        partition: Option<String>,

        /// Event payloads.
        #[arg(required = true)]
        payloads: Vec<String>,
    },

    /// Recommend a partition count without contacting the cluster.
    Recommend(ProfileArgs),
}

#[derive(clap::Args)]
struct ProfileArgs {
    #[arg(long, default_value_t = 1)]
    read_parallelism: u32,

    #[arg(long, default_value_t = 1)]
    write_parallelism: u32,

    #[arg(long)]
    messages_per_minute: u32,

    /// Average message size in bytes.
    #[arg(long)]
    message_size: u32,
}

impl ProfileArgs {
    fn profile(&self) -> ThroughputProfile {
        ThroughputProfile {
            read_parallelism: self.read_parallelism,
            write_parallelism: self.write_parallelism,
            messages_per_minute: self.messages_per_minute,
            message_size: self.message_size,
        }
    }
}

fn parse_cursor(raw: &str) -> Result<Cursor, String> {
    raw.split_once(':')
        .map(|(partition, offset)| Cursor::new(partition, offset))
        .ok_or_else(|| format!("expected PARTITION:OFFSET, got '{raw}'"))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = RepositoryConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config))?;

    // Override log level from verbosity flag
    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };

    // Setup tracing
    setup_tracing(&log_config);

    // Sizing needs only the calibration table
    if let Command::Recommend(profile) = &args.command {
        config.partitioning.validate()?;
        let calculator = PartitionSizeCalculator::new(config.partitioning.calibration_table()?);
        let partitions =
            calculator.recommend(&profile.profile(), config.partitioning.max_partitions);
        println!("{partitions}");
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bootstrap_servers = ?config.kafka.bootstrap_servers(),
        "starting topic repository"
    );

    // Run the async runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run(config, args.command, args.metrics).await })
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so command output stays pipeable
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn run(config: RepositoryConfig, command: Command, print_metrics: bool) -> anyhow::Result<()> {
    let settings = config.repository_settings()?;

    // Connect to Kafka
    let engine = Arc::new(KafkaLogEngine::connect(&config.kafka).await?);
    info!("connected to kafka cluster");

    let mut repository = TopicRepository::new(engine.clone(), engine.clone(), settings);
    let metrics = config.metrics.enabled.then(|| Arc::new(RepositoryMetrics::new()));
    if let Some(metrics) = &metrics {
        repository = repository.with_metrics(Arc::clone(metrics));
    }

    // Create shutdown channel for metadata refresher
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start background metadata refresh
    let metadata_refresh_interval = config.kafka.metadata_refresh_interval_secs;
    if metadata_refresh_interval > 0 {
        let refresher =
            MetadataRefresher::new(Arc::clone(&engine), metadata_refresh_interval, shutdown_rx);
        tokio::spawn(async move {
            refresher.run().await;
        });
    }

    let result = tokio::select! {
        result = execute(&repository, command) => result,
        () = shutdown_signal() => {
            warn!("shutdown signal received, abandoning command");
            Ok(())
        }
    };

    // Signal metadata refresher to stop
    let _ = shutdown_tx.send(true);
    engine.shutdown().await;

    if print_metrics {
        match &metrics {
            Some(metrics) => print!("{}", metrics.encode()?),
            None => warn!("metrics are disabled in the configuration"),
        }
    }

    result
}

async fn execute(repository: &TopicRepository, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Topics => {
            for topic in repository.list_topics().await? {
                println!("{topic}");
            }
        }
        Command::Partitions { topic } => {
            for p in repository.list_partitions(&topic).await? {
                println!(
                    "{}\toldest={}\tnewest={}",
                    p.partition_id, p.oldest_available_offset, p.newest_available_offset
                );
            }
        }
        Command::Consume { topic, cursors } => {
            let consumer = repository.create_event_consumer(&topic, &cursors).await?;
            for position in consumer.positions() {
                println!("{}\tnext={}", position.partition, position.offset);
            }
        }
        Command::Publish {
            topic,
            partition,
            payloads,
        } => {
            let mut items: Vec<BatchItem> = payloads
                .into_iter()
                .map(|payload| BatchItem {
                    partition: partition.clone(),
                    ..BatchItem::new(Bytes::from(payload))
                })
                .collect();

            let result = repository.sync_post_batch(&topic, &mut items).await;
            for item in &items {
                println!(
                    "{}\t{}\t{}",
                    item.partition.as_deref().unwrap_or("-"),
                    item.status(),
                    item.detail().unwrap_or("")
                );
            }
            result?;
        }
        Command::Recommend(profile) => {
            println!("{}", repository.calculate_partition_count(&profile.profile()));
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor("0:41").unwrap(), Cursor::new("0", "41"));
        assert_eq!(parse_cursor("3:BEGIN").unwrap(), Cursor::before_oldest("3"));
        assert!(parse_cursor("041").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "topic-repo",
            "--config",
            "repo.yaml",
            "consume",
            "my-topic",
            "--cursor",
            "0:40",
            "--cursor",
            "1:BEGIN",
        ])
        .unwrap();

        assert_eq!(args.config, "repo.yaml");
        match args.command {
            Command::Consume { topic, cursors } => {
                assert_eq!(topic, "my-topic");
                assert_eq!(cursors.len(), 2);
            }
            _ => panic!("expected consume"),
        }
    }
}
