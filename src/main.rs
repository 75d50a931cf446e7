//! Fraud Command Center - Main Entry Point
//!
//! Trains the classifier and explainer from the configured corpus, then
//! either replays the corpus as a live stream, scores or explains a single
//! transaction, or answers scoring requests over NATS.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fraud_command_center::{
    config::{AppConfig, LoggingConfig},
    consumer::{self, ScoreReply, ScoreRequestConsumer, WorkerPool},
    metrics::MetricsReporter,
    models::{BuiltModel, ModelBuilder},
    monitor::ReplayMonitor,
    producer::AlertProducer,
    scoring::ScoringService,
    types::{transaction::FeatureVector, verdict::ExplanationEntry},
    Corpus, Dataset,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fraud-command-center", version, about = "Fraud scoring, explanation and replay monitoring")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config/config.toml")]
    config: PathBuf,

    /// Ignore the configuration file and use built-in defaults
    #[arg(long)]
    defaults: bool,

    /// Override the corpus path from the configuration
    #[arg(long)]
    dataset: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Replay the corpus as a live transaction stream (default)
    Monitor {
        /// Stop after this many transactions
        #[arg(long)]
        max_transactions: Option<u64>,
    },
    /// Score one transaction read from a JSON file
    Score {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Score and explain one transaction read from a JSON file
    Explain {
        #[arg(short, long)]
        input: PathBuf,
        /// Number of feature contributions to report
        #[arg(long)]
        top_k: Option<usize>,
        /// Give up on the explanation after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Repeat the explanation and warn when runs disagree
        #[arg(long)]
        check_stability: bool,
    },
    /// Answer scoring requests over NATS request/reply
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.defaults {
        AppConfig::default()
    } else {
        AppConfig::load_from_path(&cli.config)
            .with_context(|| format!("Failed to load {}", cli.config.display()))?
    };
    if let Some(path) = cli.dataset {
        config.dataset.path = path;
    }

    init_tracing(&config.logging)?;
    info!("Starting Fraud Command Center");

    let built = build_model(&config).await?;
    let service = ScoringService::from_built(&built);

    match cli.command.unwrap_or(Command::Monitor {
        max_transactions: None,
    }) {
        Command::Monitor { max_transactions } => {
            if max_transactions.is_some() {
                config.monitor.max_transactions = max_transactions;
            }
            run_monitor(service, built.corpus, &config).await
        }
        Command::Score { input } => {
            let vector = read_vector(&input)?;
            let verdict = service.score(&vector);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Command::Explain {
            input,
            top_k,
            timeout_ms,
            check_stability,
        } => {
            let vector = read_vector(&input)?;
            let top_k = top_k.unwrap_or(config.explainer.top_k);
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .or(config.explainer.timeout());

            let verdict = service.score(&vector);
            let explanation = if check_stability {
                let (entries, warning) = service
                    .explain_checked_within(
                        vector,
                        top_k,
                        config.explainer.stability_runs,
                        config.explainer.stability_tolerance,
                        timeout,
                    )
                    .await?;
                if let Some(warning) = warning {
                    warn!(%warning, "Explanation may not be reliable");
                }
                entries
            } else {
                service.explain_within(vector, top_k, timeout).await?
            };

            let explanation: Vec<Value> = explanation.iter().map(describe_entry).collect();
            let output = json!({ "verdict": verdict, "explanation": explanation });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Command::Serve => serve(service, &config).await,
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("fraud_command_center={}", logging.level).parse()?);

    // stdout is reserved for command output.
    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

async fn build_model(config: &AppConfig) -> Result<BuiltModel> {
    let path = config.dataset.path.clone();
    info!(path = %path, "Loading corpus");
    let dataset = Dataset::from_csv(&path)?;

    let builder = ModelBuilder::new(config);
    let built = tokio::task::spawn_blocking(move || builder.build(&dataset))
        .await
        .context("Model build task failed")??;

    info!(
        rows = built.report.original_rows,
        resampled_rows = built.report.resampled_rows,
        trees = built.report.n_trees,
        "Model ready"
    );
    Ok(built)
}

fn read_vector(path: &Path) -> Result<FeatureVector> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    // Accept either a bare feature object or a request envelope.
    let features = value.get("features").unwrap_or(&value);
    Ok(FeatureVector::from_json(features)?)
}

fn describe_entry(entry: &ExplanationEntry) -> Value {
    json!({
        "feature_name": entry.feature_name,
        "condition": entry.condition,
        "weight": entry.weight,
        "direction": entry.direction(),
    })
}

fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn run_monitor(service: ScoringService, corpus: Corpus, config: &AppConfig) -> Result<()> {
    let mut monitor = ReplayMonitor::new(service, corpus, &config.monitor);
    if let Some(nats) = &config.nats {
        let client = async_nats::connect(&nats.url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", nats.url))?;
        info!("Connected to NATS at {}", nats.url);
        let producer = AlertProducer::new(client, &nats.alert_subject);
        info!("Publishing alerts to: {}", producer.subject());
        monitor = monitor.with_producer(producer);
    }

    let shutdown = shutdown_signal();
    let stats = monitor.stats();
    let reporter = tokio::spawn(
        MetricsReporter::new(stats.clone(), config.monitor.report_interval_secs)
            .start(shutdown.clone()),
    );

    let snapshot = monitor.run(shutdown).await;
    reporter.abort();

    stats.print_summary();
    for alert in &snapshot.recent_alerts {
        info!(
            time = %alert.clock_time(),
            row_index = alert.row_index,
            aon = alert.aon,
            sumamnt_ma_rech30 = alert.sumamnt_ma_rech30,
            amnt_loans30 = alert.amnt_loans30,
            confidence = alert.confidence,
            "Recent alert"
        );
    }
    Ok(())
}

async fn serve(service: ScoringService, config: &AppConfig) -> Result<()> {
    let nats = config
        .nats
        .as_ref()
        .context("`serve` requires a [nats] section in the configuration")?;

    let client = async_nats::connect(&nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", nats.url))?;
    info!("Connected to NATS at {}", nats.url);

    let requests = ScoreRequestConsumer::new(client.clone(), &nats.request_subject);
    let pool = WorkerPool::new(nats.workers);
    let timeout = config.explainer.timeout();
    info!(
        subject = requests.subject(),
        workers = pool.workers(),
        timeout = ?timeout,
        "Serving scoring requests"
    );

    let handled = Arc::new(AtomicU64::new(0));
    let mut shutdown = shutdown_signal();
    let mut subscription = requests.subscribe().await?;

    loop {
        let message = tokio::select! {
            message = subscription.next() => match message {
                Some(message) => message,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let Some(reply_subject) = message.reply.clone() else {
            warn!(subject = %message.subject, "Request without reply subject ignored");
            continue;
        };

        // Limit concurrent processing
        let permit = pool.acquire().await?;
        let service = service.clone();
        let client = client.clone();
        let handled = handled.clone();

        tokio::spawn(async move {
            let started = Instant::now();

            let reply = consumer::handle_payload(&service, &message.payload, timeout).await;
            if let ScoreReply::Error { error } = &reply {
                warn!(error = %error, "Rejected scoring request");
            }

            match serde_json::to_vec(&reply) {
                Ok(body) => {
                    if let Err(e) = client.publish(reply_subject, body.into()).await {
                        error!(error = %e, "Failed to publish reply");
                    }
                }
                Err(e) => error!(error = %e, "Failed to serialize reply"),
            }

            let count = handled.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                handled = count,
                processing_time_us = started.elapsed().as_micros() as u64,
                "Request handled"
            );

            // Release permit when done
            drop(permit);
        });
    }

    info!(in_flight = pool.in_flight(), "Waiting for in-flight requests");
    pool.drain().await?;
    if let Err(e) = client.flush().await {
        warn!(error = %e, "Failed to flush replies");
    }
    info!(handled = handled.load(Ordering::Relaxed), "Server shutting down");
    Ok(())
}
