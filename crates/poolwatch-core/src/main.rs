//! Poolwatch CLI
//!
//! Command-line interface for the Poolwatch alert engine.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use poolwatch::alerting::{AlertEvaluator, Condition, NotificationDispatcher, TestAlertRequest};
use poolwatch::api::HttpServer;
use poolwatch::channels::ChannelRegistry;
use poolwatch::{db, logging, Config};

/// Poolwatch - alerting for JVM connection pools
#[derive(Parser)]
#[command(name = "poolwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "POOLWATCH_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the alert engine and the HTTP API
    Serve,

    /// Check that a condition parses
    Validate {
        /// Condition such as "usage > 80"
        condition: String,
    },

    /// Send a test alert through the configured channels
    TestAlert {
        /// Severity (info, warning, critical)
        #[arg(long)]
        severity: Option<String>,

        /// Channel to target; repeat for several (all enabled when omitted)
        #[arg(long = "channel")]
        channels: Vec<String>,

        /// Message body
        #[arg(long)]
        message: Option<String>,
    },

    /// Load the configuration and build every channel without running
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let _log_guard = match logging::init(&config.logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Serve => run_serve(config).await,
        Commands::Validate { condition } => run_validate(&condition),
        Commands::TestAlert {
            severity,
            channels,
            message,
        } => run_test_alert(config, severity, channels, message).await,
        Commands::CheckConfig => run_check_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    if config.server.metrics_port != 0 {
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.metrics_port)
            .parse()
            .context("invalid metrics listen address")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let store = db::connect(&config.database).await?;
    let registry = ChannelRegistry::from_config(&config.alerting.channels)?;
    info!(channels = ?registry.names(), "Notification channels ready");

    let evaluator = Arc::new(AlertEvaluator::new(store, &config.alerting, registry));
    let seeded = evaluator.seed_rules(&config.alerting.rules).await?;
    let loaded = evaluator.reload_rules().await?;
    info!(seeded, loaded, "Alert rules loaded");

    let shutdown = CancellationToken::new();

    let sweeper = if config.alerting.enabled {
        let evaluator = evaluator.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move { evaluator.start(shutdown).await }))
    } else {
        warn!("Periodic alert evaluation disabled; only pushed samples are evaluated");
        None
    };

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutting down...");
            shutdown.cancel();
        }
    });

    let addr = format!("{}:{}", config.server.host, config.server.http_port);
    HttpServer::new(evaluator.clone())
        .serve(&addr, shutdown.clone())
        .await?;

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        sweeper.await.context("alert evaluator task failed")?;
    } else {
        evaluator.wait_for_deliveries().await;
    }

    Ok(())
}

fn run_validate(condition: &str) -> anyhow::Result<()> {
    let parsed = Condition::parse(condition)?;
    println!("valid: {parsed}");
    Ok(())
}

async fn run_test_alert(
    config: Config,
    severity: Option<String>,
    channels: Vec<String>,
    message: Option<String>,
) -> anyhow::Result<()> {
    let registry = ChannelRegistry::from_config(&config.alerting.channels)?;
    if registry.is_empty() {
        anyhow::bail!("no notification channels are enabled");
    }

    let request = TestAlertRequest {
        severity,
        channels: (!channels.is_empty()).then_some(channels),
        message,
    };
    let response = NotificationDispatcher::new()
        .send_test(&request, &registry)
        .await?;

    println!("{}", serde_json::to_string_pretty(&response)?);

    let failed = response.results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} channel(s) failed", response.results.len());
    }
    Ok(())
}

fn run_check_config(config: &Config) -> anyhow::Result<()> {
    let registry = ChannelRegistry::from_config(&config.alerting.channels)?;

    for rule in &config.alerting.rules {
        Condition::parse(&rule.condition)
            .with_context(|| format!("rule '{}'", rule.name))?;
        rule.severity
            .parse::<poolwatch::models::Severity>()
            .with_context(|| format!("rule '{}'", rule.name))?;
    }

    println!("Configuration OK");
    println!("  store:    {}", if config.database.url.is_some() { "postgres" } else { "memory" });
    println!("  interval: {}", humantime::format_duration(config.alerting.check_interval));
    println!("  cooldown: {}", humantime::format_duration(config.alerting.cooldown));
    println!("  rules:    {}", config.alerting.rules.len());
    println!("  channels: {}", registry.names().join(", "));
    Ok(())
}
