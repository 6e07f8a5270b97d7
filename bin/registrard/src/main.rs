//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "binary"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Binary entrypoint for the Registrar daemon."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use registrar_common::config::AppConfig;
use registrar_common::logging::init_tracing;
use registrar_core::{EnrollmentOrchestrator, MemoryStore, RuleEngine};
use registrar_metrics::{new_registry, spawn_http_server, DaemonMetrics, EnrollmentMetrics};
use registrar_net::{NotificationHub, RestApiBuilder, WebSocketServerBuilder};
use registrar_persistence::{EnrollmentJournal, PersistenceMetrics};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Registrar enrollment daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the REST listen address")]
    api_listen: Option<SocketAddr>,

    #[arg(
        long,
        value_name = "ADDR",
        help = "Override the WebSocket notification listen address"
    )]
    notifications_listen: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the enrollment service")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/registrar.toml"));
    candidates.push(PathBuf::from("configs/registrar.example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates).context("loading configuration")?;
    let mut config = loaded.config;
    let load_duration = load_started.elapsed();

    if let Some(listen) = cli.api_listen {
        config.api.listen = listen;
    }
    if let Some(listen) = cli.notifications_listen {
        config.notifications.listen = listen;
    }
    config.validate()?;

    init_tracing("registrard", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running with defaults"),
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, load_duration.as_secs_f64()).await,
        Commands::CheckConfig => {
            println!(
                "api: {}\nnotifications: {}\ncredit limit: {}\nsnapshot: {}\njournal: {}",
                config.api.listen,
                config.notifications.listen,
                config
                    .enrollment
                    .effective_credit_limit()
                    .map_or_else(|| "off".to_string(), |limit| limit.to_string()),
                display_path(&config.store.snapshot_path),
                display_path(&config.store.journal_path),
            );
            Ok(())
        }
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map_or_else(|| "in-memory".to_string(), |p| p.display().to_string())
}

async fn run_daemon(config: AppConfig, config_load_seconds: f64) -> Result<()> {
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(config_load_seconds);
    daemon_metrics.inc_start();
    let enrollment_metrics = EnrollmentMetrics::new(registry.clone())?;
    let persistence_metrics = Arc::new(PersistenceMetrics::new(registry.clone())?);

    let store = match &config.store.snapshot_path {
        Some(path) => MemoryStore::open(path, Some(persistence_metrics.clone()))
            .with_context(|| format!("opening catalog snapshot {}", path.display()))?,
        None => {
            warn!("no snapshot path configured; catalog lives in memory only");
            MemoryStore::new()
        }
    };
    info!(
        courses = store.course_count(),
        students = store.student_count(),
        "catalog loaded"
    );

    let hub = NotificationHub::new(config.notifications.channel_capacity)
        .with_metrics(enrollment_metrics.clone());
    let rules = RuleEngine::new(config.enrollment.effective_credit_limit());
    let mut orchestrator = EnrollmentOrchestrator::new(Arc::new(store), Arc::new(hub.clone()), rules)
        .with_metrics(enrollment_metrics);
    if let Some(path) = &config.store.journal_path {
        let journal = EnrollmentJournal::open(path, Some(persistence_metrics.clone()))
            .with_context(|| format!("opening enrollment journal {}", path.display()))?;
        orchestrator = orchestrator.with_journal(Arc::new(journal));
    }
    let orchestrator = Arc::new(orchestrator);

    let report = orchestrator
        .recover_pending()
        .await
        .context("recovering pending enrollment intents")?;
    if report.recovered.is_empty() && report.unresolved == 0 {
        info!("no pending enrollment intents");
    } else {
        info!(
            recovered = report.recovered.len(),
            repaired = report.repaired(),
            unresolved = report.unresolved,
            "pending enrollment intents recovered"
        );
    }

    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry.clone(), config.metrics.listen).await?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let api_server = if config.api.enabled {
        Some(
            RestApiBuilder::new(config.api.listen, orchestrator.clone())
                .with_metrics_registry(registry.clone())
                .spawn()
                .await
                .context("starting rest api")?,
        )
    } else {
        info!("rest api disabled by configuration");
        None
    };

    let ws_server = WebSocketServerBuilder::new(config.notifications.listen, hub)
        .spawn()
        .await
        .context("starting websocket server")?;

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    let grace = config.api.shutdown_grace;
    let stopped = tokio::time::timeout(grace, async {
        if let Some(server) = api_server {
            server.shutdown().await?;
        }
        ws_server.shutdown().await?;
        if let Some(server) = metrics_server {
            server.shutdown().await?;
        }
        anyhow::Ok(())
    })
    .await;

    match stopped {
        Ok(result) => result,
        Err(_) => {
            warn!(grace_secs = grace.as_secs(), "shutdown grace period elapsed; exiting");
            Ok(())
        }
    }
}
