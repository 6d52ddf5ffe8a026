//! Main entry point for the pairing-room matchmaking service
//!
//! Loads configuration, initializes logging, wires the application state and
//! serves the HTTP surface until a shutdown signal arrives.

use anyhow::Result;
use clap::Parser;
use pairing_room::config::AppConfig;
use pairing_room::service::{self, AppState, HealthCheck};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Pairing Room - 1:1 matchmaking service
#[derive(Parser)]
#[command(
    name = "pairing-room",
    version,
    about = "A matchmaking service pairing waiting parties into exclusive 1:1 sessions",
    long_about = "Pairing Room keeps a shared queue of waiting parties and binds the two \
                 oldest into a session with one atomic store transaction, so no party is \
                 ever matched twice no matter how many clients race."
)]
struct Args {
    /// TOML configuration file; the environment is used when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter such as `info` or `pairing_room=debug`
    #[arg(short, long, value_name = "FILTER")]
    log_level: Option<String>,

    /// Port of the HTTP surface
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Background pairing sweep interval, 0 turns the sweep off
    #[arg(long, value_name = "MILLIS")]
    sweep_interval_ms: Option<u64>,

    /// Print the effective configuration and exit
    #[arg(long)]
    check_config: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("Pairing Room Matchmaking Service v{}", pairing_room::VERSION);
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!(
        "   HTTP: {}:{}",
        config.service.http_host, config.service.http_port
    );
    info!(
        "   Store retries: {} (base {}ms, max {}ms), transaction retries: {}",
        config.store.retry.max_retries,
        config.store.retry.base_delay_ms,
        config.store.retry.max_delay_ms,
        config.store.max_transaction_retries
    );
    match config.sweep_interval() {
        Some(interval) => info!("   Pairing sweep: every {}ms", interval.as_millis()),
        None => info!("   Pairing sweep: disabled"),
    }
    info!(
        "   Max pairing rounds per trigger: {}",
        config.matchmaking.max_pairing_rounds
    );
}

/// Resolve the configuration source, then apply command line overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(filter) = &args.log_level {
        config.service.log_level = filter.clone();
    }
    if let Some(port) = args.port {
        config.service.http_port = port;
    }
    if let Some(interval) = args.sweep_interval_ms {
        config.matchmaking.sweep_interval_ms = interval;
    }

    pairing_room::config::validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);
    if args.check_config {
        match toml::to_string_pretty(&config) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => {
                error!("Failed to render configuration: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    info!("Initializing service components...");
    let app_state = match AppState::new(config.clone()) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(service::serve(app_state.clone(), async move {
        let _ = stop_rx.await;
    }));

    let health = HealthCheck::check(&app_state).await;
    info!("Service is running ({})", health.status);
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, beginning graceful shutdown...");

    let _ = stop_tx.send(());
    let shutdown = async {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("HTTP server failed: {}", e),
            Err(e) => error!("HTTP server task panicked: {}", e),
        }
        if let Err(e) = app_state.shutdown().await {
            warn!("Shutdown reported an error: {}", e);
        }
    };

    match tokio::time::timeout(config.shutdown_timeout(), shutdown).await {
        Ok(()) => info!("Graceful shutdown completed successfully"),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    info!("Pairing Room Matchmaking Service stopped");
    Ok(())
}
