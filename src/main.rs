//! Main entry point for the killfeed relay
//!
//! Initializes configuration and logging, runs the crawler and/or bot side
//! depending on the mode, and shuts down gracefully on SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use killfeed_relay::config::{validate_config, AppConfig, ServiceMode};
use killfeed_relay::service::{AppState, RunOptions};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Killfeed relay - polls the game events API and fans kills out to communities
#[derive(Parser)]
#[command(
    name = "killfeed-relay",
    version,
    about = "Relays game kill events from the events API to tracking communities",
    long_about = "The crawler polls the paginated events API, deduplicates against a \
                 high-water mark and publishes new events oldest-first to a fan-out exchange. \
                 Every bot instance binds its own queue to that exchange, matches each event \
                 against the watchlists of its communities and sends notifications."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Service mode override
    #[arg(short, long, value_name = "MODE", help = "Run as crawler, bot or all")]
    mode: Option<ServiceMode>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Communities file override
    #[arg(long, value_name = "FILE", help = "TOML file with community watchlists")]
    communities: Option<String>,

    /// Shard label override
    #[arg(long, value_name = "ID", help = "Label of this instance in log lines")]
    shard_id: Option<String>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit without starting service")]
    check_config: bool,

    /// Crawl without publishing
    #[arg(long, help = "Poll the events API without a broker; nothing is published")]
    dry_run: bool,
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
fn display_startup_banner(config: &AppConfig, dry_run: bool) {
    info!("🚀 Killfeed Relay");
    info!("   Service: {}", config.service.name);
    info!("   Mode: {}", config.service.mode);
    info!("   Shard: {}", config.service.shard_id);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   Exchange: {}", config.amqp.exchange_name);
    if config.service.mode.runs_crawler() {
        info!("   Events API: {}", config.source.endpoint);
        info!("   Poll interval: {}s", config.source.poll_interval_seconds);
    }
    if config.service.mode.runs_bot() {
        info!("   Communities: {}", config.delivery.communities_file);
        info!("   Send timeout: {}ms", config.delivery.send_timeout_ms);
    }
    if dry_run {
        info!("   Dry run: nothing will be published");
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from file or environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(mode) = args.mode {
        config.service.mode = mode;
    }

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    if let Some(communities) = &args.communities {
        config.delivery.communities_file = communities.clone();
    }

    if let Some(shard_id) = &args.shard_id {
        config.service.shard_id = shard_id.clone();
    }

    validate_config(&config)?;
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

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config, args.dry_run);

    if args.check_config {
        info!("Configuration validation successful - exiting");
        return Ok(());
    }

    let options = RunOptions {
        dry_run: args.dry_run,
    };
    let mut app_state = match AppState::new(config.clone(), options).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("✅ Killfeed relay is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 Killfeed relay stopped");
    Ok(())
}
