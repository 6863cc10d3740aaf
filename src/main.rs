//! EMS HTTP Bridge
//!
//! HTTP front end for publish-only sends and bounded request/reply exchanges
//! over message-oriented middleware.

use anyhow::Result;
use clap::Parser;
use ems_http_bridge::{
    config::{Environment, Settings},
    logging::init_tracing,
    server::App,
};

/// EMS HTTP Bridge
#[derive(Parser, Debug)]
#[command(name = "ems-http-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides HOST env var)
    #[arg(long)]
    host: Option<String>,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long)]
    log_level: Option<String>,

    /// Environment: dev, staging, prod (overrides ENVIRONMENT env var)
    #[arg(short, long)]
    env: Option<Environment>,

    /// Start a reply emulator on this queue (overrides EMULATOR_QUEUE env var)
    #[arg(long)]
    emulator_queue: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (before logging, so we can use log_level)
    let mut settings = Settings::load()?;

    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(env) = args.env {
        settings.environment = env;
    }
    if let Some(queue) = args.emulator_queue {
        let mut emulator = settings.emulator.take().unwrap_or_default();
        emulator.queue = queue;
        settings.emulator = Some(emulator);
    }
    settings.validate()?;

    init_tracing(&settings.log_level, settings.is_production());

    tracing::info!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        environment = %settings.environment,
        host = %settings.host,
        port = %settings.port,
        default_timeout_ms = settings.bridge.default_timeout_ms,
        emulator_queue = settings.emulator.as_ref().map(|e| e.queue.as_str()).unwrap_or("-"),
        "Starting application"
    );

    let app = App::new(settings).await?;

    // Run the server with graceful shutdown
    app.run_with_graceful_shutdown().await?;

    tracing::info!("Application shutdown complete");

    Ok(())
}
