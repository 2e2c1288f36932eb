//! Certkeep - Main entry point
//!
//! A per-domain TLS certificate cache with background renewal, built on Pingora.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pingora::apps::http_app::HttpServer;
use pingora::server::configuration::Opt;
use pingora::server::Server;
use pingora::services::background::background_service;
use pingora::services::listening::Service;
use tracing::info;
use tracing_subscriber::EnvFilter;

use certkeep_config::{Config, DEFAULT_CONFIG_FILE};
use certkeep_server::{AppState, CertHttpApp, SimulatedIssuer};

/// Certkeep - per-domain certificate cache with automatic renewal
#[derive(Parser, Debug)]
#[command(name = "certkeep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long = "config",
        env = "CERTKEEP_CONFIG",
        default_value = DEFAULT_CONFIG_FILE
    )]
    config: String,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    if cli.test {
        return test_config(&cli.config);
    }

    run_server(&cli.config)
}

/// Initialize logging based on verbose flag and format
fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_config(path: &str) -> Result<Config> {
    info!("Loading configuration from: {}", path);
    let config = Config::from_file(path).context("Failed to load configuration file")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

/// Test configuration file and exit
fn test_config(path: &str) -> Result<()> {
    let config = load_config(path)?;

    info!("Configuration test successful:");
    info!("  - listen address {}", config.listen_address());
    info!("  - certificate directory {}", config.cert_directory.display());
    info!("  - renewal window {}s", config.renew_after.as_secs());

    println!("certkeep: configuration file {} test is successful", path);

    Ok(())
}

/// Run the certificate server
fn run_server(path: &str) -> Result<()> {
    let config = load_config(path)?;
    let listen_address = config.listen_address();

    let issuer = Arc::new(SimulatedIssuer::new(config.issuer_delay));
    let state = AppState::new(config, issuer).context("Failed to open certificate store")?;

    info!(
        tracked = state.recovery.loaded,
        orphaned = state.recovery.orphaned.len(),
        "Recovered renewal state"
    );

    // Create Pingora server
    let mut server = Server::new(Some(Opt::default()))?;
    server.bootstrap();

    // HTTP surface
    let app = CertHttpApp::new(state.manager.clone(), listen_address.clone());
    let mut http_service = Service::new("certkeep http".to_string(), HttpServer::new_app(app));
    http_service.add_tcp(&listen_address);
    info!("HTTP listening on: {}", listen_address);

    // Renewal scheduler
    let scheduler = state.renewal_scheduler();
    info!(
        check_interval_secs = scheduler.check_interval().as_secs(),
        "Renewal scheduler configured"
    );

    server.add_service(http_service);
    server.add_service(background_service("certkeep renewal", scheduler));

    info!("Certkeep started successfully");

    // Run server forever
    server.run_forever();
}
