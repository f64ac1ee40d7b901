//! Certward - Main entry point
//!
//! Unattended TLS certificate provisioning and renewal via ACME.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use certward_config::Config;
use certward_daemon::acme::{AcmeClient, CertificateStorage, ChallengeManager, RenewalScheduler};
use certward_daemon::responder;

/// Certward - automatic TLS certificate provisioning via ACME
#[derive(Parser, Debug)]
#[command(name = "certward")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long = "config",
        env = "CERTWARD_CONFIG",
        default_value = "certward.toml"
    )]
    config: String,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    if cli.test {
        return test_config(&cli.config);
    }

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;

    info!(
        domain = %config.domain,
        directory = %config.directory.display(),
        "configuration loaded"
    );

    let storage = Arc::new(
        CertificateStorage::new(&config.directory)
            .context("failed to initialize certificate storage")?,
    );
    let challenges = ChallengeManager::new();

    // The responder must hold the challenge port before any order is placed.
    let responder_challenges = challenges.clone();
    let port = config.port.clone();
    tokio::spawn(async move {
        if let Err(e) = responder::serve(&port, responder_challenges).await {
            error!(error = %e, "challenge responder exited");
        }
    });

    let issuer = Arc::new(AcmeClient::new(
        &config.email,
        Arc::clone(&storage),
        challenges,
    ));
    let scheduler = Arc::new(RenewalScheduler::new(&config.domain, issuer, storage));
    Arc::clone(&scheduler).start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    scheduler.close().await?;
    scheduler.join().await;

    Ok(())
}

/// Validate the configuration file and exit.
fn test_config(path: &str) -> Result<()> {
    let config = Config::from_file(path).context("configuration test failed")?;

    info!("Configuration test successful:");
    info!("  - domain: {}", config.domain);
    info!("  - contact: {}", config.email);
    info!("  - storage directory: {}", config.directory.display());
    info!("  - challenge port: {}", config.port);

    println!("certward: configuration file {path} test is successful");

    Ok(())
}
