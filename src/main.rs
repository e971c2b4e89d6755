//! Alga PSA App Configuration Agent
//!
//! Builds an agent from app configuration, prints its definition and keeps
//! it in sync with the configuration store until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use alga_agent_appconfig::refresh_loop::{self, RefreshLoopConfig};
use alga_agent_appconfig::store::StoreConnector;
use alga_agent_appconfig::{AgentConfigSession, DeclarativeAgent, DeclarativeAgentFactory, Settings};

/// Alga PSA App Configuration Agent
#[derive(Parser, Debug)]
#[command(name = "alga-appconfig-agent")]
#[command(version, about = "Build and refresh an agent from app configuration")]
struct Args {
    /// Connection string of the configuration store
    #[arg(long, env = "ALGA_APPCONFIG_CONNECTION_STRING", hide_env_values = true)]
    connection_string: Option<String>,

    /// Key filter selecting the agent's settings
    #[arg(short, long)]
    key: Option<String>,

    /// Label of the agent's settings
    #[arg(short, long)]
    label: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between refresh attempts
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Build the agent once and exit (don't refresh)
    #[arg(long)]
    once: bool,

    /// Enable debug logging
    #[arg(short, long, env = "ALGA_DEBUG")]
    debug: bool,
}

fn load_settings(args: &Args) -> Result<Settings> {
    let path = args.config.clone().unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(Some(&path))?;

    // Override settings from CLI
    if let Some(connection_string) = &args.connection_string {
        settings.connection_string = connection_string.clone();
    }
    if let Some(key) = &args.key {
        settings.key = key.clone();
    }
    if let Some(label) = &args.label {
        settings.label = Some(label.clone());
    }
    if let Some(seconds) = args.poll_interval {
        settings.poll_interval_seconds = seconds;
    }
    settings.debug |= args.debug;

    settings.validate()?;
    Ok(settings)
}

fn print_agent(agent: &DeclarativeAgent) -> Result<()> {
    let json = serde_json::to_string_pretty(agent).context("Failed to serialize agent")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;

    // Initialize logging
    let filter = if settings.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Alga PSA App Configuration Agent"
    );

    let connector = settings
        .trim_key_prefixes
        .iter()
        .fold(StoreConnector::from_endpoint(), |c, prefix| c.with_trimmed_prefix(prefix.clone()));

    let session = Arc::new(
        AgentConfigSession::new(Arc::new(connector), DeclarativeAgentFactory::new())
            .with_refresh_options(settings.refresh_options()),
    );

    let cancel = CancellationToken::new();

    let agent = session
        .create_agent(
            &settings.connection_string,
            &settings.key,
            settings.label(),
            None,
            &cancel,
        )
        .await
        .context("Failed to create agent")?;

    match &agent {
        Some(agent) => print_agent(agent)?,
        None => tracing::warn!("Factory declined the agent definition"),
    }

    if args.once {
        return Ok(());
    }

    let (handle, mut agents) = refresh_loop::spawn(
        session,
        RefreshLoopConfig::new(settings.poll_interval()),
        cancel.clone(),
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
            agent = agents.recv() => match agent {
                Some(agent) => print_agent(&agent)?,
                None => break,
            },
        }
    }

    cancel.cancel();
    handle.await.context("Refresh loop panicked")?;

    Ok(())
}
