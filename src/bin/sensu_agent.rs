//! Sensu agent binary.
//!
//! Connects to a backend, keeps the session alive and logs inbound
//! messages until interrupted.
//!
//! Configuration is layered: config file, then `SENSU_*` environment
//! variables, then command-line flags.

use std::path::PathBuf;

use clap::Parser;
use sensu_agent::{config::parse_subscriptions, Agent, AgentConfig, VERSION};

#[derive(Parser)]
#[command(name = "sensu-agent")]
#[command(version = VERSION)]
#[command(about = "Sensu agent - persistent backend session", long_about = None)]
struct Cli {
    /// Backend address (host:port, optionally with ws:// or tcp:// scheme)
    #[arg(short, long)]
    backend_url: Option<String>,

    /// Comma-separated subscriptions
    #[arg(short, long)]
    subscriptions: Option<String>,

    /// Config file path (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(cli: &Cli) -> anyhow::Result<AgentConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| AgentConfig::default_path().filter(|p| p.exists()));

    let mut config = match path {
        Some(path) => {
            tracing::info!("Loading config from {}", path.display());
            AgentConfig::from_file(&path)?
        },
        None => AgentConfig::default(),
    };
    config.apply_env();

    if let Some(url) = &cli.backend_url {
        config.backend_url.clone_from(url);
    }
    if let Some(subs) = &cli.subscriptions {
        config.subscriptions = parse_subscriptions(subs);
    }

    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = load_config(&cli)?;
    tracing::info!(
        "Starting sensu-agent {} (backend: {}, subscriptions: {:?})",
        VERSION,
        config.backend_url,
        config.subscriptions
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let agent = Agent::new(config)?;

        agent.add_handler("check_request", |payload| {
            tracing::info!("check request: {}", String::from_utf8_lossy(payload));
            Ok(())
        });

        agent.run().await?;
        tracing::info!("Connected to {}", agent.backend_url());

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        agent.stop().await?;
        Ok(())
    })
}
