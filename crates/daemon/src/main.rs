use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use aw_domain::config::DaemonConfig;

/// The agent-worker coordinator daemon.
#[derive(Debug, Parser)]
#[command(name = "agent-workerd", version)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Bearer token required on every endpoint (overrides config and the
    /// AGENT_WORKER_TOKEN environment variable).
    #[arg(long)]
    token: Option<String>,

    /// Registry/config directory (default ~/.agent-worker).
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = aw_daemon::bootstrap::run_server(Arc::new(config)).await {
        tracing::error!(error = %e, "daemon failed to start");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,aw_daemon=debug")),
        )
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<DaemonConfig> {
    let mut config: DaemonConfig = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        }
        None => DaemonConfig::default(),
    };

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(dir) = &cli.config_dir {
        config.server.config_dir = Some(dir.clone());
    }
    match (&cli.token, std::env::var("AGENT_WORKER_TOKEN").ok()) {
        (Some(token), _) => config.server.token = Some(token.clone()),
        (None, Some(token)) if !token.is_empty() => config.server.token = Some(token),
        _ => {}
    }

    Ok(config)
}
