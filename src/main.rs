use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use synthd::config::SynthConfig;
use synthd::{rest, AppContext};

#[derive(Parser)]
#[command(
    name = "synthd",
    about = "synthd — request-to-source-tree synthesis daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config.toml
    #[arg(long, env = "SYNTHD_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// HTTP server port
    #[arg(long, env = "SYNTHD_PORT")]
    port: Option<u16>,

    /// Bind address (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "SYNTHD_BIND")]
    bind_address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SYNTHD_LOG")]
    log: Option<String>,

    /// Log format: pretty or json
    #[arg(long, env = "SYNTHD_LOG_FORMAT")]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon server (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SynthConfig::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind_address {
        config.server.bind_address = bind;
    }
    if let Some(log) = args.log {
        config.server.log_level = log;
    }
    if let Some(format) = args.log_format {
        config.server.log_format = format;
    }

    setup_logging(&config.server.log_level, &config.server.log_format);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: SynthConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "starting synthd"
    );

    let ctx = Arc::new(AppContext::new(config).context("failed to build pipeline")?);
    rest::start_rest_server(ctx).await
}

fn setup_logging(log_level: &str, log_format: &str) {
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
    }
}
