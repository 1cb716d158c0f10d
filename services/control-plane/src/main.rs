//! Control plane server

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use control_plane::ControlPlaneBuilder;
use control_plane::config::ServerConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    /// Human readable
    #[default]
    Fmt,
    /// One JSON object per line
    Json,
}

/// Serve the replication and admin job control plane
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Fmt => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path).await?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let app = ControlPlaneBuilder::from_config(&config).build();

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!("control plane listening on http://{}", config.listen);

    axum::serve(listener, app).await?;
    Ok(())
}
