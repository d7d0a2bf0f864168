use anyhow::Result;
use clap::{Parser, Subcommand};
use pihive::{broker, discovery, BrokerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pihive", version)]
#[command(about = "Coordination broker for a multi-agent chat network")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a standalone broker and publish the discovery sidecar.
    Broker {
        /// Bind host; the broker is meant to stay loopback-only.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port; 0 asks the kernel for an ephemeral port.
        #[arg(long, default_value_t = 0)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pihive=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Broker { host, port } => run_broker(host, port).await,
    }
}

async fn run_broker(host: String, port: u16) -> Result<()> {
    let config = BrokerConfig {
        host,
        port,
        ..BrokerConfig::default()
    };
    let handle = broker::start(config).await?;

    let sidecar =
        discovery::BrokerSidecar::new(handle.port(), uuid::Uuid::new_v4().to_string());
    match discovery::write_sidecar(&sidecar) {
        Ok(path) => tracing::info!("discovery sidecar written to {}", path.display()),
        Err(err) => tracing::warn!("continuing without discovery sidecar: {err}"),
    }

    tracing::info!("broker ready on {} (ctrl-c to stop)", handle.url());
    tokio::signal::ctrl_c().await?;

    discovery::remove_sidecar();
    tracing::info!("broker stopped");
    Ok(())
}
