use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use atelier_shared::constants::{DEFAULT_HOSTNAME, DEFAULT_PORT};
use atelier_server::{api, Broker, ServerConfig};

#[derive(Parser)]
#[command(name = "atelier", version, about = "Session broker for multi-participant editing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker
    Start {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        #[arg(long, default_value = DEFAULT_HOSTNAME)]
        hostname: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,atelier_server=debug")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Start { port, hostname } => start(port, hostname).await,
    }
}

async fn start(port: u16, hostname: String) -> anyhow::Result<()> {
    let mut config = ServerConfig::from_env();
    config.port = port;
    config.hostname = hostname;

    info!("Starting Atelier broker v{}", env!("CARGO_PKG_VERSION"));

    let addr = config.bind_addr();
    let broker = Broker::new(config);
    let app = api::build_router(broker);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
