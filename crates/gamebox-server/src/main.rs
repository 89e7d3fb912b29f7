mod connection;
mod handler;
mod hub;
mod server;

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::server::RelayConfig;

/// Gamebox relay: forwards document updates and presence between peers
/// subscribed to the same document.
#[derive(Parser, Debug)]
#[command(name = "gamebox-server", version, about)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:9876")]
    bind: SocketAddr,

    /// Maximum simultaneous connections allowed
    #[arg(short, long, default_value_t = 100)]
    max_connections: usize,

    /// Seconds between status lines, 0 to disable
    #[arg(long, default_value_t = 60)]
    stats_interval: u64,
}

impl Args {
    fn into_config(self) -> RelayConfig {
        RelayConfig {
            bind: self.bind,
            max_connections: self.max_connections,
            stats_interval: (self.stats_interval > 0)
                .then(|| Duration::from_secs(self.stats_interval)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gamebox_server=debug,gamebox_common=debug".into()),
        )
        .init();

    let config = Args::parse().into_config();
    tracing::info!(
        bind = %config.bind,
        max_connections = config.max_connections,
        "starting gamebox relay"
    );
    server::run(config).await
}
