use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::connection::{self, ConnectionHandle};
use crate::hub::Hub;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    pub max_connections: usize,
    /// How often to log hub totals; `None` disables the status line.
    pub stats_interval: Option<Duration>,
}

pub struct ServerState {
    pub hub: RwLock<Hub>,
    pub connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
    pub max_connections: usize,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn new(max_connections: usize) -> SharedState {
        Arc::new(ServerState {
            hub: RwLock::new(Hub::new()),
            connections: RwLock::new(HashMap::new()),
            max_connections,
        })
    }
}

/// Accept peers until ctrl-c.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let state = ServerState::new(config.max_connections);
    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, "relay listening");

    // a disabled status line still needs a branch that never fires
    let mut stats = config
        .stats_interval
        .map(|period| tokio::time::interval_at(tokio::time::Instant::now() + period, period));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                admit(stream, peer, &state).await;
            }
            _ = async {
                match stats.as_mut() {
                    Some(interval) => { interval.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                let totals = state.hub.read().await.stats();
                let connections = state.connections.read().await.len();
                tracing::info!(
                    connections,
                    documents = totals.documents,
                    subscribers = totals.subscribers,
                    updates = totals.updates,
                    bytes = totals.bytes,
                    "relay status"
                );
            }
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                return Ok(());
            }
        }
    }
}

async fn admit(stream: TcpStream, peer: SocketAddr, state: &SharedState) {
    let open = state.connections.read().await.len();
    if open >= state.max_connections {
        tracing::warn!(%peer, max = state.max_connections, "connection refused, relay full");
        return;
    }
    tracing::info!(%peer, open = open + 1, max = state.max_connections, "peer connected");

    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = connection::handle_connection(stream, state).await {
            tracing::warn!(%peer, "connection error: {}", e);
        }
    });
}
