use uuid::Uuid;

use gamebox_common::protocol::{ClientMessage, ServerMessage};

use crate::server::SharedState;

pub async fn handle_message(
    conn_id: Uuid,
    msg: ClientMessage,
    state: &SharedState,
) -> anyhow::Result<()> {
    match msg {
        ClientMessage::Hello { doc, .. } => {
            tracing::warn!("Ignoring second Hello (for '{}') on an open connection", doc);
        }

        ClientMessage::SyncRequest { state_vector } => {
            let reply = state.hub.read().await.sync_reply(conn_id, &state_vector);
            if let Some(update) = reply {
                tracing::debug!(%conn_id, bytes = update.len(), "sync reply");
                send_to_conn(conn_id, ServerMessage::SyncReply { update }, state).await;
            }
        }

        ClientMessage::Update { update } => {
            let peers = state.hub.write().await.merge_update(conn_id, &update);
            if let Some(peers) = peers {
                let doc = state.hub.read().await.doc_of(conn_id).map(str::to_owned);
                tracing::debug!(%conn_id, ?doc, bytes = update.len(), peers = peers.len(), "update merged");
                broadcast_to_list(&peers, &ServerMessage::Update { update }, state).await;
            }
        }

        ClientMessage::Presence { update } => {
            let peers = state
                .hub
                .write()
                .await
                .record_presence(conn_id, update.clone());
            if let Some(peers) = peers {
                broadcast_to_list(&peers, &ServerMessage::Presence { update }, state).await;
            }
        }

        ClientMessage::Ping => {
            send_to_conn(conn_id, ServerMessage::Pong, state).await;
        }
    }

    Ok(())
}

pub async fn handle_disconnect(conn_id: Uuid, state: &SharedState) {
    // Remove connection
    if let Some(conn) = state.connections.write().await.remove(&conn_id) {
        tracing::debug!(doc = %conn.doc, client_id = conn.client_id, "connection removed");
    }

    // Unsubscribe; the document is dropped with its last subscriber
    let departure = state.hub.write().await.leave(conn_id);
    if let Some(departure) = departure {
        broadcast_to_list(
            &departure.remaining,
            &ServerMessage::PeerLeft {
                client_id: departure.client_id,
            },
            state,
        )
        .await;
    }
}

async fn send_to_conn(conn_id: Uuid, msg: ServerMessage, state: &SharedState) {
    let conns = state.connections.read().await;
    if let Some(conn) = conns.get(&conn_id) {
        let _ = conn.tx.send(msg).await;
    }
}

async fn broadcast_to_list(conn_ids: &[Uuid], msg: &ServerMessage, state: &SharedState) {
    let conns = state.connections.read().await;
    for &id in conn_ids {
        if let Some(conn) = conns.get(&id) {
            let _ = conn.tx.send(msg.clone()).await;
        }
    }
}
