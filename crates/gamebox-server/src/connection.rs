use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use gamebox_common::update::ClientId;
use gamebox_common::protocol::{
    self, framed_transport, serialize_message, ClientMessage, ServerMessage, PROTOCOL_VERSION,
};

use crate::handler;
use crate::server::SharedState;

/// Longest document id a client may subscribe to.
const MAX_DOC_ID_LEN: usize = 128;

pub struct ConnectionHandle {
    pub doc: String,
    pub client_id: ClientId,
    pub tx: mpsc::Sender<ServerMessage>,
}

pub async fn handle_connection(stream: TcpStream, state: SharedState) -> anyhow::Result<()> {
    let mut transport = framed_transport(stream);

    // Step 1: Handshake -- expect Hello naming the document
    let hello: ClientMessage = match protocol::recv_message(&mut transport).await? {
        Some(msg) => msg,
        None => return Ok(()),
    };

    let (doc, client_id) = match hello {
        ClientMessage::Hello {
            doc,
            client_id,
            version,
        } => {
            if doc.is_empty() || doc.len() > MAX_DOC_ID_LEN {
                protocol::send_message(
                    &mut transport,
                    &ServerMessage::HandshakeError {
                        reason: format!("invalid document id '{}'", doc),
                    },
                )
                .await?;
                return Ok(());
            }
            tracing::info!(
                "Client {:016x} subscribed to '{}' (client version: {})",
                client_id,
                doc,
                version
            );
            protocol::send_message(
                &mut transport,
                &ServerMessage::Welcome {
                    doc: doc.clone(),
                    server_version: PROTOCOL_VERSION.to_string(),
                },
            )
            .await?;
            (doc, client_id)
        }
        _ => {
            protocol::send_message(
                &mut transport,
                &ServerMessage::HandshakeError {
                    reason: "Expected Hello message".into(),
                },
            )
            .await?;
            return Ok(());
        }
    };

    // Step 2: Create mpsc channel for outbound messages
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(256);
    let conn_id = Uuid::new_v4();

    // Register connection and subscribe it to the document
    state.connections.write().await.insert(
        conn_id,
        ConnectionHandle {
            doc: doc.clone(),
            client_id,
            tx: tx.clone(),
        },
    );
    let present = state.hub.write().await.join(conn_id, &doc, client_id);
    if !present.is_empty() {
        let _ = tx
            .send(ServerMessage::PresenceSnapshot { updates: present })
            .await;
    }

    // Step 3: Split transport for independent read/write
    let (mut sink, mut stream) = transport.split();

    // Writer task: drains rx and writes to sink
    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serialize_message(&msg) {
                Ok(bytes) => {
                    if sink.send(bytes).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                }
            }
        }
    });

    // Step 4: Reader loop
    loop {
        match stream.next().await {
            Some(Ok(frame)) => match protocol::deserialize_message::<ClientMessage>(&frame) {
                Ok(msg) => {
                    if let Err(e) = handler::handle_message(conn_id, msg, &state).await {
                        tracing::error!("Handler error for {:016x}: {}", client_id, e);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to parse message from {:016x}: {}", client_id, e);
                }
            },
            Some(Err(e)) => {
                tracing::warn!("Read error from {:016x}: {}", client_id, e);
                break;
            }
            None => {
                tracing::info!("Client {:016x} left '{}'", client_id, doc);
                break;
            }
        }
    }

    // Cleanup
    handler::handle_disconnect(conn_id, &state).await;
    write_task.abort();
    Ok(())
}
