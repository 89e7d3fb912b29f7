use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use gamebox_common::update::ClientId;
use gamebox_common::protocol::{
    self, deserialize_message, framed_transport, serialize_message, ClientMessage, ServerMessage,
    Transport, PROTOCOL_VERSION,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a connection subscribed to `doc_id`.
///
/// The Hello is written before this returns; the relay's answer (Welcome or
/// HandshakeError) arrives on the receiver like any other message. The
/// receiver closes when the connection drops.
pub async fn connect(
    addr: &str,
    doc_id: &str,
    client_id: ClientId,
) -> anyhow::Result<(mpsc::Sender<ClientMessage>, mpsc::Receiver<ServerMessage>)> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow::anyhow!("timed out connecting to {}", addr))??;
    let mut transport = framed_transport(stream);
    protocol::send_message(
        &mut transport,
        &ClientMessage::Hello {
            doc: doc_id.to_string(),
            client_id,
            version: PROTOCOL_VERSION.to_string(),
        },
    )
    .await?;

    let (client_tx, client_rx) = mpsc::channel::<ClientMessage>(256);
    let (server_tx, server_rx) = mpsc::channel::<ServerMessage>(256);
    let doc = doc_id.to_string();
    tokio::spawn(async move {
        pump(transport, client_rx, server_tx).await;
        tracing::debug!(%doc, "relay link closed");
    });

    Ok((client_tx, server_rx))
}

/// Shuttle frames both ways until either side goes away.
async fn pump(
    transport: Transport,
    mut outgoing: mpsc::Receiver<ClientMessage>,
    incoming: mpsc::Sender<ServerMessage>,
) {
    let (mut sink, mut stream) = transport.split();
    loop {
        tokio::select! {
            msg = outgoing.recv() => {
                let Some(msg) = msg else { break };
                match serialize_message(&msg) {
                    Ok(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            tracing::warn!("Failed to write to relay: {}", e);
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to serialize client message: {}", e),
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(frame)) => match deserialize_message::<ServerMessage>(&frame) {
                    Ok(msg) => {
                        if incoming.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Failed to parse relay message: {}", e),
                },
                Some(Err(e)) => {
                    tracing::warn!("Read error from relay: {}", e);
                    break;
                }
                None => break,
            },
        }
    }
}
