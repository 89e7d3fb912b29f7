use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::presence::PresenceUpdate;
use crate::update::{ClientId, StateVector, Update};

pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

// -- Framing --

pub type Transport = Framed<TcpStream, LengthDelimitedCodec>;

/// Full-board initial syncs are the largest frames we send.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

pub fn framed_transport(stream: TcpStream) -> Transport {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_framed(stream)
}

// -- Client -> Relay Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    // Handshake: subscribe this connection to one document
    Hello {
        doc: String,
        client_id: ClientId,
        version: String,
    },

    // Document sync
    SyncRequest {
        state_vector: StateVector,
    },
    Update {
        update: Update,
    },

    // Awareness
    Presence {
        update: PresenceUpdate,
    },

    // Connection
    Ping,
}

// -- Relay -> Client Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    // Handshake
    Welcome {
        doc: String,
        server_version: String,
    },
    HandshakeError {
        reason: String,
    },

    // Document sync
    SyncReply {
        update: Update,
    },
    Update {
        update: Update,
    },

    // Awareness
    Presence {
        update: PresenceUpdate,
    },
    PresenceSnapshot {
        updates: Vec<PresenceUpdate>,
    },
    PeerLeft {
        client_id: ClientId,
    },

    // Connection
    Pong,
}

// -- Serialization helpers --

pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    Ok(Bytes::from(json))
}

pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    data: &[u8],
) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}

// -- Transport helpers --

pub async fn send_message<T: Serialize>(
    transport: &mut Transport,
    msg: &T,
) -> anyhow::Result<()> {
    let bytes = serialize_message(msg).map_err(|e| anyhow::anyhow!("serialize error: {}", e))?;
    transport
        .send(bytes)
        .await
        .map_err(|e| anyhow::anyhow!("send error: {}", e))
}

pub async fn recv_message<T: for<'de> Deserialize<'de>>(
    transport: &mut Transport,
) -> anyhow::Result<Option<T>> {
    match transport.next().await {
        Some(Ok(frame)) => {
            let msg = deserialize_message(&frame)
                .map_err(|e| anyhow::anyhow!("deserialize error: {}", e))?;
            Ok(Some(msg))
        }
        Some(Err(e)) => Err(anyhow::anyhow!("recv error: {}", e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Doc;
    use crate::player::Player;
    use crate::presence::PresenceRecord;
    use uuid::Uuid;

    fn sample_update() -> Update {
        let mut doc = Doc::new(7);
        doc.transact(|txn| {
            txn.array_push("opens", [12usize]);
            txn.map_set("global", "status", &serde_json::json!({ "gameOver": true }));
        });
        Update::merge(doc.take_updates()).unwrap()
    }

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::Hello {
            doc: "room/abc".into(),
            client_id: 42,
            version: "0.1.0".into(),
        };
        let bytes = serialize_message(&msg).unwrap();
        let deserialized: ClientMessage = deserialize_message(&bytes).unwrap();
        match deserialized {
            ClientMessage::Hello {
                doc,
                client_id,
                version,
            } => {
                assert_eq!(doc, "room/abc");
                assert_eq!(client_id, 42);
                assert_eq!(version, "0.1.0");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_update_survives_the_wire() {
        let msg = ServerMessage::Update {
            update: sample_update(),
        };
        let bytes = serialize_message(&msg).unwrap();
        let deserialized: ServerMessage = deserialize_message(&bytes).unwrap();
        match deserialized {
            ServerMessage::Update { update } => assert_eq!(update, sample_update()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_presence_snapshot_serialization() {
        let player = Player::new(Uuid::new_v4(), "Alice".into(), "#30bced".into());
        let msg = ServerMessage::PresenceSnapshot {
            updates: vec![PresenceUpdate {
                client_id: 3,
                clock: 5,
                record: Some(PresenceRecord::new(player.clone())),
            }],
        };
        let bytes = serialize_message(&msg).unwrap();
        let deserialized: ServerMessage = deserialize_message(&bytes).unwrap();
        match deserialized {
            ServerMessage::PresenceSnapshot { updates } => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].record.as_ref().unwrap().player, player);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_all_client_messages_serialize() {
        let state_vector = Doc::new(9).state_vector();
        let messages = vec![
            ClientMessage::Hello {
                doc: "rooms".into(),
                client_id: 1,
                version: PROTOCOL_VERSION.into(),
            },
            ClientMessage::SyncRequest { state_vector },
            ClientMessage::Update {
                update: sample_update(),
            },
            ClientMessage::Presence {
                update: PresenceUpdate {
                    client_id: 1,
                    clock: 1,
                    record: None,
                },
            },
            ClientMessage::Ping,
        ];

        for msg in &messages {
            let bytes = serialize_message(msg).unwrap();
            let _: ClientMessage = deserialize_message(&bytes).unwrap();
        }
    }

    #[test]
    fn test_garbage_frame_is_an_error() {
        assert!(deserialize_message::<ClientMessage>(b"{\"Nope\":{}}").is_err());
    }
}
