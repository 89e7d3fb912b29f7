use tokio::sync::mpsc;

use gamebox_common::doc::{Doc, DocHandle};
use gamebox_common::presence::Presence;
use gamebox_common::protocol::{ClientMessage, ServerMessage};
use gamebox_common::update::StateVector;

use crate::network;

/// What a relay message meant for the local replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The initial sync reply has been merged.
    Synced,
    /// Remote operations changed the document.
    Changed,
    PresenceChanged,
}

/// Keeps one document and its presence set in sync with the relay.
pub struct DocProvider {
    doc_id: String,
    doc: DocHandle,
    presence: Presence,
    tx: mpsc::Sender<ClientMessage>,
    rx: mpsc::Receiver<ServerMessage>,
    synced: bool,
}

impl DocProvider {
    pub async fn connect(addr: &str, doc_id: &str) -> anyhow::Result<Self> {
        let doc = Doc::with_random_client();
        let client_id = doc.client_id();
        let (tx, rx) = network::connect(addr, doc_id, client_id).await?;
        tracing::debug!(doc = doc_id, client_id, "subscribing");
        Ok(Self::from_channels(doc_id, doc, tx, rx))
    }

    /// Wrap an already subscribed link.
    pub fn from_channels(
        doc_id: &str,
        doc: Doc,
        tx: mpsc::Sender<ClientMessage>,
        rx: mpsc::Receiver<ServerMessage>,
    ) -> Self {
        let client_id = doc.client_id();
        Self {
            doc_id: doc_id.to_string(),
            doc: DocHandle::new(doc),
            presence: Presence::new(client_id),
            tx,
            rx,
            synced: false,
        }
    }

    pub fn doc(&self) -> &DocHandle {
        &self.doc
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn presence_mut(&mut self) -> &mut Presence {
        &mut self.presence
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Next message from the relay; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    pub async fn handle(&mut self, msg: ServerMessage) -> anyhow::Result<Option<ProviderEvent>> {
        match msg {
            ServerMessage::Welcome { server_version, .. } => {
                tracing::debug!(doc = %self.doc_id, %server_version, "welcomed");
                let state_vector = self.doc.read(|doc| doc.state_vector());
                self.send(ClientMessage::SyncRequest { state_vector }).await?;
                // Offer everything we already have, e.g. after a reconnect.
                let ours = self.doc.read(|doc| doc.diff(&StateVector::default()));
                if !ours.is_empty() {
                    self.send(ClientMessage::Update { update: ours }).await?;
                }
                if let Some(update) = self.presence.local_update() {
                    self.send(ClientMessage::Presence { update }).await?;
                }
                Ok(None)
            }
            ServerMessage::HandshakeError { reason } => {
                anyhow::bail!("relay refused '{}': {}", self.doc_id, reason)
            }
            ServerMessage::SyncReply { update } => {
                self.doc.apply_update(update);
                self.synced = true;
                Ok(Some(ProviderEvent::Synced))
            }
            ServerMessage::Update { update } => {
                let changed = self.doc.apply_update(update);
                Ok(changed.then_some(ProviderEvent::Changed))
            }
            ServerMessage::Presence { update } => {
                let changed = self.presence.apply_remote(update);
                Ok(changed.then_some(ProviderEvent::PresenceChanged))
            }
            ServerMessage::PresenceSnapshot { updates } => {
                let mut changed = false;
                for update in updates {
                    changed |= self.presence.apply_remote(update);
                }
                Ok(changed.then_some(ProviderEvent::PresenceChanged))
            }
            ServerMessage::PeerLeft { client_id } => {
                let changed = self.presence.remove_client(client_id);
                Ok(changed.then_some(ProviderEvent::PresenceChanged))
            }
            ServerMessage::Pong => Ok(None),
        }
    }

    /// Send local document and presence changes made since the last flush.
    pub async fn flush(&mut self) -> anyhow::Result<()> {
        for update in self.doc.take_updates() {
            self.send(ClientMessage::Update { update }).await?;
        }
        for update in self.presence.take_updates() {
            self.send(ClientMessage::Presence { update }).await?;
        }
        Ok(())
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        self.send(ClientMessage::Ping).await
    }

    async fn send(&self, msg: ClientMessage) -> anyhow::Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("connection to relay closed"))
    }
}
