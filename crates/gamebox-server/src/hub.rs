use std::collections::HashMap;

use uuid::Uuid;

use gamebox_common::update::{ClientId, StateVector, Update, UpdateLog};
use gamebox_common::presence::PresenceUpdate;

/// Everything the relay keeps for one live document.
#[derive(Debug, Default)]
struct Topic {
    log: UpdateLog,
    presence: HashMap<ClientId, PresenceUpdate>,
    subscribers: Vec<Uuid>,
}

#[derive(Debug, Clone)]
struct Subscription {
    doc: String,
    client_id: ClientId,
}

/// Returned when a connection leaves so its peers can be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub doc: String,
    pub client_id: ClientId,
    pub remaining: Vec<Uuid>,
}

/// Totals across every live document, for the periodic status line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub documents: usize,
    pub subscribers: usize,
    pub updates: usize,
    pub bytes: usize,
}

/// Document-keyed broadcast groups. Knows nothing about what the documents
/// contain; it merges their updates into one buffer per document so late
/// joiners can be served while at least one subscriber is connected.
#[derive(Debug, Default)]
pub struct Hub {
    topics: HashMap<String, Topic>,
    subscriptions: HashMap<Uuid, Subscription>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `conn` to `doc`. Returns the presence records already known
    /// for that document.
    pub fn join(&mut self, conn: Uuid, doc: &str, client_id: ClientId) -> Vec<PresenceUpdate> {
        if self.subscriptions.contains_key(&conn) {
            self.leave(conn);
        }
        let topic = self.topics.entry(doc.to_string()).or_default();
        topic.subscribers.push(conn);
        self.subscriptions.insert(
            conn,
            Subscription {
                doc: doc.to_string(),
                client_id,
            },
        );
        tracing::debug!(%conn, doc, client_id, subscribers = topic.subscribers.len(), "subscribed");

        let mut snapshot: Vec<PresenceUpdate> = topic
            .presence
            .values()
            .filter(|u| u.record.is_some())
            .cloned()
            .collect();
        snapshot.sort_by_key(|u| u.client_id);
        snapshot
    }

    /// Unsubscribe `conn`. The document's log is dropped with its last
    /// subscriber.
    pub fn leave(&mut self, conn: Uuid) -> Option<Departure> {
        let sub = self.subscriptions.remove(&conn)?;
        let topic = self.topics.get_mut(&sub.doc)?;
        topic.subscribers.retain(|&id| id != conn);
        topic.presence.remove(&sub.client_id);
        let remaining = topic.subscribers.clone();

        if remaining.is_empty() {
            self.topics.remove(&sub.doc);
            tracing::debug!(doc = %sub.doc, "last subscriber gone, document dropped");
        }
        Some(Departure {
            doc: sub.doc,
            client_id: sub.client_id,
            remaining,
        })
    }

    pub fn stats(&self) -> HubStats {
        self.topics.values().fold(HubStats::default(), |acc, topic| HubStats {
            documents: acc.documents + 1,
            subscribers: acc.subscribers + topic.subscribers.len(),
            updates: acc.updates + topic.log.update_count(),
            bytes: acc.bytes + topic.log.byte_len(),
        })
    }

    pub fn doc_of(&self, conn: Uuid) -> Option<&str> {
        self.subscriptions.get(&conn).map(|s| s.doc.as_str())
    }

    /// Other subscribers of the document `conn` is on.
    pub fn peers_of(&self, conn: Uuid) -> Vec<Uuid> {
        self.subscriptions
            .get(&conn)
            .and_then(|sub| self.topics.get(&sub.doc))
            .map(|topic| {
                topic
                    .subscribers
                    .iter()
                    .copied()
                    .filter(|&id| id != conn)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record an update from `conn`. Returns the peers to forward it to, or
    /// `None` when there is nothing worth forwarding.
    pub fn merge_update(&mut self, conn: Uuid, update: &Update) -> Option<Vec<Uuid>> {
        let doc = self.subscriptions.get(&conn)?.doc.clone();
        if update.is_empty() {
            return None;
        }
        if let Err(e) = self.topics.get_mut(&doc)?.log.merge(update) {
            tracing::warn!(%conn, doc, "dropping update: {}", e);
            return None;
        }
        Some(self.peers_of(conn))
    }

    /// Everything on `conn`'s document that a replica at `remote` is missing.
    /// An unreadable state vector gets the whole document.
    pub fn sync_reply(&self, conn: Uuid, remote: &StateVector) -> Option<Update> {
        let sub = self.subscriptions.get(&conn)?;
        let log = &self.topics.get(&sub.doc)?.log;
        match log.diff(remote) {
            Ok(update) => Some(update),
            Err(e) => {
                tracing::warn!(%conn, doc = %sub.doc, "{}, sending the full document", e);
                log.diff(&StateVector::default()).ok()
            }
        }
    }

    /// Remember the newest presence record per client. Returns the peers to
    /// forward it to, or `None` if the update is stale.
    pub fn record_presence(&mut self, conn: Uuid, update: PresenceUpdate) -> Option<Vec<Uuid>> {
        let doc = self.subscriptions.get(&conn)?.doc.clone();
        let topic = self.topics.get_mut(&doc)?;
        if let Some(known) = topic.presence.get(&update.client_id) {
            if update.clock <= known.clock {
                return None;
            }
        }
        topic.presence.insert(update.client_id, update);
        Some(self.peers_of(conn))
    }
}
