//! Ephemeral per-connection state (who is here, where their cursor is).
//!
//! Presence never enters the replicated document. Each client owns exactly
//! one record and overwrites it freely; a monotonically increasing clock per
//! client decides which copy is newest. Records of disconnected peers are
//! dropped when the transport reports them gone.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::update::ClientId;
use crate::player::Player;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Offset of the pointer from the board origin.
    pub vector: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub player: Player,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

impl PresenceRecord {
    pub fn new(player: Player) -> Self {
        Self {
            player,
            cursor: None,
        }
    }
}

/// What goes over the wire. `record: None` withdraws the client's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub client_id: ClientId,
    pub clock: u32,
    pub record: Option<PresenceRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub client_id: ClientId,
    pub record: PresenceRecord,
}

type Listener = Box<dyn FnMut(&[PresenceEntry])>;

pub struct Presence {
    client_id: ClientId,
    clock: u32,
    records: BTreeMap<ClientId, PresenceRecord>,
    clocks: HashMap<ClientId, u32>,
    outbox: Vec<PresenceUpdate>,
    listeners: Vec<Listener>,
}

impl Presence {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            clock: 0,
            records: BTreeMap::new(),
            clocks: HashMap::new(),
            outbox: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Publish (or replace) this client's record.
    pub fn set_local_state(&mut self, record: PresenceRecord) {
        self.publish(Some(record));
    }

    /// Update only the cursor of the local record. No-op before the record
    /// has been set.
    pub fn set_cursor(&mut self, cursor: Option<Cursor>) {
        if let Some(mut record) = self.local_state().cloned() {
            record.cursor = cursor;
            self.publish(Some(record));
        }
    }

    /// Withdraw this client's record, e.g. on a graceful leave.
    pub fn clear_local_state(&mut self) {
        if self.records.contains_key(&self.client_id) {
            self.publish(None);
        }
    }

    pub fn local_state(&self) -> Option<&PresenceRecord> {
        self.records.get(&self.client_id)
    }

    /// The update that re-announces the local record, for new connections.
    pub fn local_update(&self) -> Option<PresenceUpdate> {
        self.local_state().map(|record| PresenceUpdate {
            client_id: self.client_id,
            clock: self.clock,
            record: Some(record.clone()),
        })
    }

    /// Merge a record published by another client. Stale clocks and echoes
    /// of our own record are ignored. Returns true if the visible set changed.
    pub fn apply_remote(&mut self, update: PresenceUpdate) -> bool {
        if update.client_id == self.client_id {
            return false;
        }
        let known = self.clocks.get(&update.client_id).copied();
        if known.is_some_and(|clock| update.clock <= clock) {
            return false;
        }
        self.clocks.insert(update.client_id, update.clock);
        match update.record {
            Some(record) => {
                self.records.insert(update.client_id, record);
            }
            None => {
                self.records.remove(&update.client_id);
            }
        }
        self.notify();
        true
    }

    /// Drop a peer whose connection is gone.
    pub fn remove_client(&mut self, client_id: ClientId) -> bool {
        if client_id == self.client_id || self.records.remove(&client_id).is_none() {
            return false;
        }
        self.notify();
        true
    }

    /// Current snapshot of every live record, ordered by client id.
    pub fn states(&self) -> Vec<PresenceEntry> {
        self.records
            .iter()
            .map(|(&client_id, record)| PresenceEntry {
                client_id,
                record: record.clone(),
            })
            .collect()
    }

    /// Distinct players currently present (one player may hold several
    /// connections).
    pub fn players(&self) -> Vec<Player> {
        let mut players: Vec<Player> = Vec::new();
        for record in self.records.values() {
            if !players.iter().any(|p| p.id == record.player.id) {
                players.push(record.player.clone());
            }
        }
        players
    }

    pub fn on_change(&mut self, listener: impl FnMut(&[PresenceEntry]) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Drain updates to send to peers.
    pub fn take_updates(&mut self) -> Vec<PresenceUpdate> {
        std::mem::take(&mut self.outbox)
    }

    fn publish(&mut self, record: Option<PresenceRecord>) {
        self.clock += 1;
        match &record {
            Some(r) => {
                self.records.insert(self.client_id, r.clone());
            }
            None => {
                self.records.remove(&self.client_id);
            }
        }
        self.outbox.push(PresenceUpdate {
            client_id: self.client_id,
            clock: self.clock,
            record,
        });
        self.notify();
    }

    fn notify(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let snapshot = self.states();
        for listener in self.listeners.iter_mut() {
            listener(&snapshot);
        }
    }
}

impl std::fmt::Debug for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presence")
            .field("client_id", &self.client_id)
            .field("clock", &self.clock)
            .field("records", &self.records)
            .finish()
    }
}
