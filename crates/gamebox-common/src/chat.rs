use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::doc::{Doc, DocHandle, SubscriptionId};
use crate::player::Player;

pub const MESSAGES_MAP: &str = "messages";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    /// Time-ordered uuid; sorting by id sorts by send time.
    pub id: String,
    pub sender: Player,
    pub content: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
}

/// Room chat stored on the room document.
#[derive(Debug, Clone)]
pub struct ChatLog {
    doc: DocHandle,
}

impl ChatLog {
    pub fn new(doc: DocHandle) -> Self {
        doc.with_mut(|d| d.ensure_map(MESSAGES_MAP));
        Self { doc }
    }

    /// Post a message. Blank content is ignored.
    pub fn send(&self, sender: &Player, content: &str) -> Option<MessageData> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        let message = MessageData {
            id: Uuid::now_v7().to_string(),
            sender: sender.clone(),
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.doc
            .transact(|txn| txn.map_set(MESSAGES_MAP, &message.id, &message));
        Some(message)
    }

    pub fn messages(&self) -> Vec<MessageData> {
        self.doc.read(messages_in)
    }

    pub fn observe(&self, mut listener: impl FnMut(&[MessageData]) + 'static) -> SubscriptionId {
        self.doc.observe(move |event, doc| {
            if event.touches(MESSAGES_MAP) {
                listener(&messages_in(doc));
            }
        })
    }
}

fn messages_in(doc: &Doc) -> Vec<MessageData> {
    let mut messages: Vec<MessageData> = doc.get_map(MESSAGES_MAP).values();
    messages.sort_by(|a, b| a.id.cmp(&b.id));
    messages
}
