use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageWithSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change published on the realtime feed.
///
/// `record` carries the raw columns of the affected row only. Joined data
/// (sender profiles and the like) is never part of the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub record: serde_json::Value,
}

impl ChangeEvent {
    pub fn new<T: Serialize>(
        table: &str,
        kind: ChangeKind,
        record: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            table: table.to_string(),
            kind,
            record: serde_json::to_value(record)?,
        })
    }

    /// Column value of the record, if present.
    pub fn column(&self, name: &str) -> Option<&serde_json::Value> {
        self.record.get(name)
    }
}

/// Events sent FROM server TO a client watching a room over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LiveEvent {
    /// Subscription is open
    Ready { room_id: Uuid },

    /// A message was inserted into the room
    MessageCreate(MessageWithSender),
}
