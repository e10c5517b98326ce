//! Row-level access policy. Every query that reads or writes room content on
//! behalf of a user goes through these checks, so callers above the store
//! never repeat them.

use anyhow::Result;
use rusqlite::Connection;

use crate::queries::OptionalExt;

/// Raised when the policy rejects an operation. Travels inside
/// `anyhow::Error`; use `downcast_ref::<AccessDenied>()` to detect it.
#[derive(Debug, thiserror::Error)]
#[error("access denied: {0}")]
pub struct AccessDenied(pub String);

/// Raised when a reply points at a message that does not exist or lives in
/// another room.
#[derive(Debug, thiserror::Error)]
#[error("invalid reply: {0}")]
pub struct InvalidReply(pub String);

pub fn is_participant(conn: &Connection, room_id: &str, user_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM room_participants WHERE room_id = ?1 AND user_id = ?2",
            [room_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Room content is visible to, and writable by, its participants only.
pub fn ensure_participant(conn: &Connection, room_id: &str, user_id: &str) -> Result<()> {
    if is_participant(conn, room_id, user_id)? {
        Ok(())
    } else {
        Err(AccessDenied(format!("user {} is not a participant of room {}", user_id, room_id)).into())
    }
}

/// Only public rooms accept self-service joins. Private rooms (including
/// direct messages) are populated by their creator.
pub fn ensure_joinable(conn: &Connection, room_id: &str) -> Result<()> {
    let is_private: Option<bool> = conn
        .query_row("SELECT is_private FROM rooms WHERE id = ?1", [room_id], |row| row.get(0))
        .optional()?;

    match is_private {
        Some(false) => Ok(()),
        Some(true) => Err(AccessDenied(format!("room {} is private", room_id)).into()),
        None => Err(anyhow::anyhow!("Room not found: {}", room_id)),
    }
}

/// Messages can only be removed by whoever sent them.
pub fn ensure_sender(sender_id: &str, requester_id: &str, message_id: &str) -> Result<()> {
    if sender_id == requester_id {
        Ok(())
    } else {
        Err(AccessDenied(format!("message {} belongs to another user", message_id)).into())
    }
}

/// A reply must quote a message from the same room.
pub fn ensure_reply_target(conn: &Connection, room_id: &str, reply_to: &str) -> Result<()> {
    let target_room: Option<String> = conn
        .query_row("SELECT room_id FROM messages WHERE id = ?1", [reply_to], |row| row.get(0))
        .optional()?;

    match target_room {
        Some(target) if target == room_id => Ok(()),
        Some(_) => Err(InvalidReply(format!("message {} is in another room", reply_to)).into()),
        None => Err(InvalidReply(format!("message {} does not exist", reply_to)).into()),
    }
}
