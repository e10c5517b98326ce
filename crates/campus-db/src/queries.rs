use crate::models::{
    MemberRow, MessageRow, MessageWithSenderRow, NewRoom, ParticipantRow, ProfileRow, RoomRow,
    profile_search_key,
};
use crate::{Database, policy};
use anyhow::{Result, anyhow};
use campus_types::models::{ParticipantRole, ProfileSummary};
use rusqlite::{Connection, Row, TransactionBehavior};

/// The username is already registered.
#[derive(Debug, thiserror::Error)]
#[error("username '{0}' is taken")]
pub struct UsernameTaken(pub String);

const PROFILE_COLUMNS: &str = "id, username, display_name, avatar_url, password, created_at";

const ROOM_COLUMNS: &str =
    "r.id, r.name, r.description, r.is_private, r.created_by, r.direct_key, r.created_at, r.updated_at";

const MESSAGE_COLUMNS: &str =
    "m.id, m.room_id, m.sender_id, m.content, m.message_type, m.attachments, m.reply_to, m.created_at";

impl Database {
    // -- Profiles --

    pub fn create_profile(
        &self,
        id: &str,
        username: &str,
        display_name: &str,
        password_hash: &str,
        created_at: &str,
    ) -> Result<()> {
        let search_key = profile_search_key(username, display_name);

        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO profiles (id, username, display_name, password, search_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, username, display_name, password_hash, &search_key, created_at),
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    Err(UsernameTaken(username.to_string()).into())
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_profile_by_username(&self, username: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM profiles WHERE username = ?1", PROFILE_COLUMNS);
            conn.query_row(&sql, [username], profile_from_row).optional()
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS);
            conn.query_row(&sql, [id], profile_from_row).optional()
        })
    }

    pub fn get_profile_summary(&self, id: &str) -> Result<Option<ProfileSummary>> {
        Ok(self.get_profile(id)?.map(|p| p.summary()))
    }

    /// Case-insensitive substring match on display name or username.
    /// Matches against `search_key`, which is folded in Rust so non-ASCII
    /// names compare the same way as the query.
    pub fn search_profiles(
        &self,
        query: &str,
        exclude_id: &str,
        limit: u32,
    ) -> Result<Vec<ProfileRow>> {
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM profiles
                 WHERE id != ?2
                   AND search_key LIKE ?1 ESCAPE '\\'
                 ORDER BY display_name
                 LIMIT ?3",
                PROFILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![pattern, exclude_id, limit], profile_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Rooms --

    /// Insert a room together with its initial participants in one
    /// transaction. Either everything is written or nothing is.
    pub fn create_room(
        &self,
        room: &NewRoom<'_>,
        members: &[(&str, ParticipantRole)],
    ) -> Result<RoomRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            insert_room_with_members(&tx, room, members)?;
            tx.commit()?;

            query_room(conn, room.id)?.ok_or_else(|| anyhow!("Room vanished after insert: {}", room.id))
        })
    }

    /// Look up the direct-message room shared by two users, creating it from
    /// `room` when none exists. Lookup and insert share an IMMEDIATE
    /// transaction, and `rooms.direct_key` is UNIQUE, so two first contacts
    /// cannot both create a room. Returns `(room, created)`.
    pub fn find_or_create_direct_room(
        &self,
        user_a: &str,
        user_b: &str,
        room: &NewRoom<'_>,
    ) -> Result<(RoomRow, bool)> {
        let direct_key = room
            .direct_key
            .ok_or_else(|| anyhow!("Direct room {} has no direct key", room.id))?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if let Some(existing) = query_direct_room(&tx, user_a, user_b, direct_key)? {
                return Ok((existing, false));
            }

            insert_room_with_members(
                &tx,
                room,
                &[(user_a, ParticipantRole::Member), (user_b, ParticipantRole::Member)],
            )?;
            tx.commit()?;

            let created = query_room(conn, room.id)?
                .ok_or_else(|| anyhow!("Room vanished after insert: {}", room.id))?;
            Ok((created, true))
        })
    }

    pub fn find_direct_room(
        &self,
        user_a: &str,
        user_b: &str,
        direct_key: &str,
    ) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_direct_room(conn, user_a, user_b, direct_key))
    }

    pub fn get_room(&self, id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room(conn, id))
    }

    /// Rooms the user participates in, each with the user's last-read
    /// timestamp, most recently active first.
    pub fn rooms_for_user(&self, user_id: &str) -> Result<Vec<(RoomRow, Option<String>)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}, p.last_read_at
                 FROM room_participants p
                 JOIN rooms r ON r.id = p.room_id
                 WHERE p.user_id = ?1
                 ORDER BY COALESCE(
                     (SELECT MAX(m.created_at) FROM messages m WHERE m.room_id = r.id),
                     r.updated_at
                 ) DESC",
                ROOM_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| Ok((room_from_row(row)?, row.get::<_, Option<String>>(8)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Participants --

    /// Self-service join of a public room. Returns false if the user was
    /// already a participant.
    pub fn join_room(&self, room_id: &str, user_id: &str, joined_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            policy::ensure_joinable(conn, room_id)?;
            let changed = conn.execute(
                "INSERT OR IGNORE INTO room_participants (room_id, user_id, role, last_read_at, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                (room_id, user_id, ParticipantRole::Member.as_str(), joined_at),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_participant(&self, room_id: &str, user_id: &str) -> Result<Option<ParticipantRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT room_id, user_id, role, last_read_at, joined_at
                 FROM room_participants WHERE room_id = ?1 AND user_id = ?2",
                [room_id, user_id],
                |row| {
                    Ok(ParticipantRow {
                        room_id: row.get(0)?,
                        user_id: row.get(1)?,
                        role: row.get(2)?,
                        last_read_at: row.get(3)?,
                        joined_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Policy check used before streaming a room's changes to a user.
    pub fn ensure_room_visible(&self, viewer_id: &str, room_id: &str) -> Result<()> {
        self.with_conn(|conn| policy::ensure_participant(conn, room_id, viewer_id))
    }

    pub fn participant_count(&self, room_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM room_participants WHERE room_id = ?1",
                [room_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Participants of a room joined with their profile display data.
    pub fn room_members(&self, room_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.user_id, p.role, pr.display_name, pr.avatar_url, pr.username
                 FROM room_participants p
                 LEFT JOIN profiles pr ON pr.id = p.user_id
                 WHERE p.room_id = ?1
                 ORDER BY p.joined_at, p.user_id",
            )?;
            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(MemberRow {
                        user_id: row.get(0)?,
                        role: row.get(1)?,
                        display_name: row.get(2)?,
                        avatar_url: row.get(3)?,
                        username: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false if the user is not a participant of the room.
    pub fn set_last_read(&self, room_id: &str, user_id: &str, read_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE room_participants SET last_read_at = ?3 WHERE room_id = ?1 AND user_id = ?2",
                (room_id, user_id, read_at),
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Insert a message on behalf of its sender, who must participate in the
    /// room. Also bumps the room's `updated_at`.
    pub fn insert_message(&self, message: &MessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            policy::ensure_participant(&tx, &message.room_id, &message.sender_id)?;
            if let Some(reply_to) = &message.reply_to {
                policy::ensure_reply_target(&tx, &message.room_id, reply_to)?;
            }

            tx.execute(
                "INSERT INTO messages (id, room_id, sender_id, content, message_type, attachments, reply_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    message.id,
                    message.room_id,
                    message.sender_id,
                    message.content,
                    message.message_type,
                    message.attachments,
                    message.reply_to,
                    message.created_at,
                ],
            )?;
            tx.execute(
                "UPDATE rooms SET updated_at = ?2 WHERE id = ?1",
                (&message.room_id, &message.created_at),
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    /// Full history of a room, oldest first, each row joined with the
    /// sender's profile. Only participants may read it.
    pub fn get_room_messages(
        &self,
        viewer_id: &str,
        room_id: &str,
    ) -> Result<Vec<MessageWithSenderRow>> {
        self.with_conn(|conn| {
            policy::ensure_participant(conn, room_id, viewer_id)?;

            let sql = format!(
                "SELECT {}, pr.display_name, pr.avatar_url, pr.username
                 FROM messages m
                 LEFT JOIN profiles pr ON pr.id = m.sender_id
                 WHERE m.room_id = ?1
                 ORDER BY m.created_at ASC, m.rowid ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(MessageWithSenderRow {
                        message: message_from_row(row)?,
                        display_name: row.get(8)?,
                        avatar_url: row.get(9)?,
                        username: row.get(10)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn last_message(&self, room_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages m
                 WHERE m.room_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT 1",
                MESSAGE_COLUMNS
            );
            conn.query_row(&sql, [room_id], message_from_row).optional()
        })
    }

    /// Messages newer than `since` that were not sent by `user_id`. A missing
    /// `since` counts every message from others.
    pub fn unread_count(&self, room_id: &str, user_id: &str, since: Option<&str>) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE room_id = ?1
                   AND sender_id != ?2
                   AND (?3 IS NULL OR created_at > ?3)",
                rusqlite::params![room_id, user_id, since],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Delete a message on behalf of `requester_id`, who must be its sender.
    /// Returns the deleted row, or `None` if it did not exist.
    pub fn delete_message(&self, id: &str, requester_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages m WHERE m.id = ?1", MESSAGE_COLUMNS);
            let Some(row) = conn.query_row(&sql, [id], message_from_row).optional()? else {
                return Ok(None);
            };

            policy::ensure_sender(&row.sender_id, requester_id, id)?;
            conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(Some(row))
        })
    }
}

fn insert_room_with_members(
    conn: &Connection,
    room: &NewRoom<'_>,
    members: &[(&str, ParticipantRole)],
) -> Result<()> {
    conn.execute(
        "INSERT INTO rooms (id, name, description, is_private, created_by, direct_key, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        rusqlite::params![
            room.id,
            room.name,
            room.description,
            room.is_private,
            room.created_by,
            room.direct_key,
            room.created_at,
        ],
    )?;

    for (user_id, role) in members {
        conn.execute(
            "INSERT INTO room_participants (room_id, user_id, role, last_read_at, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            (room.id, user_id, role.as_str(), room.created_at),
        )?;
    }

    Ok(())
}

fn query_room(conn: &Connection, id: &str) -> Result<Option<RoomRow>> {
    let sql = format!("SELECT {} FROM rooms r WHERE r.id = ?1", ROOM_COLUMNS);
    conn.query_row(&sql, [id], room_from_row).optional()
}

/// A direct room is either the one recorded under the pair's key, or a
/// private room both users share that has no other participants. A group
/// room that happens to contain both users among others never qualifies.
fn query_direct_room(
    conn: &Connection,
    user_a: &str,
    user_b: &str,
    direct_key: &str,
) -> Result<Option<RoomRow>> {
    let sql = format!(
        "SELECT {} FROM rooms r
         WHERE r.direct_key = ?3
            OR (
                r.is_private = 1
                AND r.id IN (
                    SELECT p.room_id FROM room_participants p
                    WHERE p.user_id IN (?1, ?2)
                    GROUP BY p.room_id
                    HAVING COUNT(DISTINCT p.user_id) = 2
                )
                AND (SELECT COUNT(*) FROM room_participants c WHERE c.room_id = r.id) = 2
            )
         ORDER BY CASE WHEN r.direct_key = ?3 THEN 0 ELSE 1 END, r.created_at
         LIMIT 1",
        ROOM_COLUMNS
    );
    conn.query_row(&sql, [user_a, user_b, direct_key], room_from_row).optional()
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        password: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_private: row.get(3)?,
        created_by: row.get(4)?,
        direct_key: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        message_type: row.get(4)?,
        attachments: row.get(5)?,
        reply_to: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
