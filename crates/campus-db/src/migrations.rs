use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use crate::models::profile_search_key;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (profiles, rooms, participants, messages)");
        conn.execute_batch(
            "
            CREATE TABLE profiles (
                id              TEXT PRIMARY KEY,
                username        TEXT NOT NULL UNIQUE,
                display_name    TEXT NOT NULL,
                avatar_url      TEXT,
                password        TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            -- created_by is not a foreign key; membership lives in
            -- room_participants
            CREATE TABLE rooms (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                description     TEXT,
                is_private      INTEGER NOT NULL DEFAULT 0,
                created_by      TEXT NOT NULL,
                direct_key      TEXT UNIQUE,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE room_participants (
                room_id         TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id         TEXT NOT NULL REFERENCES profiles(id),
                role            TEXT NOT NULL CHECK (role IN ('admin', 'member')),
                last_read_at    TEXT,
                joined_at       TEXT NOT NULL,
                PRIMARY KEY (room_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON room_participants(user_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                room_id         TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                sender_id       TEXT NOT NULL REFERENCES profiles(id),
                content         TEXT NOT NULL DEFAULT '',
                message_type    TEXT NOT NULL CHECK (message_type IN ('text', 'image', 'file')),
                attachments     TEXT,
                reply_to        TEXT REFERENCES messages(id) ON DELETE SET NULL,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_room
                ON messages(room_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (profile search keys)");
        conn.execute_batch("ALTER TABLE profiles ADD COLUMN search_key TEXT NOT NULL DEFAULT '';")?;

        let profiles = {
            let mut stmt = conn.prepare("SELECT id, username, display_name FROM profiles")?;
            stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
        };
        for (id, username, display_name) in profiles {
            conn.execute(
                "UPDATE profiles SET search_key = ?2 WHERE id = ?1",
                (&id, profile_search_key(&username, &display_name)),
            )?;
        }

        conn.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    }

    info!("Database migrations complete");
    Ok(())
}
