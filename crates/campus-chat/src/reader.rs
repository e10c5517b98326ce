use tracing::debug;
use uuid::Uuid;

use campus_db::now_timestamp;
use campus_types::models::{MessagePreview, MessageWithSender, Profile, RoomSummary};

use crate::{ChatClient, ChatError};

/// Maximum number of profiles returned by `search_users`.
pub const SEARCH_LIMIT: u32 = 10;

impl ChatClient {
    /// Every room the current user participates in, with a preview of the
    /// latest message, the unread count, and the member list.
    pub async fn list_user_rooms(&self) -> Result<Vec<RoomSummary>, ChatError> {
        let user = self.session().current_user()?;
        let uid = user.id.to_string();

        self.backend()
            .run_db(move |db| {
                let mut summaries = Vec::new();

                for (room, last_read_at) in db.rooms_for_user(&uid)? {
                    let last_message = db
                        .last_message(&room.id)?
                        .map(|row| row.into_model())
                        .transpose()?;
                    let unread_count = db.unread_count(&room.id, &uid, last_read_at.as_deref())?;
                    let participants = db
                        .room_members(&room.id)?
                        .into_iter()
                        .map(|m| m.into_model())
                        .collect::<anyhow::Result<Vec<_>>>()?;

                    summaries.push(RoomSummary {
                        room: room.into_model()?,
                        last_message: last_message.as_ref().map(MessagePreview::of),
                        unread_count,
                        participants,
                    });
                }

                Ok(summaries)
            })
            .await
    }

    /// A room's full history, oldest first, with sender profile data.
    /// Whether the current user may read it is up to the store's policy.
    pub async fn fetch_messages(&self, room_id: Uuid) -> Result<Vec<MessageWithSender>, ChatError> {
        let user = self.session().current_user()?;
        let uid = user.id.to_string();

        let messages = self
            .backend()
            .run_db(move |db| {
                db.get_room_messages(&uid, &room_id.to_string())?
                    .into_iter()
                    .map(|row| row.into_model())
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .await?;

        debug!("Fetched {} messages for room {}", messages.len(), room_id);
        Ok(messages)
    }

    /// Record that the current user has seen the room up to now. Returns
    /// false if the user is not a participant.
    pub async fn mark_room_read(&self, room_id: Uuid) -> Result<bool, ChatError> {
        let user = self.session().current_user()?;
        let uid = user.id.to_string();

        self.backend()
            .run_db(move |db| db.set_last_read(&room_id.to_string(), &uid, &now_timestamp()))
            .await
    }

    /// Profiles whose display name or username contains `query`, ignoring
    /// case, excluding the current user. A blank query returns nothing
    /// without touching the store.
    pub async fn search_users(&self, query: &str) -> Result<Vec<Profile>, ChatError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let user = self.session().current_user()?;
        let uid = user.id.to_string();
        let query = query.to_string();

        self.backend()
            .run_db(move |db| {
                db.search_profiles(&query, &uid, SEARCH_LIMIT)?
                    .into_iter()
                    .map(|row| row.into_model())
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .await
    }
}
