use tracing::{debug, info, warn};
use uuid::Uuid;

use campus_db::models::NewRoom;
use campus_db::now_timestamp;
use campus_types::models::{ParticipantRole, Room};

use crate::{ChatClient, ChatError};

/// Name given to a direct-message room when the counterpart has no profile.
pub const DEFAULT_DIRECT_ROOM_NAME: &str = "Direct Message";

/// Canonical key for the direct-message room between two users: both ids,
/// sorted lexicographically, so either side computes the same key.
pub fn direct_pair_key(a: Uuid, b: Uuid) -> String {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

impl ChatClient {
    /// Create a group room with the current user as its admin. The room and
    /// the admin's membership are written together; if the membership cannot
    /// be written, no room is left behind.
    pub async fn create_group_room(
        &self,
        name: &str,
        description: Option<&str>,
        is_private: Option<bool>,
    ) -> Result<Room, ChatError> {
        let user = self.session().current_user()?;

        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("room name must not be empty".into()));
        }
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        let is_private = is_private.unwrap_or(false);

        let room_id = Uuid::new_v4().to_string();
        let creator = user.id.to_string();

        let result = self
            .backend()
            .run_db(move |db| {
                let created_at = now_timestamp();
                let row = db.create_room(
                    &NewRoom {
                        id: &room_id,
                        name: &name,
                        description: description.as_deref(),
                        is_private,
                        created_by: &creator,
                        direct_key: None,
                        created_at: &created_at,
                    },
                    &[(creator.as_str(), ParticipantRole::Admin)],
                )?;
                row.into_model()
            })
            .await;

        match &result {
            Ok(room) => info!("{} created room {} ({})", user.username, room.name, room.id),
            Err(e) => warn!("Room creation by {} rolled back: {}", user.username, e),
        }
        result
    }

    /// Resolve the direct-message room between the current user and
    /// `other_user_id`, creating it on first contact.
    pub async fn find_or_create_direct_message(&self, other_user_id: Uuid) -> Result<Room, ChatError> {
        let user = self.session().current_user()?;
        if user.id == other_user_id {
            return Err(ChatError::InvalidInput("cannot open a direct message with yourself".into()));
        }

        let me = user.id.to_string();
        let other = other_user_id.to_string();
        let direct_key = direct_pair_key(user.id, other_user_id);

        let (me_lookup, other_lookup, key_lookup) = (me.clone(), other.clone(), direct_key.clone());
        let existing = self
            .backend()
            .run_db(move |db| db.find_direct_room(&me_lookup, &other_lookup, &key_lookup))
            .await?;
        if let Some(row) = existing {
            debug!("Resolved existing direct room {}", row.id);
            return Ok(row.into_model()?);
        }

        let (room, created) = self
            .backend()
            .run_db(move |db| {
                let name = db
                    .get_profile_summary(&other)?
                    .map(|p| p.display_name)
                    .unwrap_or_else(|| DEFAULT_DIRECT_ROOM_NAME.to_string());
                let room_id = Uuid::new_v4().to_string();
                let created_at = now_timestamp();

                let (row, created) = db.find_or_create_direct_room(
                    &me,
                    &other,
                    &NewRoom {
                        id: &room_id,
                        name: &name,
                        description: None,
                        is_private: true,
                        created_by: &me,
                        direct_key: Some(direct_key.as_str()),
                        created_at: &created_at,
                    },
                )?;
                Ok((row.into_model()?, created))
            })
            .await
            .inspect_err(|e| warn!("Direct room creation by {} rolled back: {}", user.username, e))?;

        if created {
            info!("{} opened direct room {} with {}", user.username, room.id, other_user_id);
        }
        Ok(room)
    }

    /// Join a public room as a member. Returns false if already a member.
    pub async fn join_room(&self, room_id: Uuid) -> Result<bool, ChatError> {
        let user = self.session().current_user()?;
        let uid = user.id.to_string();

        let joined = self
            .backend()
            .run_db(move |db| db.join_room(&room_id.to_string(), &uid, &now_timestamp()))
            .await?;

        if joined {
            info!("{} joined room {}", user.username, room_id);
        }
        Ok(joined)
    }
}
