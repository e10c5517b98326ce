//! Database row types. These map directly to SQLite rows and are kept apart
//! from the campus-types models so the storage layout can change on its own.

use anyhow::{Context, Result};
use uuid::Uuid;

use campus_types::models::{
    Attachment, Message, MessageType, MessageWithSender, Participant, ParticipantRole, Profile,
    ProfileSummary, Room, RoomMember,
};

use crate::parse_timestamp;

/// Folded text that profile search matches against. Both fields are
/// lowercased with Unicode rules; the separator keeps a query from matching
/// across the two.
pub(crate) fn profile_search_key(username: &str, display_name: &str) -> String {
    format!("{}\u{1f}{}", username.to_lowercase(), display_name.to_lowercase())
}

#[derive(Debug)]
pub struct ProfileRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub password: String,
    pub created_at: String,
}

impl ProfileRow {
    pub fn into_model(self) -> Result<Profile> {
        Ok(Profile {
            id: parse_id(&self.id)?,
            created_at: parse_timestamp(&self.created_at)?,
            username: self.username,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
        })
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
            username: self.username.clone(),
        }
    }
}

#[derive(Debug)]
pub struct RoomRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: String,
    pub direct_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl RoomRow {
    pub fn into_model(self) -> Result<Room> {
        Ok(Room {
            id: parse_id(&self.id)?,
            created_by: parse_id(&self.created_by)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            name: self.name,
            description: self.description,
            is_private: self.is_private,
        })
    }
}

/// Values for a room that has not been written yet.
#[derive(Debug)]
pub struct NewRoom<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub is_private: bool,
    pub created_by: &'a str,
    pub direct_key: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Debug)]
pub struct ParticipantRow {
    pub room_id: String,
    pub user_id: String,
    pub role: String,
    pub last_read_at: Option<String>,
    pub joined_at: String,
}

impl ParticipantRow {
    pub fn into_model(self) -> Result<Participant> {
        Ok(Participant {
            room_id: parse_id(&self.room_id)?,
            user_id: parse_id(&self.user_id)?,
            role: self.role.parse::<ParticipantRole>()?,
            last_read_at: self.last_read_at.as_deref().map(parse_timestamp).transpose()?,
            joined_at: parse_timestamp(&self.joined_at)?,
        })
    }
}

/// A participant joined with the profile columns shown in member lists.
#[derive(Debug)]
pub struct MemberRow {
    pub user_id: String,
    pub role: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub username: Option<String>,
}

impl MemberRow {
    pub fn into_model(self) -> Result<RoomMember> {
        Ok(RoomMember {
            user_id: parse_id(&self.user_id)?,
            role: self.role.parse::<ParticipantRole>()?,
            profile: summary_or_unknown(self.display_name, self.avatar_url, self.username),
        })
    }
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
    /// JSON-encoded `Vec<Attachment>`, NULL when the message has none
    pub attachments: Option<String>,
    pub reply_to: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_model(self) -> Result<Message> {
        let attachments = match self.attachments.as_deref() {
            Some(raw) => Some(
                serde_json::from_str::<Vec<Attachment>>(raw)
                    .with_context(|| format!("Corrupt attachments on message '{}'", self.id))?,
            ),
            None => None,
        };

        Ok(Message {
            id: parse_id(&self.id)?,
            room_id: parse_id(&self.room_id)?,
            sender_id: parse_id(&self.sender_id)?,
            message_type: self.message_type.parse::<MessageType>()?,
            reply_to: self.reply_to.as_deref().map(parse_id).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            content: self.content,
            attachments,
        })
    }
}

/// A message joined with its sender's profile columns. Profile columns are
/// optional because the join is a LEFT JOIN.
#[derive(Debug)]
pub struct MessageWithSenderRow {
    pub message: MessageRow,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub username: Option<String>,
}

impl MessageWithSenderRow {
    pub fn into_model(self) -> Result<MessageWithSender> {
        Ok(MessageWithSender {
            message: self.message.into_model()?,
            sender: summary_or_unknown(self.display_name, self.avatar_url, self.username),
        })
    }
}

pub fn summary_or_unknown(
    display_name: Option<String>,
    avatar_url: Option<String>,
    username: Option<String>,
) -> ProfileSummary {
    let username = username.unwrap_or_else(|| "unknown".to_string());
    ProfileSummary {
        display_name: display_name.unwrap_or_else(|| username.clone()),
        avatar_url,
        username,
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse::<Uuid>().with_context(|| format!("Corrupt id '{}'", raw))
}
