use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The slice of a profile shown next to messages and room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Admin,
    Member,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl FromStr for ParticipantRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub last_read_at: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

/// Display classification of a message. Always derived from the attachments
/// a message carries, never picked by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
}

impl MessageType {
    /// `image/*` MIME types render inline; everything else is a file.
    pub fn from_mime(mime: &str) -> Self {
        let is_image = mime
            .split('/')
            .next()
            .is_some_and(|top| top.trim().eq_ignore_ascii_case("image"));
        if is_image { Self::Image } else { Self::File }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    /// Placeholder shown in room lists instead of the raw content.
    pub fn preview_label(&self) -> Option<&'static str> {
        match self {
            Self::Text => None,
            Self::Image => Some("📷 Photo"),
            Self::File => Some("📎 File"),
        }
    }
}

impl FromStr for MessageType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub mime_type: String,
    pub url: String,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Option<Vec<Attachment>>,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn has_attachments(&self) -> bool {
        self.attachments.as_ref().is_some_and(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: Message,
    pub sender: ProfileSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMember {
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub profile: ProfileSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePreview {
    pub text: String,
    pub message_type: MessageType,
    pub sender_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl MessagePreview {
    pub fn of(message: &Message) -> Self {
        let text = match message.message_type.preview_label() {
            Some(label) if message.has_attachments() => label.to_string(),
            _ => message.content.clone(),
        };
        Self {
            text,
            message_type: message.message_type,
            sender_id: message.sender_id,
            created_at: message.created_at,
        }
    }
}

/// A room as shown in the room list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: Room,
    pub last_message: Option<MessagePreview>,
    pub unread_count: u64,
    pub participants: Vec<RoomMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant '{0}'")]
pub struct UnknownVariant(pub String);
