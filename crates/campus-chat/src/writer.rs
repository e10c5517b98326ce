use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use campus_db::models::MessageRow;
use campus_db::{format_timestamp, now_utc};
use campus_storage::{StoredObject, unique_object_name};
use campus_types::events::{ChangeEvent, ChangeKind};
use campus_types::models::{Attachment, Message, MessageType};

use crate::{ChatClient, ChatError, MESSAGES_TABLE};

/// Bucket holding files attached to messages.
pub const ATTACHMENTS_BUCKET: &str = "chat-attachments";

/// A file supplied by the sender, not yet uploaded.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub room_id: Uuid,
    pub content: String,
    pub image_file: Option<UploadFile>,
    pub document_file: Option<UploadFile>,
    pub reply_to: Option<Uuid>,
}

impl SendMessage {
    pub fn text(room_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            room_id,
            content: content.into(),
            image_file: None,
            document_file: None,
            reply_to: None,
        }
    }
}

impl ChatClient {
    /// Upload any attached files, then persist the message and publish it.
    ///
    /// The message type follows the attachments: `image` for the image file,
    /// `file` for the document, and the document wins when both are present.
    /// A failed upload aborts the send before anything is written; a failed
    /// insert removes the files uploaded for it.
    pub async fn send_message(&self, req: SendMessage) -> Result<Message, ChatError> {
        let user = self.session().current_user()?;

        if req.content.trim().is_empty() && req.image_file.is_none() && req.document_file.is_none() {
            return Err(ChatError::InvalidInput("message has no content or attachment".into()));
        }
        if let Some(image) = &req.image_file {
            if MessageType::from_mime(&image.content_type) != MessageType::Image {
                return Err(ChatError::InvalidInput(format!(
                    "image attachment has non-image type '{}'",
                    image.content_type
                )));
            }
        }

        let slots = [
            (req.image_file.as_ref(), MessageType::Image),
            (req.document_file.as_ref(), MessageType::File),
        ];

        let mut message_type = MessageType::Text;
        let mut attachments = Vec::new();
        let mut uploaded = Vec::new();

        for (file, kind) in slots {
            let Some(file) = file else { continue };
            match self.upload_attachment(user.id, file).await {
                Ok((object, attachment)) => {
                    uploaded.push(object);
                    attachments.push(attachment);
                    message_type = kind;
                }
                Err(e) => {
                    self.discard_uploads(&uploaded).await;
                    return Err(e);
                }
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            room_id: req.room_id,
            sender_id: user.id,
            content: req.content,
            message_type,
            attachments: (!attachments.is_empty()).then_some(attachments),
            reply_to: req.reply_to,
            created_at: now_utc(),
        };

        let row = match message_row(&message) {
            Ok(row) => row,
            Err(e) => {
                self.discard_uploads(&uploaded).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.backend().run_db(move |db| db.insert_message(&row)).await {
            warn!("Message insert in room {} failed: {}", message.room_id, e);
            self.discard_uploads(&uploaded).await;
            return Err(e.classify());
        }

        debug!(
            "{} sent {} message {} to room {}",
            user.username,
            message.message_type.as_str(),
            message.id,
            message.room_id
        );
        self.publish(ChangeKind::Insert, &message);
        Ok(message)
    }

    /// Delete one of the current user's messages. Returns false if the
    /// message does not exist.
    pub async fn delete_message(&self, message_id: Uuid) -> Result<bool, ChatError> {
        let user = self.session().current_user()?;
        let uid = user.id.to_string();

        let deleted = self
            .backend()
            .run_db(move |db| db.delete_message(&message_id.to_string(), &uid))
            .await?;

        let Some(row) = deleted else {
            return Ok(false);
        };

        info!("{} deleted message {}", user.username, message_id);
        match row.into_model() {
            Ok(message) => self.publish(ChangeKind::Delete, &message),
            Err(e) => warn!("Deleted message {} could not be published: {}", message_id, e),
        }
        Ok(true)
    }

    async fn upload_attachment(
        &self,
        owner: Uuid,
        file: &UploadFile,
    ) -> Result<(StoredObject, Attachment), ChatError> {
        let storage = self.backend().storage();
        let key = format!("{}/{}", owner, unique_object_name(&file.name));

        let object = storage
            .upload(ATTACHMENTS_BUCKET, &key, &file.data)
            .await
            .map_err(ChatError::Upload)?;

        let attachment = Attachment {
            mime_type: file.content_type.clone(),
            url: storage.public_url(ATTACHMENTS_BUCKET, &object.key),
            name: file.name.clone(),
            size: object.size,
        };
        Ok((object, attachment))
    }

    async fn discard_uploads(&self, uploaded: &[StoredObject]) {
        for object in uploaded {
            if let Err(e) = self.backend().storage().remove(&object.bucket, &object.key).await {
                warn!("Failed to remove orphaned upload {}/{}: {}", object.bucket, object.key, e);
            }
        }
    }

    fn publish(&self, kind: ChangeKind, message: &Message) {
        match ChangeEvent::new(MESSAGES_TABLE, kind, message) {
            Ok(event) => self.backend().feed().publish(event),
            Err(e) => warn!("Failed to encode change for message {}: {}", message.id, e),
        }
    }
}

fn message_row(message: &Message) -> anyhow::Result<MessageRow> {
    let attachments = match &message.attachments {
        Some(list) => Some(serde_json::to_string(list)?),
        None => None,
    };

    Ok(MessageRow {
        id: message.id.to_string(),
        room_id: message.room_id.to_string(),
        sender_id: message.sender_id.to_string(),
        content: message.content.clone(),
        message_type: message.message_type.as_str().to_string(),
        attachments,
        reply_to: message.reply_to.map(|id| id.to_string()),
        created_at: format_timestamp(message.created_at),
    })
}
