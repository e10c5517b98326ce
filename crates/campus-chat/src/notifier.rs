use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use campus_db::models::summary_or_unknown;
use campus_realtime::Filter;
use campus_types::events::{ChangeEvent, ChangeKind};
use campus_types::models::{Message, MessageWithSender};

use crate::{Backend, ChatClient, ChatError, MESSAGES_TABLE};

/// A live subscription to a room's new messages.
///
/// The channel stays open for as long as the handle lives. Dropping the
/// handle, or calling `unsubscribe`, closes it.
#[derive(Debug)]
#[must_use = "dropping the subscription closes it immediately"]
pub struct RoomSubscription {
    room_id: Uuid,
    channel_id: Uuid,
    task: Option<JoinHandle<()>>,
}

impl RoomSubscription {
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    /// Close the channel and wait until it is torn down.
    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        debug!("Unsubscribed from room {}", self.room_id);
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl ChatClient {
    /// Stream messages inserted into `room_id` to `callback`, each hydrated
    /// with its sender's profile. Updates and deletes are not delivered.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn subscribe_to_room_messages<F>(
        &self,
        room_id: Uuid,
        mut callback: F,
    ) -> Result<RoomSubscription, ChatError>
    where
        F: FnMut(MessageWithSender) + Send + 'static,
    {
        let user = self.session().current_user()?;
        let uid = user.id.to_string();

        self.backend()
            .run_db(move |db| db.ensure_room_visible(&uid, &room_id.to_string()))
            .await?;

        let mut channel = self
            .backend()
            .feed()
            .subscribe(MESSAGES_TABLE, Some(Filter::eq("room_id", room_id.to_string())));
        let channel_id = channel.id();
        let backend = Arc::clone(self.backend());

        let task = tokio::spawn(async move {
            while let Some(event) = channel.recv().await {
                if event.kind != ChangeKind::Insert {
                    continue;
                }
                match hydrate(&backend, event).await {
                    Ok(message) => callback(message),
                    Err(e) => warn!("Dropping live message for room {}: {}", room_id, e),
                }
            }
            debug!("Channel {} for room {} closed", channel_id, room_id);
        });

        debug!("{} subscribed to room {} on channel {}", user.username, room_id, channel_id);
        Ok(RoomSubscription {
            room_id,
            channel_id,
            task: Some(task),
        })
    }
}

/// Change records carry only the message's own columns; look up the sender.
async fn hydrate(backend: &Backend, event: ChangeEvent) -> Result<MessageWithSender, ChatError> {
    let message: Message = serde_json::from_value(event.record).map_err(anyhow::Error::from)?;
    let sender_id = message.sender_id.to_string();

    let sender = backend
        .run_db(move |db| db.get_profile_summary(&sender_id))
        .await?
        .unwrap_or_else(|| summary_or_unknown(None, None, None));

    Ok(MessageWithSender { message, sender })
}
