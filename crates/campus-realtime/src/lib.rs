use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use campus_types::events::ChangeEvent;

const FEED_CAPACITY: usize = 1024;

/// Column predicate applied to change records, e.g. `room_id = <id>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: serde_json::Value,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<serde_json::Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }

    fn matches(&self, event: &ChangeEvent) -> bool {
        event.column(&self.column) == Some(&self.value)
    }
}

/// Describes one open channel, for diagnostics.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub table: String,
    pub filter: Option<Filter>,
}

/// Fans row changes out to every open subscription.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    /// All changes go through one broadcast channel; subscriptions filter
    broadcast_tx: broadcast::Sender<ChangeEvent>,

    /// Open channels: subscription id -> what it listens to
    channels: Mutex<HashMap<Uuid, ChannelInfo>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(FeedInner {
                broadcast_tx,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Publish a change to all subscribers. Having no subscribers is fine.
    pub fn publish(&self, event: ChangeEvent) {
        debug!("Publishing {:?} on {}", event.kind, event.table);
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Open a channel on `table`, optionally narrowed by a column predicate.
    /// The channel stays registered until the returned `Subscription` drops.
    pub fn subscribe(&self, table: &str, filter: Option<Filter>) -> Subscription {
        let id = Uuid::new_v4();
        let info = ChannelInfo {
            table: table.to_string(),
            filter,
        };
        self.with_channels(|channels| {
            channels.insert(id, info.clone());
        });
        debug!("Opened channel {} on {}", id, table);

        Subscription {
            id,
            info,
            rx: self.inner.broadcast_tx.subscribe(),
            feed: Arc::downgrade(&self.inner),
        }
    }

    /// Number of channels currently open.
    pub fn active_channels(&self) -> usize {
        self.with_channels(|channels| channels.len())
    }

    pub fn channels(&self) -> Vec<(Uuid, ChannelInfo)> {
        self.with_channels(|channels| {
            channels.iter().map(|(id, info)| (*id, info.clone())).collect()
        })
    }

    fn close(&self, id: Uuid) {
        if self.with_channels(|channels| channels.remove(&id)).is_some() {
            debug!("Closed channel {}", id);
        }
    }

    fn with_channels<T>(&self, f: impl FnOnce(&mut HashMap<Uuid, ChannelInfo>) -> T) -> T {
        // Every update is a single insert or remove, poisoning is ignored
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut channels)
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// An open channel. Dropping it unregisters the channel.
pub struct Subscription {
    id: Uuid,
    info: ChannelInfo,
    rx: broadcast::Receiver<ChangeEvent>,
    feed: Weak<FeedInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next change on this channel's table that passes its filter.
    /// Returns `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            let event = match self.rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Channel {} lagged by {} changes", self.id, n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            if event.table != self.info.table {
                continue;
            }
            if let Some(filter) = &self.info.filter {
                if !filter.matches(&event) {
                    continue;
                }
            }
            return Some(event);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.feed.upgrade() {
            ChangeFeed { inner }.close(self.id);
        }
    }
}
