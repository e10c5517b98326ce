//! Chat room and message orchestration: resolving rooms, writing and reading
//! messages, and streaming new messages to subscribers.

pub mod error;
pub mod notifier;
pub mod reader;
pub mod resolver;
pub mod session;
pub mod writer;

use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use campus_db::Database;
use campus_realtime::ChangeFeed;
use campus_storage::ObjectStore;

pub use error::ChatError;
pub use notifier::RoomSubscription;
pub use session::{Session, SessionUser};
pub use writer::{SendMessage, UploadFile};

/// Table name used for message change events.
pub const MESSAGES_TABLE: &str = "messages";

/// The services every chat operation talks to.
pub struct Backend {
    db: Arc<Database>,
    storage: ObjectStore,
    feed: ChangeFeed,
}

impl Backend {
    pub fn new(db: Database, storage: ObjectStore, feed: ChangeFeed) -> Self {
        Self {
            db: Arc::new(db),
            storage,
            feed,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn storage(&self) -> &ObjectStore {
        &self.storage
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Run a blocking database call off the async runtime.
    pub async fn run_db<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::Store(anyhow!("database task failed: {}", e))
            })?
            .map_err(ChatError::Store)
    }
}

/// Chat operations performed on behalf of one session.
#[derive(Clone)]
pub struct ChatClient {
    backend: Arc<Backend>,
    session: Session,
}

impl ChatClient {
    pub fn new(backend: Arc<Backend>, session: Session) -> Self {
        Self { backend, session }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}
