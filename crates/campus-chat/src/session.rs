use uuid::Uuid;

use crate::ChatError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: Uuid,
    pub username: String,
}

/// Who the chat operations act as. Built from a verified token by the
/// server, or directly in tests.
#[derive(Debug, Clone, Default)]
pub struct Session {
    user: Option<SessionUser>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn authenticated(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            user: Some(SessionUser {
                id,
                username: username.into(),
            }),
        }
    }

    /// The signed-in user, or `NotAuthenticated`.
    pub fn current_user(&self) -> Result<&SessionUser, ChatError> {
        self.user.as_ref().ok_or(ChatError::NotAuthenticated)
    }
}
