use campus_db::{AccessDenied, InvalidReply};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upload failed: {0:#}")]
    Upload(anyhow::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ChatError {
    /// True when the store's access policy rejected the operation.
    pub fn is_access_denied(&self) -> bool {
        match self {
            Self::Store(e) => e.downcast_ref::<AccessDenied>().is_some(),
            _ => false,
        }
    }

    /// Store errors caused by bad caller input become `InvalidInput`.
    pub(crate) fn classify(self) -> Self {
        match self {
            Self::Store(e) if e.is::<InvalidReply>() => Self::InvalidInput(e.to_string()),
            other => other,
        }
    }
}
