use rusqlite::ErrorCode;

/// Failure modes of the messaging core.
#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("not a participant of this conversation")]
    NotAParticipant,

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("cannot start a conversation with yourself")]
    SelfConversation,

    #[error("messaging between these users is blocked")]
    Blocked,

    #[error("message needs content or an attachment")]
    EmptyContent,

    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("temporarily unavailable: {0}")]
    Transient(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ChatError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Transient failures may succeed on retry; nothing else should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Transient(_))
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                ChatError::Transient(e.to_string())
            }
            _ => ChatError::Database(e),
        }
    }
}
