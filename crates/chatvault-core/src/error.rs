//! Error types for ChatVault.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No chat is open")]
    NoOpenChat,

    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    #[error("Invalid chat id: {0:?}")]
    InvalidChatId(String),

    #[error("Storage error ({op}): {message}")]
    StorageIo { op: &'static str, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap an underlying filesystem or database error with the failing operation.
    pub fn storage(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::StorageIo {
            op,
            message: err.to_string(),
        }
    }

    /// True for errors raised by a cancelled or expired [`crate::OpContext`].
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_carries_operation() {
        let err = Error::storage("open_chat", "database is locked");
        assert_eq!(err.to_string(), "Storage error (open_chat): database is locked");
        assert!(!err.is_interrupt());
    }

    #[test]
    fn test_serialization_from_serde() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
