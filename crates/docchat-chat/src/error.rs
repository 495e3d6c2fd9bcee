//! Error types for the conversation controller.

use docchat_core::error::DocchatError;

/// Errors from the conversation store and stream driver.
///
/// `NoOpenTurn` and `InvariantViolation` signal a sequencing bug in the
/// caller and are not meant to be shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    InvalidInput,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("no assistant turn is open")]
    NoOpenTurn,
    #[error("conversation invariant violated: {0}")]
    InvariantViolation(String),
    #[error("backend error {retcode}: {message}")]
    Backend { retcode: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
}

impl ChatError {
    /// Whether the error comes from driver sequencing rather than input or
    /// the backend.
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, ChatError::NoOpenTurn | ChatError::InvariantViolation(_))
    }
}

impl From<DocchatError> for ChatError {
    fn from(err: DocchatError) -> Self {
        ChatError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::InvalidInput.to_string(), "message cannot be empty");
        assert_eq!(
            ChatError::MessageTooLong(2000).to_string(),
            "message exceeds maximum length of 2000 characters"
        );
        assert_eq!(ChatError::NoOpenTurn.to_string(), "no assistant turn is open");
        assert_eq!(
            ChatError::InvariantViolation("two open turns".to_string()).to_string(),
            "conversation invariant violated: two open turns"
        );
        assert_eq!(
            ChatError::Backend {
                retcode: 102,
                message: "dialog not found".to_string()
            }
            .to_string(),
            "backend error 102: dialog not found"
        );
    }

    #[test]
    fn test_programmer_errors() {
        assert!(ChatError::NoOpenTurn.is_programmer_error());
        assert!(ChatError::InvariantViolation(String::new()).is_programmer_error());
        assert!(!ChatError::InvalidInput.is_programmer_error());
        assert!(!ChatError::Decode("x".to_string()).is_programmer_error());
    }

    #[test]
    fn test_chat_error_from_docchat_error() {
        let err: ChatError = DocchatError::Serialization("bad frame".to_string()).into();
        assert!(matches!(err, ChatError::Decode(_)));
        assert!(err.to_string().contains("bad frame"));
    }

    #[test]
    fn test_chat_error_from_serde_json() {
        let err: Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: ChatError = err.unwrap_err().into();
        assert!(matches!(err, ChatError::Decode(_)));
    }
}
