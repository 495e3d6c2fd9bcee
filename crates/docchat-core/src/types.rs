use std::fmt;

use chrono::Local;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a single turn. Issued by the client or by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub String);

impl TurnId {
    /// A fresh client-side identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TurnId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TurnId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Server-issued identifier of a chat session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Author of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sent by the person chatting. Older payloads spell it `Human`.
    #[serde(alias = "Human")]
    User,
    /// Produced by the assistant.
    Assistant,
}

/// Lifecycle state of a turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnStatus {
    /// Receiving streamed content.
    Open,
    /// Finished normally.
    #[default]
    Complete,
    /// Closed with partial content after a failure.
    Failed { reason: String },
}

// =============================================================================
// Structs
// =============================================================================

/// A document an answer is attributed to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub doc_id: String,
    pub doc_name: String,
}

impl DocumentRef {
    pub fn new(doc_id: impl Into<String>, doc_name: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            doc_name: doc_name.into(),
        }
    }

    /// Lower-cased file extension of the document name, used to pick an icon.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.doc_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }
}

/// One message in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    /// Documents the user attached to this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
    /// Citations resolved when the turn was closed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<DocumentRef>,
    #[serde(default)]
    pub status: TurnStatus,
    /// Creation time as epoch seconds.
    pub created_at: i64,
}

impl Turn {
    /// A completed turn with a fresh id.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: TurnId::generate(),
            role,
            content: content.into(),
            document_ids: Vec::new(),
            references: Vec::new(),
            status: TurnStatus::Complete,
            created_at: Local::now().timestamp(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TurnStatus::Open
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TurnStatus::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_id_generate_is_unique() {
        let a = TurnId::generate();
        let b = TurnId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
        let legacy: Role = serde_json::from_str("\"Human\"").unwrap();
        assert_eq!(legacy, Role::User);
    }

    #[test]
    fn test_turn_status_serde() {
        let json = serde_json::to_string(&TurnStatus::Failed {
            reason: "timeout".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"failed","reason":"timeout"}"#);

        let open: TurnStatus = serde_json::from_str(r#"{"state":"open"}"#).unwrap();
        assert_eq!(open, TurnStatus::Open);
    }

    #[test]
    fn test_new_turn_is_complete() {
        let turn = Turn::new(Role::User, "hello");
        assert_eq!(turn.status, TurnStatus::Complete);
        assert!(!turn.is_open());
        assert!(!turn.is_failed());
        assert!(turn.created_at > 0);
    }

    #[test]
    fn test_turn_deserializes_without_optional_fields() {
        let json = r#"{"id":"m1","role":"assistant","content":"hi","created_at":0}"#;
        let turn: Turn = serde_json::from_str(json).unwrap();
        assert_eq!(turn.id, TurnId::from("m1"));
        assert!(turn.document_ids.is_empty());
        assert!(turn.references.is_empty());
        assert_eq!(turn.status, TurnStatus::Complete);
    }

    #[test]
    fn test_document_extension() {
        assert_eq!(
            DocumentRef::new("a", "Report.PDF").extension().as_deref(),
            Some("pdf")
        );
        assert_eq!(
            DocumentRef::new("a", "archive.tar.gz").extension().as_deref(),
            Some("gz")
        );
        assert!(DocumentRef::new("a", "README").extension().is_none());
        assert!(DocumentRef::new("a", ".env").extension().is_none());
        assert!(DocumentRef::new("a", "trailing.").extension().is_none());
    }
}
