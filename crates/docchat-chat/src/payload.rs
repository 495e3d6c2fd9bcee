//! Backend wire types.
//!
//! The completion endpoint streams [`CompletionFrame`]s; the conversation
//! endpoint returns a [`ConversationPayload`]. Both are decoded leniently:
//! citation entries that do not have the expected shape are dropped instead
//! of failing the whole payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use docchat_core::types::{Role, Turn, TurnId, TurnStatus};

// =============================================================================
// Citations
// =============================================================================

/// Turn-level citation declared by the backend (`doc_aggs[]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAggregate {
    #[serde(default, deserialize_with = "lenient_string")]
    pub doc_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub doc_name: Option<String>,
    /// Number of chunks from this document, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Evidence chunk citation (`chunks[]`). Several chunks may share a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceChunk {
    #[serde(default, deserialize_with = "lenient_string")]
    pub doc_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub doc_name: Option<String>,
    /// Older backends name the document field `docnm_kwd`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub docnm_kwd: Option<String>,
    /// Retrieval metadata (chunk id, content, similarity, ...). Opaque here.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Citations attached to one answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, deserialize_with = "lenient_entries")]
    pub doc_aggs: Vec<ReferenceAggregate>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub chunks: Vec<EvidenceChunk>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total: u64,
}

impl Reference {
    pub fn is_empty(&self) -> bool {
        self.doc_aggs.is_empty() && self.chunks.is_empty()
    }
}

// =============================================================================
// Streaming frames
// =============================================================================

/// One server-sent event of the completion stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionFrame {
    #[serde(default)]
    pub retcode: i64,
    #[serde(default)]
    pub retmsg: String,
    #[serde(default)]
    pub data: Option<FrameData>,
}

impl CompletionFrame {
    pub fn is_error(&self) -> bool {
        self.retcode != 0
    }

    /// The answer payload, if this frame carries one.
    pub fn answer(&self) -> Option<&AnswerData> {
        match self.data {
            Some(FrameData::Answer(ref answer)) => Some(answer),
            _ => None,
        }
    }
}

/// Payload of a frame: an answer update, or a bare flag marking the end of
/// the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameData {
    Flag(bool),
    Answer(AnswerData),
}

/// Answer update carried by a frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerData {
    #[serde(default)]
    pub answer: String,
    #[serde(default, deserialize_with = "reference_or_empty")]
    pub reference: Reference,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_binary: Option<String>,
}

// =============================================================================
// Conversation payload
// =============================================================================

/// A stored conversation as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationPayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: Vec<MessagePayload>,
    /// One entry per answered assistant message, in order.
    #[serde(default, deserialize_with = "lenient_references")]
    pub reference: Vec<Reference>,
}

/// One stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub doc_ids: Vec<String>,
    /// Set when the backend attaches citations to the message itself.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_reference"
    )]
    pub reference: Option<Reference>,
}

impl MessagePayload {
    /// Convert into a closed turn without citations.
    pub fn to_turn(&self) -> Turn {
        let mut turn = Turn::new(self.role, self.content.clone());
        if let Some(ref id) = self.id {
            turn.id = TurnId(id.clone());
        }
        turn.document_ids = self.doc_ids.clone();
        turn.status = TurnStatus::Complete;
        turn
    }
}

// =============================================================================
// Lenient deserializers
// =============================================================================

/// Accept a string or a number; anything else reads as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_u64()).unwrap_or(0))
}

/// Decode a list, skipping entries that do not fit `T`. A non-list reads as
/// empty.
fn lenient_entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Error frames send `reference: []` instead of an object.
fn reference_or_empty<'de, D>(deserializer: D) -> Result<Reference, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(v @ Value::Object(_)) => serde_json::from_value(v).unwrap_or_default(),
        _ => Reference::default(),
    })
}

/// A message-level reference that is not an object reads as absent.
fn lenient_reference<'de, D>(deserializer: D) -> Result<Option<Reference>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(v @ Value::Object(_)) => Some(serde_json::from_value(v).unwrap_or_default()),
        _ => None,
    })
}

/// Keep positions: a malformed entry becomes an empty reference so later
/// entries still line up with their messages.
fn lenient_references<'de, D>(deserializer: D) -> Result<Vec<Reference>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                v @ Value::Object(_) => serde_json::from_value(v).unwrap_or_default(),
                _ => Reference::default(),
            })
            .collect(),
        _ => Vec::new(),
    })
}
