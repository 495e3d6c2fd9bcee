//! Conversation controller for a document-grounded chat client.
//!
//! Keeps the ordered turns of a session consistent while answers stream in,
//! and binds each answer to the documents it cites.

pub mod driver;
pub mod error;
pub mod payload;
pub mod references;
pub mod sse;
pub mod store;

pub use driver::{ExchangeOutcome, Progress, StreamDriver, TransportEvent};
pub use error::ChatError;
pub use payload::{
    AnswerData, CompletionFrame, ConversationPayload, EvidenceChunk, FrameData, MessagePayload,
    Reference, ReferenceAggregate,
};
pub use references::{Citation, DocumentFilter, KeepAll, NameExclusion, ReferenceResolver};
pub use sse::SseDecoder;
pub use store::ConversationStore;
