//! Conversation store.
//!
//! Owns the ordered turns of one chat session. The trailing assistant turn
//! may be open while an answer streams in; it is the only turn whose
//! content ever changes after insertion.

use docchat_core::config::ChatConfig;
use docchat_core::types::{ConversationId, DocumentRef, Role, Turn, TurnId, TurnStatus};
use tracing::debug;

use crate::error::ChatError;
use crate::payload::ConversationPayload;
use crate::references::ReferenceResolver;

/// Ordered list of turns with at most one open assistant turn at the end.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    conversation_id: Option<ConversationId>,
    turns: Vec<Turn>,
    max_message_length: usize,
}

impl ConversationStore {
    /// Create an empty store accepting user messages up to
    /// `max_message_length` characters.
    pub fn new(max_message_length: usize) -> Self {
        Self {
            conversation_id: None,
            turns: Vec::new(),
            max_message_length,
        }
    }

    /// Create a store from chat settings, seeding the prologue if one is set.
    pub fn from_config(config: &ChatConfig) -> Self {
        let store = Self::new(config.max_message_length);
        match config.prologue.as_deref() {
            Some(prologue) if !prologue.trim().is_empty() => store.with_prologue(prologue),
            _ => store,
        }
    }

    /// Seed an assistant greeting as the first turn.
    pub fn with_prologue(mut self, prologue: &str) -> Self {
        self.turns.insert(0, Turn::new(Role::Assistant, prologue));
        self
    }

    /// Attach the server-issued session identifier.
    pub fn with_conversation_id(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }

    /// Rebuild a store from turns fetched from the backend.
    ///
    /// Fails if an open turn is anywhere but last, or is not an assistant
    /// turn, or if two turns share an id.
    pub fn from_turns(
        turns: Vec<Turn>,
        max_message_length: usize,
    ) -> Result<Self, ChatError> {
        let last = turns.len().saturating_sub(1);
        for (i, turn) in turns.iter().enumerate() {
            if turn.is_open() && (i != last || turn.role != Role::Assistant) {
                return Err(ChatError::InvariantViolation(format!(
                    "open turn {} is not the trailing assistant turn",
                    turn.id
                )));
            }
            if turns[..i].iter().any(|prev| prev.id == turn.id) {
                return Err(ChatError::InvariantViolation(format!(
                    "duplicate turn id {}",
                    turn.id
                )));
            }
        }
        Ok(Self {
            conversation_id: None,
            turns,
            max_message_length,
        })
    }

    /// Rebuild a store from a conversation fetched from the backend, binding
    /// each answer to its resolved citations.
    pub fn from_payload(
        payload: &ConversationPayload,
        resolver: &ReferenceResolver,
        max_message_length: usize,
    ) -> Result<Self, ChatError> {
        let references = resolver.resolve_conversation(payload);
        let turns = payload
            .message
            .iter()
            .zip(references)
            .map(|(message, references)| {
                let mut turn = message.to_turn();
                turn.references = references;
                turn
            })
            .collect();

        let mut store = Self::from_turns(turns, max_message_length)?;
        if !payload.id.is_empty() {
            store.conversation_id = Some(ConversationId(payload.id.clone()));
        }
        debug!(turns = store.len(), "Conversation hydrated");
        Ok(store)
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    pub fn set_conversation_id(&mut self, id: ConversationId) {
        self.conversation_id = Some(id);
    }

    // -- Reads --

    /// Current turns in chronological order.
    pub fn snapshot(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The assistant turn currently receiving content, if any.
    pub fn open_turn(&self) -> Option<&Turn> {
        self.turns.last().filter(|t| t.is_open())
    }

    pub fn is_streaming(&self) -> bool {
        self.open_turn().is_some()
    }

    /// True until the user sends a first message. Drives the display of
    /// predefined prompts.
    pub fn awaiting_first_message(&self) -> bool {
        !self.turns.iter().any(|t| t.role == Role::User)
    }

    /// Prompts to offer given the current state: all of them before the first
    /// user message, none afterwards.
    pub fn visible_prompts<'a>(&self, prompts: &'a [String]) -> &'a [String] {
        if self.awaiting_first_message() {
            prompts
        } else {
            &[]
        }
    }

    // -- Mutations --

    /// Append a user turn.
    pub fn add_user_turn(&mut self, content: &str) -> Result<&Turn, ChatError> {
        self.add_user_turn_with_documents(content, Vec::new())
    }

    /// Append a user turn carrying the ids of documents uploaded with it.
    pub fn add_user_turn_with_documents(
        &mut self,
        content: &str,
        document_ids: Vec<String>,
    ) -> Result<&Turn, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidInput);
        }
        if content.chars().count() > self.max_message_length {
            return Err(ChatError::MessageTooLong(self.max_message_length));
        }
        if let Some(open) = self.open_turn() {
            return Err(ChatError::InvariantViolation(format!(
                "cannot add a user turn while {} is open",
                open.id
            )));
        }

        let mut turn = Turn::new(Role::User, content);
        turn.document_ids = document_ids;
        debug!(turn_id = %turn.id, "User turn added");
        Ok(self.push(turn))
    }

    /// Append an empty assistant turn and mark it open.
    pub fn begin_assistant_turn(&mut self) -> Result<&Turn, ChatError> {
        if let Some(open) = self.open_turn() {
            return Err(ChatError::InvariantViolation(format!(
                "assistant turn {} is already open",
                open.id
            )));
        }

        let mut turn = Turn::new(Role::Assistant, String::new());
        turn.status = TurnStatus::Open;
        debug!(turn_id = %turn.id, "Assistant turn opened");
        Ok(self.push(turn))
    }

    /// Concatenate `delta` onto the open turn.
    pub fn append_to_open_turn(&mut self, delta: &str) -> Result<(), ChatError> {
        self.open_turn_mut()?.content.push_str(delta);
        Ok(())
    }

    /// Overwrite the open turn's content.
    pub fn replace_open_turn_content(&mut self, content: &str) -> Result<(), ChatError> {
        let turn = self.open_turn_mut()?;
        turn.content.clear();
        turn.content.push_str(content);
        Ok(())
    }

    /// Adopt a server-issued id for the open turn.
    pub fn assign_open_turn_id(&mut self, id: TurnId) -> Result<(), ChatError> {
        let open_index = match self.turns.last() {
            Some(last) if last.is_open() => self.turns.len() - 1,
            _ => return Err(ChatError::NoOpenTurn),
        };
        if self.turns[open_index].id == id {
            return Ok(());
        }
        if self.turns[..open_index].iter().any(|t| t.id == id) {
            return Err(ChatError::InvariantViolation(format!(
                "turn id {} is already in use",
                id
            )));
        }
        self.turns[open_index].id = id;
        Ok(())
    }

    /// Close the open turn and attach its citations.
    pub fn close_open_turn(&mut self, references: Vec<DocumentRef>) -> Result<&Turn, ChatError> {
        self.close_with(references, TurnStatus::Complete)
    }

    /// Close the open turn with whatever content it has, annotated with
    /// `reason`.
    pub fn close_open_turn_with_error(
        &mut self,
        references: Vec<DocumentRef>,
        reason: impl Into<String>,
    ) -> Result<&Turn, ChatError> {
        self.close_with(
            references,
            TurnStatus::Failed {
                reason: reason.into(),
            },
        )
    }

    /// Remove the most recent turn, open or not. No-op on an empty store.
    pub fn rollback_latest(&mut self) -> Option<Turn> {
        let removed = self.turns.pop();
        if let Some(ref turn) = removed {
            debug!(turn_id = %turn.id, role = ?turn.role, "Turn rolled back");
        }
        removed
    }

    // -- Private helpers --

    fn push(&mut self, turn: Turn) -> &Turn {
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    fn open_turn_mut(&mut self) -> Result<&mut Turn, ChatError> {
        self.turns
            .last_mut()
            .filter(|t| t.is_open())
            .ok_or(ChatError::NoOpenTurn)
    }

    fn close_with(
        &mut self,
        references: Vec<DocumentRef>,
        status: TurnStatus,
    ) -> Result<&Turn, ChatError> {
        let turn = self.open_turn_mut()?;
        turn.references = references;
        turn.status = status;
        debug!(
            turn_id = %turn.id,
            references = turn.references.len(),
            failed = turn.is_failed(),
            "Assistant turn closed"
        );
        Ok(&*turn)
    }
}

// =============================================================================
// Tests
// =============================================================================
