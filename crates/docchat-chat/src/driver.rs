//! Stream driver: sequences one question/answer exchange against the store.
//!
//! `start` adds the user turn and opens the assistant turn, stream text is
//! fed through `handle_text`, and the exchange ends with `finish` (stream
//! closed normally) or `fail`/`abort` (transport error or cancellation).
//! A failure before any answer text rolls both turns back; a failure after
//! some text keeps the partial answer with an error annotation.

use docchat_core::config::{AnswerMode, DocchatConfig};
use docchat_core::types::{DocumentRef, TurnId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::payload::{CompletionFrame, FrameData, Reference};
use crate::references::ReferenceResolver;
use crate::sse::SseDecoder;
use crate::store::ConversationStore;

/// Event delivered by the transport, in network order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw stream text.
    Chunk(String),
    /// The connection failed.
    Failed(String),
}

/// Effect of the frames applied so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// No complete frame yet.
    Pending,
    /// Answer content or references were updated.
    Updated,
    /// The backend signalled the end of the answer.
    Done,
}

/// How an exchange ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// The answer streamed to completion.
    Completed {
        turn_id: TurnId,
        references: Vec<DocumentRef>,
    },
    /// The answer was cut short; the partial text is kept.
    Partial { turn_id: TurnId, reason: String },
    /// Nothing was received; the user and assistant turns were removed.
    RolledBack { reason: String },
}

/// Per-exchange bookkeeping.
#[derive(Debug, Default)]
struct Exchange {
    received_content: bool,
    reference: Reference,
}

/// Applies a backend completion stream to a [`ConversationStore`].
pub struct StreamDriver {
    resolver: ReferenceResolver,
    answer_mode: AnswerMode,
    error_marker: String,
    decoder: SseDecoder,
    exchange: Option<Exchange>,
}

impl StreamDriver {
    pub fn new(resolver: ReferenceResolver, answer_mode: AnswerMode) -> Self {
        Self {
            resolver,
            answer_mode,
            error_marker: String::new(),
            decoder: SseDecoder::new(),
            exchange: None,
        }
    }

    /// Build a driver from configuration.
    pub fn from_config(config: &DocchatConfig) -> Self {
        Self::new(
            ReferenceResolver::from_config(&config.references),
            config.stream.answer_mode,
        )
        .with_error_marker(config.chat.error_marker.clone())
    }

    /// Prefix for the reason recorded on a partially streamed answer.
    pub fn with_error_marker(mut self, marker: impl Into<String>) -> Self {
        self.error_marker = marker.into();
        self
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    /// Whether an exchange is in progress.
    pub fn is_active(&self) -> bool {
        self.exchange.is_some()
    }

    /// Add the user turn and open the assistant turn.
    ///
    /// Returns the id of the opened assistant turn. Nothing is added when
    /// the message is rejected.
    pub fn start(
        &mut self,
        store: &mut ConversationStore,
        content: &str,
        document_ids: Vec<String>,
    ) -> Result<TurnId, ChatError> {
        if self.exchange.is_some() {
            return Err(ChatError::InvariantViolation(
                "an exchange is already in progress".to_string(),
            ));
        }

        store.add_user_turn_with_documents(content, document_ids)?;
        let turn_id = match store.begin_assistant_turn() {
            Ok(turn) => turn.id.clone(),
            Err(e) => {
                store.rollback_latest();
                return Err(e);
            }
        };

        self.decoder.reset();
        self.exchange = Some(Exchange::default());
        debug!(turn_id = %turn_id, "Exchange started");
        Ok(turn_id)
    }

    /// Feed raw stream text.
    ///
    /// A frame with a non-zero `retcode` yields [`ChatError::Backend`]; the
    /// caller then ends the exchange with [`StreamDriver::fail`].
    pub fn handle_text(
        &mut self,
        store: &mut ConversationStore,
        text: &str,
    ) -> Result<Progress, ChatError> {
        self.ensure_active()?;
        let frames = self.decoder.push(text);
        self.apply_frames(store, frames)
    }

    /// Apply one decoded frame.
    pub fn handle_frame(
        &mut self,
        store: &mut ConversationStore,
        frame: CompletionFrame,
    ) -> Result<Progress, ChatError> {
        if frame.is_error() {
            return Err(ChatError::Backend {
                retcode: frame.retcode,
                message: frame.retmsg,
            });
        }

        let answer = match frame.data {
            Some(FrameData::Answer(answer)) => answer,
            Some(FrameData::Flag(_)) | None => return Ok(Progress::Done),
        };

        let answer_mode = self.answer_mode;
        let exchange = self.exchange.as_mut().ok_or(ChatError::NoOpenTurn)?;

        if let Some(id) = answer.id.filter(|id| !id.is_empty()) {
            store.assign_open_turn_id(TurnId(id))?;
        }

        match answer_mode {
            AnswerMode::Delta => store.append_to_open_turn(&answer.answer)?,
            AnswerMode::Cumulative => {
                let current_len = store.open_turn().map(|t| t.content.len()).unwrap_or(0);
                let extends = store
                    .open_turn()
                    .is_some_and(|t| answer.answer.starts_with(t.content.as_str()));
                if extends {
                    store.append_to_open_turn(&answer.answer[current_len..])?;
                } else {
                    debug!("Cumulative answer diverged from streamed text, replacing");
                    store.replace_open_turn_content(&answer.answer)?;
                }
            }
        }
        if !answer.answer.is_empty() {
            exchange.received_content = true;
        }

        if !answer.reference.is_empty() {
            exchange.reference = answer.reference;
        }

        Ok(Progress::Updated)
    }

    /// Close the exchange after the stream ended normally.
    pub fn finish(&mut self, store: &mut ConversationStore) -> Result<ExchangeOutcome, ChatError> {
        self.ensure_active()?;
        let trailing = self.decoder.finish();
        if self.decoder.skipped() > 0 {
            warn!(skipped = self.decoder.skipped(), "Stream contained unparsable events");
        }
        if let Err(e) = self.apply_frames(store, trailing) {
            return match e {
                ChatError::Backend { .. } => self.fail(store, &e.to_string()),
                other => Err(self.abandon(store, other)),
            };
        }

        let exchange = self.exchange.take().unwrap_or_default();
        let references = self.resolver.resolve_reference(&exchange.reference);
        let turn = store.close_open_turn(references.clone())?;
        info!(
            turn_id = %turn.id,
            chars = turn.content.len(),
            references = references.len(),
            "Exchange completed"
        );
        Ok(ExchangeOutcome::Completed {
            turn_id: turn.id.clone(),
            references,
        })
    }

    /// End the exchange after a transport or backend failure.
    pub fn fail(
        &mut self,
        store: &mut ConversationStore,
        reason: &str,
    ) -> Result<ExchangeOutcome, ChatError> {
        let exchange = self.exchange.take().ok_or(ChatError::NoOpenTurn)?;
        self.decoder.reset();

        if store.open_turn().is_none() {
            return Err(ChatError::NoOpenTurn);
        }

        if exchange.received_content {
            let references = self.resolver.resolve_reference(&exchange.reference);
            let annotated = if self.error_marker.is_empty() {
                reason.to_string()
            } else {
                format!("{}: {}", self.error_marker, reason)
            };
            let turn = store.close_open_turn_with_error(references, annotated.clone())?;
            warn!(turn_id = %turn.id, reason, "Exchange failed mid-stream, keeping partial answer");
            Ok(ExchangeOutcome::Partial {
                turn_id: turn.id.clone(),
                reason: annotated,
            })
        } else {
            store.rollback_latest();
            store.rollback_latest();
            warn!(reason, "Exchange failed before any answer, rolled back");
            Ok(ExchangeOutcome::RolledBack {
                reason: reason.to_string(),
            })
        }
    }

    /// Cancel the exchange at the caller's request.
    pub fn abort(&mut self, store: &mut ConversationStore) -> Result<ExchangeOutcome, ChatError> {
        self.fail(store, "cancelled")
    }

    /// Run a full exchange over a transport channel.
    ///
    /// The exchange finishes when the channel closes. Backend error frames
    /// and transport failures end it through [`StreamDriver::fail`]. Any
    /// other error also ends the exchange before it is returned, so the
    /// driver is ready for the next question.
    pub async fn drive(
        &mut self,
        store: &mut ConversationStore,
        content: &str,
        document_ids: Vec<String>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) -> Result<ExchangeOutcome, ChatError> {
        self.start(store, content, document_ids)?;

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Chunk(text) => match self.handle_text(store, &text) {
                    Ok(Progress::Done) => break,
                    Ok(_) => {}
                    Err(e @ ChatError::Backend { .. }) => {
                        return self.fail(store, &e.to_string());
                    }
                    Err(e) => return Err(self.abandon(store, e)),
                },
                TransportEvent::Failed(reason) => return self.fail(store, &reason),
            }
        }

        self.finish(store)
    }

    // -- Private helpers --

    /// End the exchange after an error the stream cannot recover from and
    /// hand the error back.
    fn abandon(&mut self, store: &mut ConversationStore, err: ChatError) -> ChatError {
        match self.fail(store, &err.to_string()) {
            Ok(outcome) => debug!(?outcome, "Exchange abandoned"),
            Err(cleanup) => warn!(error = %cleanup, "Could not end abandoned exchange"),
        }
        err
    }

    fn ensure_active(&self) -> Result<(), ChatError> {
        if self.exchange.is_some() {
            Ok(())
        } else {
            Err(ChatError::NoOpenTurn)
        }
    }

    fn apply_frames(
        &mut self,
        store: &mut ConversationStore,
        frames: Vec<CompletionFrame>,
    ) -> Result<Progress, ChatError> {
        let mut progress = Progress::Pending;
        for frame in frames {
            match self.handle_frame(store, frame)? {
                Progress::Done => progress = Progress::Done,
                Progress::Updated if progress != Progress::Done => progress = Progress::Updated,
                _ => {}
            }
        }
        Ok(progress)
    }
}

// =============================================================================
// Tests
// =============================================================================
