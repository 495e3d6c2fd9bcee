//! Reference resolution.
//!
//! The backend reports citations in two shapes: an aggregate list per answer
//! and a list of evidence chunks. Both are normalized through [`Citation`]
//! into [`DocumentRef`]s, deduplicated by document id in first-seen order,
//! and passed through a display filter.

use std::collections::HashSet;

use docchat_core::config::{MatchMode, ReferenceConfig};
use docchat_core::types::{DocumentRef, Role};
use tracing::debug;

use crate::payload::{ConversationPayload, EvidenceChunk, Reference, ReferenceAggregate};

// =============================================================================
// Citation adapter
// =============================================================================

/// Anything that names a cited document.
pub trait Citation {
    fn doc_id(&self) -> Option<&str>;
    fn doc_name(&self) -> Option<&str>;

    /// Normalized citation, or `None` when the id or name is missing.
    fn to_document_ref(&self) -> Option<DocumentRef> {
        let id = self.doc_id().map(str::trim).filter(|s| !s.is_empty())?;
        let name = self.doc_name().map(str::trim).filter(|s| !s.is_empty())?;
        Some(DocumentRef::new(id, name))
    }
}

impl Citation for ReferenceAggregate {
    fn doc_id(&self) -> Option<&str> {
        self.doc_id.as_deref()
    }

    fn doc_name(&self) -> Option<&str> {
        self.doc_name.as_deref()
    }
}

impl Citation for EvidenceChunk {
    fn doc_id(&self) -> Option<&str> {
        self.doc_id.as_deref()
    }

    fn doc_name(&self) -> Option<&str> {
        [self.doc_name.as_deref(), self.docnm_kwd.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
    }
}

impl Citation for DocumentRef {
    fn doc_id(&self) -> Option<&str> {
        Some(self.doc_id.as_str())
    }

    fn doc_name(&self) -> Option<&str> {
        Some(self.doc_name.as_str())
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Decides whether a resolved citation is shown.
pub trait DocumentFilter: Send + Sync {
    fn keep(&self, doc: &DocumentRef) -> bool;
}

impl<F> DocumentFilter for F
where
    F: Fn(&DocumentRef) -> bool + Send + Sync,
{
    fn keep(&self, doc: &DocumentRef) -> bool {
        self(doc)
    }
}

/// Keeps every citation.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAll;

impl DocumentFilter for KeepAll {
    fn keep(&self, _doc: &DocumentRef) -> bool {
        true
    }
}

/// Hides documents whose name matches one of a configured list.
#[derive(Debug, Clone, Default)]
pub struct NameExclusion {
    names: Vec<String>,
    mode: MatchMode,
}

impl NameExclusion {
    pub fn new(names: Vec<String>, mode: MatchMode) -> Self {
        Self { names, mode }
    }

    fn matches(&self, doc_name: &str) -> bool {
        self.names.iter().any(|name| match self.mode {
            MatchMode::Exact => doc_name == name.as_str(),
            MatchMode::Substring => !name.is_empty() && doc_name.contains(name.as_str()),
        })
    }
}

impl DocumentFilter for NameExclusion {
    fn keep(&self, doc: &DocumentRef) -> bool {
        !self.matches(&doc.doc_name)
    }
}

// =============================================================================
// ReferenceResolver
// =============================================================================

/// Computes the citation list shown under each answer.
pub struct ReferenceResolver {
    filter: Box<dyn DocumentFilter>,
    skip_prologue: bool,
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        Self::new(KeepAll)
    }
}

impl ReferenceResolver {
    /// Create a resolver with a custom display filter.
    pub fn new(filter: impl DocumentFilter + 'static) -> Self {
        Self {
            filter: Box::new(filter),
            skip_prologue: true,
        }
    }

    /// Create a resolver applying the configured name exclusions.
    pub fn from_config(config: &ReferenceConfig) -> Self {
        let mut resolver = Self::new(NameExclusion::new(
            config.excluded_doc_names.clone(),
            config.match_mode,
        ));
        resolver.skip_prologue = config.skip_prologue;
        resolver
    }

    /// Set whether a leading assistant greeting is skipped when matching a
    /// conversation's reference list to its answers.
    pub fn with_skip_prologue(mut self, skip: bool) -> Self {
        self.skip_prologue = skip;
        self
    }

    /// Merge aggregates and chunks into one ordered, unique, filtered list.
    ///
    /// Aggregates come first, so they win when both shapes cite the same
    /// document. Entries without an id or a name are dropped.
    pub fn resolve<A, C>(&self, aggregates: &[A], chunks: &[C]) -> Vec<DocumentRef>
    where
        A: Citation,
        C: Citation,
    {
        let candidates = aggregates
            .iter()
            .map(|a| a.to_document_ref())
            .chain(chunks.iter().map(|c| c.to_document_ref()));

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        let mut malformed = 0usize;

        for candidate in candidates {
            let Some(doc) = candidate else {
                malformed += 1;
                continue;
            };
            if !seen.insert(doc.doc_id.clone()) {
                continue;
            }
            if self.filter.keep(&doc) {
                resolved.push(doc);
            }
        }

        if malformed > 0 {
            debug!(malformed, "Dropped citations without document id or name");
        }

        resolved
    }

    /// Resolve one wire reference object.
    pub fn resolve_reference(&self, reference: &Reference) -> Vec<DocumentRef> {
        self.resolve(&reference.doc_aggs, &reference.chunks)
    }

    /// Resolve citations for every message of a stored conversation.
    ///
    /// Returns one list per message. User messages get an empty list. An
    /// assistant message uses its own reference when present, otherwise the
    /// conversation-level entry at its position among answered assistant
    /// messages. A skipped greeting never takes a position.
    pub fn resolve_conversation(&self, payload: &ConversationPayload) -> Vec<Vec<DocumentRef>> {
        let mut answer_index = 0usize;
        let mut seen_user = false;
        let mut prologue_pending = self.skip_prologue;

        payload
            .message
            .iter()
            .map(|message| {
                if message.role == Role::User {
                    seen_user = true;
                    return Vec::new();
                }
                if prologue_pending && !seen_user {
                    // The greeting never takes a position in the list.
                    prologue_pending = false;
                    return message
                        .reference
                        .as_ref()
                        .map(|own| self.resolve_reference(own))
                        .unwrap_or_default();
                }
                let position = answer_index;
                answer_index += 1;
                match message.reference.as_ref() {
                    Some(own) => self.resolve_reference(own),
                    None => payload
                        .reference
                        .get(position)
                        .map(|r| self.resolve_reference(r))
                        .unwrap_or_default(),
                }
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
