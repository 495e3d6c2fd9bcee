//! Incremental decoder for the completion event stream.
//!
//! Network chunks do not respect event boundaries, so text is buffered until
//! a blank line closes an event. Each event's `data:` lines are joined and
//! parsed as a [`CompletionFrame`]. Events that are not valid JSON are
//! skipped.

use tracing::warn;

use crate::payload::CompletionFrame;

const DATA_PREFIX: &str = "data:";

/// Buffers raw stream text and yields complete frames in arrival order.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    skipped: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of stream text; returns the frames it completed.
    pub fn push(&mut self, text: &str) -> Vec<CompletionFrame> {
        self.buffer.push_str(text);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = self.decode_event(&event) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Decode whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<CompletionFrame> {
        let rest = std::mem::take(&mut self.buffer);
        self.decode_event(&rest).into_iter().collect()
    }

    /// Number of events dropped because they did not parse.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Clear buffered text and counters before a new exchange.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.skipped = 0;
    }

    fn decode_event(&mut self, event: &str) -> Option<CompletionFrame> {
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix(DATA_PREFIX))
            .map(|value| value.strip_prefix(' ').unwrap_or(value))
            .collect();
        if data.is_empty() {
            return None;
        }

        let payload = data.join("\n");
        if payload.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<CompletionFrame>(payload.trim()) {
            Ok(frame) => Some(frame),
            Err(e) => {
                self.skipped += 1;
                warn!(error = %e, "Skipping unparsable stream event");
                None
            }
        }
    }
}
