//! Per-turn bookkeeping for the response reader.

use std::collections::HashSet;

use tracing::{debug, info};

use super::envelope::ServerEnvelope;
use crate::session::{SessionEvent, TranscriptSource};

/// Tracks one conversation turn and turns session events into envelopes.
///
/// An interruption is reported once per turn and swallows that turn's
/// `turn_complete`. Non-partial text is dropped when partial text for the
/// same turn was already streamed.
#[derive(Debug, Default)]
pub struct TurnState {
    interrupted: bool,
    streamed_text: bool,
    input_texts: Vec<String>,
    output_texts: Vec<String>,
    session_handle: Option<String>,
}

impl TurnState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn session_handle(&self) -> Option<&str> {
        self.session_handle.as_deref()
    }

    pub fn apply(&mut self, event: SessionEvent) -> Vec<ServerEnvelope> {
        match event {
            SessionEvent::Audio(bytes) => vec![ServerEnvelope::audio(&bytes)],
            SessionEvent::Text {
                text,
                partial: true,
            } => {
                self.streamed_text = true;
                self.forward_output(text)
            }
            SessionEvent::Text {
                text,
                partial: false,
            } => {
                if self.streamed_text {
                    debug!("Skipping consolidated text already streamed this turn");
                    Vec::new()
                } else {
                    self.forward_output(text)
                }
            }
            SessionEvent::Transcript {
                source: TranscriptSource::Output,
                text,
            } => self.forward_output(text),
            SessionEvent::Transcript {
                source: TranscriptSource::Input,
                text,
            } => {
                self.input_texts.push(text);
                Vec::new()
            }
            SessionEvent::Interrupted => {
                if self.interrupted {
                    return Vec::new();
                }
                info!("Interruption detected");
                self.interrupted = true;
                vec![ServerEnvelope::interrupted()]
            }
            SessionEvent::TurnComplete => self.complete_turn(),
            SessionEvent::SessionHandle(handle) => {
                info!(handle = %handle, "New session handle");
                self.session_handle = Some(handle.clone());
                vec![ServerEnvelope::SessionId { data: handle }]
            }
            SessionEvent::GoAway { time_left } => {
                info!(time_left = ?time_left, "Session will terminate soon");
                Vec::new()
            }
            SessionEvent::Usage(usage) => {
                debug!(total_tokens = ?usage.total_token_count, "Usage update");
                Vec::new()
            }
        }
    }

    fn forward_output(&mut self, text: String) -> Vec<ServerEnvelope> {
        self.output_texts.push(text.clone());
        vec![ServerEnvelope::Text { data: text }]
    }

    fn complete_turn(&mut self) -> Vec<ServerEnvelope> {
        let mut out = Vec::new();
        if self.interrupted {
            debug!("Turn ended by interruption; not reporting turn_complete");
        } else {
            info!("Model turn complete");
            out.push(ServerEnvelope::TurnComplete {
                session_id: self.session_handle.clone(),
            });
        }

        if !self.input_texts.is_empty() {
            info!("Input transcription: {}", dedup_fragments(&self.input_texts).join(" "));
        }
        if !self.output_texts.is_empty() {
            info!("Output transcription: {}", dedup_fragments(&self.output_texts).join(" "));
        }

        self.interrupted = false;
        self.streamed_text = false;
        self.input_texts.clear();
        self.output_texts.clear();
        out
    }
}

/// Drops repeated fragments, keeping first-seen order.
pub fn dedup_fragments(fragments: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    fragments
        .iter()
        .map(String::as_str)
        .filter(|f| seen.insert(*f))
        .collect()
}
