//! Protocol-neutral view of a bidirectional model session.
//!
//! The relay only needs two capabilities from a streaming model: push
//! realtime media in, and pull response events out. [`SessionFactory`] opens
//! one session per browser connection and hands back both halves.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LiveError;
use crate::types::UsageMetadata;

/// MIME type for JPEG video frames.
pub const VIDEO_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Raw media bytes on their way into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    pub kind: MediaKind,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl MediaChunk {
    /// 16-bit little-endian PCM at `sample_rate`.
    pub fn audio(data: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            kind: MediaKind::Audio,
            mime_type: format!("audio/pcm;rate={}", sample_rate),
            data,
        }
    }

    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            kind: MediaKind::Video,
            mime_type: VIDEO_MIME_TYPE.to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptSource {
    /// What the user said.
    Input,
    /// What the model said.
    Output,
}

/// One thing a model session reported, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Decoded model audio.
    Audio(Vec<u8>),
    /// Model text. `partial` chunks stream the answer; a non-partial chunk
    /// consolidates what was already streamed.
    Text { text: String, partial: bool },
    Transcript {
        source: TranscriptSource,
        text: String,
    },
    Interrupted,
    TurnComplete,
    /// A handle the client can use to resume this session later.
    SessionHandle(String),
    GoAway { time_left: Option<String> },
    Usage(UsageMetadata),
}

/// Sending half of a session.
#[async_trait]
pub trait MediaSink: Clone + Send + Sync + 'static {
    async fn send_realtime(&self, chunk: MediaChunk) -> Result<(), LiveError>;

    async fn send_text(&self, text: String) -> Result<(), LiveError>;

    /// The client stopped streaming audio for now.
    async fn end_audio_stream(&self) -> Result<(), LiveError>;

    async fn close(&self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub client_id: u64,
    pub resume_handle: Option<String>,
}

/// An open session: a sink for input and the ordered event stream.
pub struct LiveSession<K: MediaSink> {
    pub sink: K,
    pub events: mpsc::Receiver<SessionEvent>,
}

#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Sink: MediaSink;

    async fn open(&self, options: SessionOptions) -> Result<LiveSession<Self::Sink>, LiveError>;
}
