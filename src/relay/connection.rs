//! Per-connection relay between one browser socket and one model session.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use super::envelope::{self, ClientEnvelope, ServerEnvelope, VideoMode};
use super::turn::TurnState;
use crate::client::GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT;
use crate::error::LiveError;
use crate::session::{LiveSession, MediaChunk, MediaSink, SessionEvent, SessionFactory, SessionOptions};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Sample rate stamped on audio forwarded to the session.
    pub send_sample_rate: u32,
    /// Capacity of each per-connection media queue.
    pub queue_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            send_sample_rate: GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Audio queue entries. End-of-stream rides the same queue so it is never
/// delivered ahead of audio that was received before it.
#[derive(Debug)]
enum AudioItem {
    Chunk(Vec<u8>),
    End,
}

/// Relays one browser connection until either side goes away.
///
/// `ready` is always the first frame written. The session is opened after
/// that; if opening fails the socket is closed and the error returned.
/// Inbound reading, audio forwarding, video forwarding and response relaying
/// then run concurrently, and the first of them to finish ends the rest.
pub async fn handle_connection<S, F>(
    ws: WebSocketStream<S>,
    options: SessionOptions,
    factory: &F,
    settings: &RelaySettings,
) -> Result<(), LiveError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    F: SessionFactory,
{
    let client = options.client_id;
    let (mut ws_sink, mut ws_source) = ws.split();

    send_envelope(&mut ws_sink, &ServerEnvelope::Ready).await?;

    let LiveSession { sink, mut events } = match factory.open(options).await {
        Ok(session) => session,
        Err(e) => {
            let _ = ws_sink.send(Message::Close(None)).await;
            return Err(e);
        }
    };
    info!(client, "Live session established");

    let capacity = settings.queue_capacity.max(1);
    let (audio_tx, audio_rx) = mpsc::channel::<AudioItem>(capacity);
    let (video_tx, video_rx) = mpsc::channel::<(Vec<u8>, VideoMode)>(capacity);

    let result = tokio::select! {
        r = read_inbound(&mut ws_source, &audio_tx, &video_tx, &sink, client) => {
            debug!(client, "Inbound reader finished");
            r
        }
        r = forward_audio(audio_rx, &sink, settings.send_sample_rate) => {
            debug!(client, "Audio forwarder finished");
            r
        }
        r = forward_video(video_rx, &sink) => {
            debug!(client, "Video forwarder finished");
            r
        }
        r = relay_responses(&mut events, &mut ws_sink, client) => {
            debug!(client, "Response reader finished");
            r
        }
    };

    sink.close().await;
    if let Err(e) = ws_sink.send(Message::Close(None)).await {
        debug!(client, error = %e, "Socket already closed");
    }
    result
}

async fn send_envelope<W>(ws_sink: &mut W, envelope: &ServerEnvelope) -> Result<(), LiveError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    ws_sink.send(Message::Text(envelope.to_json()?.into())).await?;
    Ok(())
}

async fn read_inbound<R, K>(
    ws_source: &mut R,
    audio_tx: &mpsc::Sender<AudioItem>,
    video_tx: &mpsc::Sender<(Vec<u8>, VideoMode)>,
    sink: &K,
    client: u64,
) -> Result<(), LiveError>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    K: MediaSink,
{
    while let Some(frame) = ws_source.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(frame) => {
                info!(client, close_frame = ?frame, "Client closed the socket");
                return Ok(());
            }
            Message::Binary(bytes) => {
                debug!(client, len = bytes.len(), "Ignoring binary frame");
                continue;
            }
            _ => continue,
        };

        let envelope = match ClientEnvelope::parse(text.as_str()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(client, error = %e, "Dropping malformed client frame");
                continue;
            }
        };

        match envelope {
            ClientEnvelope::Audio { data } => match envelope::decode(&data) {
                Ok(bytes) => audio_tx
                    .send(AudioItem::Chunk(bytes))
                    .await
                    .map_err(|_| LiveError::SendError)?,
                Err(e) => warn!(client, error = %e, "Dropping audio with bad base64"),
            },
            ClientEnvelope::Video { data, mode } => match envelope::decode(&data) {
                Ok(bytes) => video_tx
                    .send((bytes, mode))
                    .await
                    .map_err(|_| LiveError::SendError)?,
                Err(e) => warn!(client, error = %e, "Dropping video frame with bad base64"),
            },
            ClientEnvelope::Text { data } => {
                debug!(client, text = %data, "Forwarding client text");
                sink.send_text(data).await?;
            }
            ClientEnvelope::End => {
                info!(client, "Client ended its audio turn");
                audio_tx
                    .send(AudioItem::End)
                    .await
                    .map_err(|_| LiveError::SendError)?;
            }
        }
    }
    info!(client, "Client stream ended");
    Ok(())
}

async fn forward_audio<K: MediaSink>(
    mut audio_rx: mpsc::Receiver<AudioItem>,
    sink: &K,
    sample_rate: u32,
) -> Result<(), LiveError> {
    while let Some(item) = audio_rx.recv().await {
        match item {
            AudioItem::Chunk(bytes) => sink.send_realtime(MediaChunk::audio(bytes, sample_rate)).await?,
            AudioItem::End => sink.end_audio_stream().await?,
        }
    }
    Ok(())
}

async fn forward_video<K: MediaSink>(
    mut video_rx: mpsc::Receiver<(Vec<u8>, VideoMode)>,
    sink: &K,
) -> Result<(), LiveError> {
    while let Some((bytes, mode)) = video_rx.recv().await {
        debug!(mode = ?mode, len = bytes.len(), "Forwarding video frame");
        sink.send_realtime(MediaChunk::jpeg(bytes)).await?;
    }
    Ok(())
}

async fn relay_responses<W>(
    events: &mut mpsc::Receiver<SessionEvent>,
    ws_sink: &mut W,
    client: u64,
) -> Result<(), LiveError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut turn = TurnState::new();
    while let Some(event) = events.recv().await {
        for envelope in turn.apply(event) {
            send_envelope(ws_sink, &envelope).await?;
        }
    }
    info!(client, "Model session stream ended");
    Ok(())
}
