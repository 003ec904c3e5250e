use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::GeminiLiveClientBuilder;
use super::{Backend, GEMINI_AUDIO_CHANNELS_ACCEPTED_INPUT, GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT};
use crate::error::LiveError;
use crate::session::{MediaChunk, MediaKind, MediaSink};
use crate::types::{
    BidiGenerateContentClientContent, BidiGenerateContentRealtimeInput, Blob,
    ClientMessagePayload, Content, Part, Role,
};

/// Handle to an open Live API session. Clones share the same session.
#[derive(Clone)]
pub struct GeminiLiveClient {
    pub(crate) shutdown_tx: Arc<TokioMutex<Option<oneshot::Sender<()>>>>,
    pub(crate) outgoing_sender: mpsc::Sender<ClientMessagePayload>,
}

impl GeminiLiveClient {
    pub fn builder(backend: Backend, model: impl Into<String>) -> GeminiLiveClientBuilder {
        GeminiLiveClientBuilder::new(backend, model)
    }

    pub async fn close(&self) -> Result<(), LiveError> {
        info!("[ClientHandle] Close requested.");
        let mut shutdown_tx_guard = self.shutdown_tx.lock().await;
        if let Some(tx) = shutdown_tx_guard.take() {
            if tx.send(()).is_err() {
                debug!("[ClientHandle] Listen task already gone.");
            } else {
                debug!("[ClientHandle] Shutdown signal sent to listen task.");
            }
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.outgoing_sender.is_closed()
    }

    async fn send_message(&self, payload: ClientMessagePayload) -> Result<(), LiveError> {
        self.outgoing_sender.send(payload).await.map_err(|e| {
            error!(
                "[ClientHandle] Failed to send message to listen task: Channel closed. Error: {}",
                e
            );
            LiveError::ConnectionClosed
        })
    }

    pub async fn send_text_turn(&self, text: String, end_of_turn: bool) -> Result<(), LiveError> {
        let content = Content {
            parts: vec![Part {
                text: Some(text),
                ..Default::default()
            }],
            role: Some(Role::User),
        };
        let client_content_msg = BidiGenerateContentClientContent {
            turns: Some(vec![content]),
            turn_complete: Some(end_of_turn),
        };
        self.send_message(ClientMessagePayload::ClientContent(client_content_msg))
            .await
    }

    /// Sends already-encoded media bytes as realtime input.
    pub async fn send_media(&self, chunk: MediaChunk) -> Result<(), LiveError> {
        if chunk.data.is_empty() {
            return Ok(());
        }
        let blob = Blob {
            mime_type: chunk.mime_type,
            data: base64::engine::general_purpose::STANDARD.encode(&chunk.data),
        };
        let realtime_input = match chunk.kind {
            MediaKind::Audio => BidiGenerateContentRealtimeInput {
                audio: Some(blob),
                ..Default::default()
            },
            MediaKind::Video => BidiGenerateContentRealtimeInput {
                video: Some(blob),
                ..Default::default()
            },
        };
        self.send_message(ClientMessagePayload::RealtimeInput(realtime_input))
            .await
    }

    /// Sends 16kHz mono samples. Other formats are rejected.
    pub async fn send_audio_chunk(
        &self,
        audio_samples_i16: &[i16],
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), LiveError> {
        if audio_samples_i16.is_empty() {
            return Ok(());
        }
        check_audio_format(sample_rate, channels)?;
        self.send_media(MediaChunk::audio(pcm_bytes(audio_samples_i16), sample_rate))
            .await
    }

    pub async fn send_audio_stream_end(&self) -> Result<(), LiveError> {
        info!("[ClientHandle] Sending audio stream end signal.");
        let end_stream_msg = BidiGenerateContentRealtimeInput {
            audio_stream_end: Some(true),
            ..Default::default()
        };
        self.send_message(ClientMessagePayload::RealtimeInput(end_stream_msg))
            .await
    }
}

#[async_trait]
impl MediaSink for GeminiLiveClient {
    async fn send_realtime(&self, chunk: MediaChunk) -> Result<(), LiveError> {
        self.send_media(chunk).await
    }

    async fn send_text(&self, text: String) -> Result<(), LiveError> {
        self.send_text_turn(text, true).await
    }

    async fn end_audio_stream(&self) -> Result<(), LiveError> {
        self.send_audio_stream_end().await
    }

    async fn close(&self) {
        let _ = GeminiLiveClient::close(self).await;
    }
}

fn check_audio_format(sample_rate: u32, channels: u16) -> Result<(), LiveError> {
    if sample_rate == GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT
        && channels == GEMINI_AUDIO_CHANNELS_ACCEPTED_INPUT
    {
        return Ok(());
    }
    let error_msg = format!(
        "Audio input ({}Hz {}ch) must be {}Hz mono.",
        sample_rate, channels, GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT
    );
    warn!("[ClientHandle] {}", error_msg);
    Err(LiveError::ApiError(error_msg))
}

fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut byte_data = Vec::with_capacity(samples.len() * 2);
    for sample_val in samples {
        byte_data.extend_from_slice(&sample_val.to_le_bytes());
    }
    byte_data
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detached_client() -> (GeminiLiveClient, mpsc::Receiver<ClientMessagePayload>) {
        let (outgoing_sender, outgoing_rx) = mpsc::channel(8);
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        (
            GeminiLiveClient {
                shutdown_tx: Arc::new(TokioMutex::new(Some(shutdown_tx))),
                outgoing_sender,
            },
            outgoing_rx,
        )
    }

    #[test]
    fn pcm_is_little_endian() {
        assert_eq!(pcm_bytes(&[1, -2]), vec![0x01, 0x00, 0xfe, 0xff]);
    }

    #[test]
    fn only_16k_mono_is_accepted() {
        assert!(check_audio_format(16000, 1).is_ok());
        assert!(check_audio_format(48000, 1).is_err());
        assert!(check_audio_format(16000, 2).is_err());
    }

    #[tokio::test]
    async fn video_chunks_go_out_as_realtime_video() {
        let (client, mut rx) = detached_client();
        client
            .send_realtime(MediaChunk::jpeg(vec![0xff, 0xd8, 0xff]))
            .await
            .unwrap();

        let sent = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            sent,
            json!({"realtimeInput": {"video": {"mimeType": "image/jpeg", "data": "/9j/"}}})
        );
    }

    #[tokio::test]
    async fn audio_samples_are_encoded_as_pcm() {
        let (client, mut rx) = detached_client();
        client.send_audio_chunk(&[1, 2], 16000, 1).await.unwrap();

        let sent = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            sent["realtimeInput"]["audio"]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert_eq!(sent["realtimeInput"]["audio"]["data"], "AQACAA==");
    }

    #[tokio::test]
    async fn text_is_sent_as_a_complete_user_turn() {
        let (client, mut rx) = detached_client();
        client.send_text("where is my order?".into()).await.unwrap();
        let sent = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            sent,
            json!({"clientContent": {
                "turns": [{"parts": [{"text": "where is my order?"}], "role": "user"}],
                "turnComplete": true
            }})
        );
    }

    #[tokio::test]
    async fn end_of_stream_is_flagged() {
        let (client, mut rx) = detached_client();
        client.end_audio_stream().await.unwrap();
        let sent = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert_eq!(sent, json!({"realtimeInput": {"audioStreamEnd": true}}));
    }

    #[tokio::test]
    async fn sending_after_listener_exit_fails() {
        let (client, rx) = detached_client();
        drop(rx);
        assert!(client.is_closed());
        let err = client.send_text("hello".into()).await.unwrap_err();
        assert!(matches!(err, LiveError::ConnectionClosed));
    }
}
