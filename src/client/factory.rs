use async_trait::async_trait;
use tracing::info;

use super::{Backend, GeminiLiveClient, GeminiLiveClientBuilder};
use crate::error::LiveError;
use crate::session::{LiveSession, SessionFactory, SessionOptions};
use crate::tools;
use crate::types::{AudioTranscriptionConfig, Content, ResponseModality};

/// Settings shared by every session the relay opens.
#[derive(Debug, Clone)]
pub struct SessionTemplate {
    pub backend: Backend,
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    pub response_modality: ResponseModality,
    pub transcription: bool,
    pub order_status_tool: bool,
}

impl SessionTemplate {
    /// Builder for one session. A resume handle is passed through to the
    /// server; resumption is always requested so new handles keep coming.
    pub fn builder(&self, resume_handle: Option<String>) -> GeminiLiveClientBuilder {
        let mut builder = GeminiLiveClient::builder(self.backend.clone(), self.model.clone())
            .response_modality(self.response_modality.clone())
            .session_resumption(resume_handle);

        if self.response_modality == ResponseModality::Audio {
            builder = builder.voice(self.voice.clone());
        }
        if let Some(instruction) = &self.system_instruction {
            builder = builder.system_instruction(Content::from_text(instruction.clone()));
        }
        if self.transcription {
            builder = builder
                .input_audio_transcription(AudioTranscriptionConfig {})
                .output_audio_transcription(AudioTranscriptionConfig {});
        }
        if self.order_status_tool {
            builder = tools::order_status::register(builder);
        }
        builder
    }
}

/// Opens one Gemini Live session per relay connection.
pub struct GeminiSessionFactory {
    template: SessionTemplate,
}

impl GeminiSessionFactory {
    pub fn new(template: SessionTemplate) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &SessionTemplate {
        &self.template
    }
}

#[async_trait]
impl SessionFactory for GeminiSessionFactory {
    type Sink = GeminiLiveClient;

    async fn open(&self, options: SessionOptions) -> Result<LiveSession<Self::Sink>, LiveError> {
        info!(
            client = options.client_id,
            resuming = options.resume_handle.is_some(),
            "Opening Live API session"
        );
        let (sink, events) = self.template.builder(options.resume_handle).connect().await?;
        Ok(LiveSession { sink, events })
    }
}
