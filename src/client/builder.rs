use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use super::handle::GeminiLiveClient;
use super::handlers::{ToolHandler, ToolRegistry};
use super::{Backend, connection};
use crate::error::LiveError;
use crate::session::SessionEvent;
use crate::types::*;

const DEFAULT_EVENT_CAPACITY: usize = 256;
const OUTGOING_CAPACITY: usize = 100;

pub struct GeminiLiveClientBuilder {
    pub(crate) backend: Backend,
    pub(crate) initial_setup: BidiGenerateContentSetup,
    pub(crate) tools: ToolRegistry,
    pub(crate) event_capacity: usize,
}

impl GeminiLiveClientBuilder {
    pub fn new(backend: Backend, model: impl Into<String>) -> Self {
        let model = backend.model_path(&model.into());
        Self {
            backend,
            initial_setup: BidiGenerateContentSetup {
                model,
                ..Default::default()
            },
            tools: ToolRegistry::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn generation_config(mut self, config: GenerationConfig) -> Self {
        self.initial_setup.generation_config = Some(config);
        self
    }

    pub fn system_instruction(mut self, instruction: Content) -> Self {
        self.initial_setup.system_instruction = Some(instruction);
        self
    }

    pub fn response_modality(mut self, modality: ResponseModality) -> Self {
        let config = self
            .initial_setup
            .generation_config
            .get_or_insert_with(GenerationConfig::default);
        config.response_modalities = Some(vec![modality]);
        self
    }

    pub fn voice(mut self, voice_name: impl Into<String>) -> Self {
        let config = self
            .initial_setup
            .generation_config
            .get_or_insert_with(GenerationConfig::default);
        config.speech_config = Some(SpeechConfig::with_voice(voice_name));
        self
    }

    pub fn add_tool_declaration(mut self, declaration: FunctionDeclaration) -> Self {
        let tools_vec = self.initial_setup.tools.get_or_insert_with(Vec::new);
        if let Some(tool_struct) = tools_vec.first_mut() {
            tool_struct.function_declarations.push(declaration);
        } else {
            tools_vec.push(Tool {
                function_declarations: vec![declaration],
            });
        }
        self
    }

    pub fn on_tool_call(mut self, tool_name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.insert(tool_name, handler);
        self
    }

    pub fn realtime_input_config(mut self, config: RealtimeInputConfig) -> Self {
        self.initial_setup.realtime_input_config = Some(config);
        self
    }

    pub fn input_audio_transcription(mut self, config: AudioTranscriptionConfig) -> Self {
        self.initial_setup.input_audio_transcription = Some(config);
        self
    }

    pub fn output_audio_transcription(mut self, config: AudioTranscriptionConfig) -> Self {
        self.initial_setup.output_audio_transcription = Some(config);
        self
    }

    /// Asks the server for resumption handles. `handle` resumes an earlier
    /// session; `None` starts a fresh one.
    pub fn session_resumption(mut self, handle: Option<String>) -> Self {
        self.initial_setup.session_resumption = Some(SessionResumptionConfig { handle });
        self
    }

    /// Capacity of the event channel returned by [`connect`](Self::connect).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn setup(&self) -> &BidiGenerateContentSetup {
        &self.initial_setup
    }

    /// Completes the setup handshake and starts the background listen task.
    pub async fn connect(
        self,
    ) -> Result<(GeminiLiveClient, mpsc::Receiver<SessionEvent>), LiveError> {
        let (ws_sink, ws_source) =
            connection::open_socket(&self.backend, &self.initial_setup).await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (outgoing_sender, outgoing_receiver) = mpsc::channel(OUTGOING_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);

        if !self.tools.is_empty() {
            info!(tools = ?self.tools.names().collect::<Vec<_>>(), "Tool handlers registered");
        }

        connection::spawn_listen_task(
            ws_sink,
            ws_source,
            Arc::new(self.tools),
            shutdown_rx,
            outgoing_receiver,
            events_tx,
        );

        Ok((
            GeminiLiveClient {
                shutdown_tx: Arc::new(TokioMutex::new(Some(shutdown_tx))),
                outgoing_sender,
            },
            events_rx,
        ))
    }
}
