pub mod builder;
pub mod factory;
pub mod handle;
pub mod handlers;

mod connection;

use std::fmt;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use url::Url;

use crate::error::LiveError;

pub use builder::GeminiLiveClientBuilder;
pub use factory::{GeminiSessionFactory, SessionTemplate};
pub use handle::GeminiLiveClient;
pub use handlers::{ToolHandler, ToolRegistry};

/// Sample rate (16kHz) Gemini accepts for audio sent to the Gemini API.
pub const GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT: u32 = 16000;
/// Number of audio channels (mono) Gemini accepts for audio sent to the Gemini API.
pub const GEMINI_AUDIO_CHANNELS_ACCEPTED_INPUT: u16 = 1;

const STUDIO_WS_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const VERTEX_WS_PATH: &str =
    "ws/google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent";

/// Where a live session is opened and how it authenticates.
#[derive(Clone)]
pub enum Backend {
    /// Google AI Studio, authenticated with an API key.
    Studio { api_key: String },
    /// Vertex AI, authenticated with an OAuth access token.
    Vertex {
        project: String,
        location: String,
        access_token: String,
    },
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Studio { .. } => f.debug_struct("Studio").finish_non_exhaustive(),
            Backend::Vertex {
                project, location, ..
            } => f
                .debug_struct("Vertex")
                .field("project", project)
                .field("location", location)
                .finish_non_exhaustive(),
        }
    }
}

impl Backend {
    /// Fully-qualified model name as the backend expects it in `setup.model`.
    pub fn model_path(&self, model: &str) -> String {
        match self {
            Backend::Studio { .. } => {
                if model.starts_with("models/") {
                    model.to_string()
                } else {
                    format!("models/{}", model)
                }
            }
            Backend::Vertex {
                project, location, ..
            } => {
                if model.starts_with("projects/") {
                    model.to_string()
                } else {
                    let bare = model.trim_start_matches("models/");
                    format!(
                        "projects/{}/locations/{}/publishers/google/models/{}",
                        project, location, bare
                    )
                }
            }
        }
    }

    pub(crate) fn endpoint(&self) -> Result<Url, LiveError> {
        match self {
            Backend::Studio { api_key } => {
                let mut url = Url::parse(STUDIO_WS_ENDPOINT)?;
                url.query_pairs_mut().append_pair("key", api_key);
                Ok(url)
            }
            Backend::Vertex { location, .. } => Ok(Url::parse(&format!(
                "wss://{}-aiplatform.googleapis.com/{}",
                location, VERTEX_WS_PATH
            ))?),
        }
    }

    pub(crate) fn client_request(&self) -> Result<Request, LiveError> {
        let mut request = self.endpoint()?.as_str().into_client_request()?;
        if let Backend::Vertex { access_token, .. } = self {
            let value = HeaderValue::from_str(&format!("Bearer {}", access_token))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}
