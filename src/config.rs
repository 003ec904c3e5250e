//! Command-line and environment configuration.

use clap::{Args, ValueEnum};

use crate::client::{Backend, GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT, SessionTemplate};
use crate::error::LiveError;
use crate::relay::{DEFAULT_QUEUE_CAPACITY, RelaySettings};
use crate::types::ResponseModality;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-live-preview-04-09";
pub const DEFAULT_VOICE: &str = "Puck";
pub const DEFAULT_LOCATION: &str = "us-central1";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are Alex, a digital employee of SVENSKA HEM, an online store that sells \
furniture and a lot of candles. Introduce yourself at the beginning of the \
conversation and ask how you can help.

- When asked for a product recommendation, recommend the vanilla scented candles.
- When asked about an order, look it up with the get_order_status tool if it \
is available and summarise the status, dates and items.
- When asked whether the BOKHYLLA Stor shelves are adjustable, say yes: each \
shelf rests on small pegs that can be moved between the pre-drilled holes.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModalityArg {
    Audio,
    Text,
}

impl From<ModalityArg> for ResponseModality {
    fn from(arg: ModalityArg) -> Self {
        match arg {
            ModalityArg::Audio => ResponseModality::Audio,
            ModalityArg::Text => ResponseModality::Text,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct RelayConfig {
    /// Address to listen on.
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "RELAY_PORT", default_value_t = 8765)]
    pub port: u16,

    /// Google AI Studio API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Vertex AI project. Used together with an access token.
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    pub project: Option<String>,

    #[arg(long, env = "GOOGLE_CLOUD_LOCATION", default_value = DEFAULT_LOCATION)]
    pub location: String,

    /// OAuth access token for Vertex AI, e.g. from `gcloud auth print-access-token`.
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(long, env = "MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Prebuilt voice for audio responses.
    #[arg(long, env = "VOICE_NAME", default_value = DEFAULT_VOICE)]
    pub voice: String,

    /// Overrides the built-in assistant prompt.
    #[arg(long, env = "SYSTEM_INSTRUCTION")]
    pub system_instruction: Option<String>,

    #[arg(long, env = "RESPONSE_MODALITY", value_enum, default_value_t = ModalityArg::Audio)]
    pub response_modality: ModalityArg,

    /// Sample rate of the PCM audio browsers send.
    #[arg(long, env = "SEND_SAMPLE_RATE", default_value_t = GEMINI_AUDIO_SAMPLE_RATE_HZ_ACCEPTED_INPUT)]
    pub send_sample_rate: u32,

    /// Capacity of each per-connection media queue.
    #[arg(long, env = "RELAY_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Expose the mock get_order_status tool to the model.
    #[arg(long, env = "ORDER_STATUS_TOOL")]
    pub order_status_tool: bool,

    /// Disable input and output audio transcription.
    #[arg(long)]
    pub no_transcription: bool,
}

impl RelayConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Vertex AI when both a project and an access token are set, otherwise
    /// AI Studio when an API key is set.
    pub fn backend(&self) -> Result<Backend, LiveError> {
        if let (Some(project), Some(access_token)) = (non_empty(&self.project), non_empty(&self.access_token)) {
            return Ok(Backend::Vertex {
                project: project.to_string(),
                location: self.location.clone(),
                access_token: access_token.to_string(),
            });
        }
        match non_empty(&self.api_key) {
            Some(api_key) => Ok(Backend::Studio {
                api_key: api_key.to_string(),
            }),
            None => Err(LiveError::MissingCredentials),
        }
    }

    pub fn session_template(&self) -> Result<SessionTemplate, LiveError> {
        Ok(SessionTemplate {
            backend: self.backend()?,
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: Some(
                self.system_instruction
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            ),
            response_modality: self.response_modality.into(),
            transcription: !self.no_transcription,
            order_status_tool: self.order_status_tool,
        })
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            send_sample_rate: self.send_sample_rate,
            queue_capacity: self.queue_capacity,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: RelayConfig,
    }

    fn parse(args: &[&str]) -> RelayConfig {
        let mut argv = vec!["live-relay"];
        argv.extend_from_slice(args);
        TestCli::parse_from(argv).config
    }

    #[test]
    fn api_key_selects_studio() {
        let config = parse(&["--api-key", "k", "--access-token", "", "--port", "9000"]);
        assert!(matches!(config.backend().unwrap(), Backend::Studio { api_key } if api_key == "k"));
        assert!(config.listen_addr().ends_with(":9000"));
    }

    #[test]
    fn project_and_token_select_vertex() {
        let config = parse(&[
            "--api-key",
            "k",
            "--project",
            "p",
            "--access-token",
            "t",
            "--location",
            "europe-west4",
        ]);
        match config.backend().unwrap() {
            Backend::Vertex {
                project, location, ..
            } => {
                assert_eq!(project, "p");
                assert_eq!(location, "europe-west4");
            }
            other => panic!("expected vertex, got {:?}", other),
        }
    }

    #[test]
    fn project_without_token_falls_back_or_fails() {
        let config = parse(&["--project", "p", "--access-token", "", "--api-key", " "]);
        assert!(matches!(config.backend(), Err(LiveError::MissingCredentials)));
    }

    #[test]
    fn template_follows_flags() {
        let config = parse(&[
            "--api-key",
            "k",
            "--access-token",
            "",
            "--response-modality",
            "text",
            "--no-transcription",
            "--order-status-tool",
            "--queue-capacity",
            "8",
        ]);
        let template = config.session_template().unwrap();
        assert_eq!(template.response_modality, ResponseModality::Text);
        assert!(!template.transcription);
        assert!(template.order_status_tool);
        assert!(template.system_instruction.unwrap().contains("SVENSKA HEM"));
        assert_eq!(config.relay_settings().queue_capacity, 8);
        assert_eq!(config.relay_settings().send_sample_rate, 16000);
    }
}
