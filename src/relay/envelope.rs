//! JSON envelopes exchanged with the browser.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::LiveError;

pub const INTERRUPTED_MESSAGE: &str = "Response interrupted by user input";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoMode {
    #[default]
    Webcam,
    Screen,
}

/// Messages the browser sends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Base64 PCM audio.
    Audio {
        #[serde(default)]
        data: String,
    },
    /// Base64 JPEG frame.
    Video {
        #[serde(default)]
        data: String,
        #[serde(default)]
        mode: VideoMode,
    },
    Text {
        #[serde(default)]
        data: String,
    },
    /// The user stopped talking for this turn.
    End,
}

impl ClientEnvelope {
    pub fn parse(frame: &str) -> Result<Self, LiveError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Messages the relay sends back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    Ready,
    Audio {
        data: String,
    },
    Text {
        data: String,
    },
    Interrupted {
        data: String,
    },
    TurnComplete {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    SessionId {
        data: String,
    },
}

impl ServerEnvelope {
    pub fn audio(bytes: &[u8]) -> Self {
        ServerEnvelope::Audio {
            data: encode(bytes),
        }
    }

    pub fn interrupted() -> Self {
        ServerEnvelope::Interrupted {
            data: INTERRUPTED_MESSAGE.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, LiveError> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode(data: &str) -> Result<Vec<u8>, LiveError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}
