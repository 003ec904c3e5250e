use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum LiveError {
    #[error("WebSocket connection error: {0}")]
    WebSocketError(#[from] tungstenite::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid base64 payload: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Invalid header value: {0}")]
    HeaderError(#[from] tungstenite::http::header::InvalidHeaderValue),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Session setup failed: {0}")]
    SetupError(String),

    #[error("Message from server was not in expected format")]
    UnexpectedMessage,

    #[error("Attempted to send message on a closed connection")]
    ConnectionClosed,

    #[error("Error sending message")]
    SendError,

    #[error("Missing credentials: set an API key, or a project and access token for Vertex AI")]
    MissingCredentials,
}

impl LiveError {
    /// True when the error only means the peer went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            LiveError::ConnectionClosed => true,
            LiveError::WebSocketError(tungstenite::Error::Io(e)) => is_peer_gone(e),
            LiveError::WebSocketError(e) => matches!(
                e,
                tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Protocol(
                        tungstenite::error::ProtocolError::ResetWithoutClosingHandshake
                    )
            ),
            LiveError::IoError(e) => is_peer_gone(e),
            _ => false,
        }
    }
}

fn is_peer_gone(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    )
}
