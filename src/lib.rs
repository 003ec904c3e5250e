pub mod client;
pub mod config;
pub mod error;
pub mod relay;
pub mod server;
pub mod session;
pub mod tools;
pub mod types;

pub use client::{GeminiLiveClient, GeminiLiveClientBuilder, GeminiSessionFactory, SessionTemplate};
pub use config::RelayConfig;
pub use error::LiveError;
pub use relay::{RelaySettings, handle_connection};
pub use server::RelayServer;
pub use session::{LiveSession, MediaChunk, MediaSink, SessionEvent, SessionFactory, SessionOptions};
