//! Browser-facing half of the relay.

pub mod connection;
pub mod envelope;
pub mod registry;
pub mod turn;

pub use connection::{DEFAULT_QUEUE_CAPACITY, RelaySettings, handle_connection};
pub use envelope::{ClientEnvelope, ServerEnvelope, VideoMode};
pub use registry::{ClientInfo, ClientRegistry};
pub use turn::{TurnState, dedup_fragments};
