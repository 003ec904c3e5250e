//! Registry of connected browser clients.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: u64,
    pub peer: SocketAddr,
    pub connected_at: Instant,
    pub resumed: bool,
}

impl ClientInfo {
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Thread-safe client registry.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<u64, ClientInfo>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: u64, peer: SocketAddr, resumed: bool) {
        let mut map = self.clients.write().await;
        map.insert(
            id,
            ClientInfo {
                id,
                peer,
                connected_at: Instant::now(),
                resumed,
            },
        );
    }

    /// Removes a client, returning its entry if it was registered.
    pub async fn unregister(&self, id: u64) -> Option<ClientInfo> {
        self.clients.write().await.remove(&id)
    }

    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Current clients ordered by id.
    pub async fn snapshot(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self.clients.read().await.values().cloned().collect();
        clients.sort_by_key(|c| c.id);
        clients
    }
}
