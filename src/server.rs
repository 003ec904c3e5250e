//! TCP accept loop for the relay.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::{Instrument, error, info, info_span, warn};

use crate::error::LiveError;
use crate::relay::{ClientRegistry, RelaySettings, handle_connection};
use crate::session::{SessionFactory, SessionOptions};

/// Query parameter carrying a session resumption handle.
pub const RESUME_QUERY_PARAM: &str = "resume";

pub struct RelayServer<F: SessionFactory> {
    listener: TcpListener,
    factory: Arc<F>,
    settings: RelaySettings,
    registry: ClientRegistry,
    next_client_id: AtomicU64,
}

impl<F: SessionFactory> RelayServer<F> {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        factory: F,
        settings: RelaySettings,
    ) -> Result<Self, LiveError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            factory: Arc::new(factory),
            settings,
            registry: ClientRegistry::new(),
            next_client_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LiveError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> ClientRegistry {
        self.registry.clone()
    }

    /// Accepts clients until `shutdown` resolves, then aborts every open
    /// connection.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<(), LiveError> {
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        info!(addr = ?self.listener.local_addr().ok(), "Relay listening");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing {} connection(s)", connections.len());
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
                        let factory = Arc::clone(&self.factory);
                        let registry = self.registry.clone();
                        let settings = self.settings;
                        connections.spawn(
                            serve_client(stream, peer, id, factory, settings, registry)
                                .instrument(info_span!("client", id)),
                        );
                    }
                    Err(e) => warn!(error = %e, "TCP accept error"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        }

        connections.shutdown().await;
        Ok(())
    }
}

async fn serve_client<F: SessionFactory>(
    stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    factory: Arc<F>,
    settings: RelaySettings,
    registry: ClientRegistry,
) {
    let mut resume_handle = None;
    let ws = match accept_hdr_async(stream, |request: &Request, response: Response| {
        resume_handle = resume_param(request);
        Ok(response)
    })
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    registry.register(id, peer, resume_handle.is_some()).await;
    let active = registry.count().await;
    info!(
        peer = %peer,
        resuming = resume_handle.is_some(),
        active,
        "Client connected"
    );

    let options = SessionOptions {
        client_id: id,
        resume_handle,
    };
    match handle_connection(ws, options, factory.as_ref(), &settings).await {
        Ok(()) => info!(peer = %peer, "Client disconnected"),
        Err(e) if e.is_disconnect() => info!(peer = %peer, error = %e, "Client disconnected"),
        Err(e) => error!(peer = %peer, error = %e, "Connection ended with error"),
    }

    if let Some(client) = registry.unregister(id).await {
        let active = registry.count().await;
        info!(
            connected_for = ?client.connected_for(),
            active,
            "Client unregistered"
        );
    }
}

fn resume_param(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == RESUME_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
