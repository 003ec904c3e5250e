use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use live_relay::relay::ClientRegistry;
use live_relay::session::{MediaKind, TranscriptSource};
use live_relay::{
    LiveError, LiveSession, MediaChunk, MediaSink, RelayServer, RelaySettings, SessionEvent,
    SessionFactory, SessionOptions,
};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

fn init_test_logger() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(Level::INFO.into())
                    .from_env_lossy(),
            )
            .with_test_writer()
            .try_init();
    });
}

const WAIT: Duration = Duration::from_secs(5);

type Browser = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
enum SinkCall {
    Media(MediaChunk),
    Text(String),
    EndAudio,
    Close,
}

#[derive(Clone)]
struct RecordingSink {
    calls: mpsc::UnboundedSender<SinkCall>,
}

impl RecordingSink {
    fn record(&self, call: SinkCall) -> Result<(), LiveError> {
        self.calls.send(call).map_err(|_| LiveError::SendError)
    }
}

#[async_trait]
impl MediaSink for RecordingSink {
    async fn send_realtime(&self, chunk: MediaChunk) -> Result<(), LiveError> {
        self.record(SinkCall::Media(chunk))
    }

    async fn send_text(&self, text: String) -> Result<(), LiveError> {
        self.record(SinkCall::Text(text))
    }

    async fn end_audio_stream(&self) -> Result<(), LiveError> {
        self.record(SinkCall::EndAudio)
    }

    async fn close(&self) {
        let _ = self.record(SinkCall::Close);
    }
}

/// Test-side view of one session the relay opened.
struct OpenedSession {
    options: SessionOptions,
    events: mpsc::Sender<SessionEvent>,
    calls: mpsc::UnboundedReceiver<SinkCall>,
}

impl OpenedSession {
    async fn next_call(&mut self) -> SinkCall {
        timeout(WAIT, self.calls.recv())
            .await
            .expect("timed out waiting for a sink call")
            .expect("sink dropped")
    }

    async fn push(&self, event: SessionEvent) {
        self.events.send(event).await.expect("relay stopped reading events");
    }
}

struct ScriptedFactory {
    opened: mpsc::UnboundedSender<OpenedSession>,
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    type Sink = RecordingSink;

    async fn open(&self, options: SessionOptions) -> Result<LiveSession<Self::Sink>, LiveError> {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        self.opened
            .send(OpenedSession {
                options,
                events: events_tx,
                calls: calls_rx,
            })
            .map_err(|_| LiveError::SetupError("test harness gone".into()))?;
        Ok(LiveSession {
            sink: RecordingSink { calls: calls_tx },
            events: events_rx,
        })
    }
}

struct Harness {
    addr: SocketAddr,
    registry: ClientRegistry,
    opened: mpsc::UnboundedReceiver<OpenedSession>,
}

impl Harness {
    async fn start() -> anyhow::Result<Self> {
        init_test_logger();
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let server = RelayServer::bind(
            "127.0.0.1:0",
            ScriptedFactory { opened: opened_tx },
            RelaySettings::default(),
        )
        .await?;
        let addr = server.local_addr()?;
        let registry = server.registry();
        tokio::spawn(server.serve(std::future::pending::<()>()));
        Ok(Self {
            addr,
            registry,
            opened: opened_rx,
        })
    }

    /// Connects a browser, checks the ready frame and returns the session
    /// the relay opened for it.
    async fn connect(&mut self, path: &str) -> anyhow::Result<(Browser, OpenedSession)> {
        let (mut browser, _) = connect_async(format!("ws://{}{}", self.addr, path)).await?;
        assert_eq!(next_json(&mut browser).await, json!({"type": "ready"}));
        let session = timeout(WAIT, self.opened.recv())
            .await?
            .expect("factory dropped");
        Ok((browser, session))
    }
}

async fn next_json(browser: &mut Browser) -> Value {
    loop {
        let frame = timeout(WAIT, browser.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("relay sent invalid JSON");
        }
    }
}

async fn send_json(browser: &mut Browser, value: Value) {
    browser
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("send failed");
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[tokio::test]
async fn media_is_forwarded_byte_identical() -> anyhow::Result<()> {
    let mut harness = Harness::start().await?;
    let (mut browser, mut session) = harness.connect("/").await?;
    assert_eq!(session.options.resume_handle, None);

    let pcm: Vec<u8> = (0..=255).collect();
    send_json(&mut browser, json!({"type": "audio", "data": b64(&pcm)})).await;
    match session.next_call().await {
        SinkCall::Media(chunk) => {
            assert_eq!(chunk.kind, MediaKind::Audio);
            assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
            assert_eq!(chunk.data, pcm);
        }
        other => panic!("expected audio, got {:?}", other),
    }

    let jpeg = vec![0xff, 0xd8, 0xff, 0xe0, 0x00];
    send_json(
        &mut browser,
        json!({"type": "video", "data": b64(&jpeg), "mode": "screen"}),
    )
    .await;
    assert_eq!(session.next_call().await, SinkCall::Media(MediaChunk::jpeg(jpeg)));
    Ok(())
}

#[tokio::test]
async fn malformed_frames_do_not_end_the_connection() -> anyhow::Result<()> {
    let mut harness = Harness::start().await?;
    let (mut browser, mut session) = harness.connect("/").await?;

    browser.send(Message::Text("{not json".into())).await?;
    send_json(&mut browser, json!({"type": "hologram", "data": ""})).await;
    send_json(&mut browser, json!({"type": "audio", "data": "@@@"})).await;
    send_json(&mut browser, json!({"type": "text", "data": "hello"})).await;
    send_json(&mut browser, json!({"type": "end"})).await;

    assert_eq!(session.next_call().await, SinkCall::Text("hello".into()));
    assert_eq!(session.next_call().await, SinkCall::EndAudio);
    Ok(())
}

#[tokio::test]
async fn responses_follow_turn_rules() -> anyhow::Result<()> {
    let mut harness = Harness::start().await?;
    let (mut browser, session) = harness.connect("/").await?;

    for event in [
        SessionEvent::Text {
            text: "Hej".into(),
            partial: true,
        },
        SessionEvent::Text {
            text: "Hej".into(),
            partial: false,
        },
        SessionEvent::TurnComplete,
        SessionEvent::Audio(vec![1, 2, 3]),
        SessionEvent::Interrupted,
        SessionEvent::Interrupted,
        SessionEvent::TurnComplete,
        SessionEvent::Transcript {
            source: TranscriptSource::Output,
            text: "on its way".into(),
        },
        SessionEvent::SessionHandle("handle-1".into()),
        SessionEvent::TurnComplete,
    ] {
        session.push(event).await;
    }

    let expected = [
        json!({"type": "text", "data": "Hej"}),
        json!({"type": "turn_complete"}),
        json!({"type": "audio", "data": "AQID"}),
        json!({"type": "interrupted", "data": "Response interrupted by user input"}),
        json!({"type": "text", "data": "on its way"}),
        json!({"type": "session_id", "data": "handle-1"}),
        json!({"type": "turn_complete", "session_id": "handle-1"}),
    ];
    for want in expected {
        assert_eq!(next_json(&mut browser).await, want);
    }
    Ok(())
}

#[tokio::test]
async fn disconnect_closes_the_session() -> anyhow::Result<()> {
    let mut harness = Harness::start().await?;
    let (mut browser, mut session) = harness.connect("/").await?;
    assert_eq!(harness.registry.count().await, 1);

    browser.close(None).await?;
    assert_eq!(session.next_call().await, SinkCall::Close);

    timeout(WAIT, async {
        while harness.registry.count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn session_end_closes_the_socket() -> anyhow::Result<()> {
    let mut harness = Harness::start().await?;
    let (mut browser, mut session) = harness.connect("/").await?;

    drop(session.events);
    assert_eq!(
        timeout(WAIT, session.calls.recv()).await?,
        Some(SinkCall::Close)
    );

    let closed = timeout(WAIT, async {
        loop {
            match browser.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await?;
    assert!(closed);
    Ok(())
}

#[tokio::test]
async fn resume_handle_reaches_the_factory() -> anyhow::Result<()> {
    let mut harness = Harness::start().await?;
    let (_first, first) = harness.connect("/").await?;
    let (_second, second) = harness.connect("/?resume=handle-1").await?;

    assert_eq!(second.options.resume_handle.as_deref(), Some("handle-1"));
    assert_ne!(first.options.client_id, second.options.client_id);
    assert_eq!(harness.registry.count().await, 2);
    Ok(())
}
