use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use super::Backend;
use super::handlers::ToolRegistry;
use crate::error::LiveError;
use crate::session::{SessionEvent, TranscriptSource};
use crate::types::*;

const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

/// Opens the socket, sends `setup` and waits for `setupComplete`.
pub(crate) async fn open_socket(
    backend: &Backend,
    initial_setup: &BidiGenerateContentSetup,
) -> Result<(WsSink, WsSource), LiveError> {
    let request = backend.client_request()?;
    info!(backend = ?backend, model = %initial_setup.model, "Connecting to Live API");

    let (ws_stream, _) = connect_async(request).await.map_err(|e| {
        error!("WebSocket connection failed: {}", e);
        LiveError::WebSocketError(e)
    })?;
    debug!("WebSocket handshake successful.");

    let (mut ws_sink, mut ws_source) = ws_stream.split();

    let setup_payload = ClientMessagePayload::Setup(initial_setup.clone());
    let setup_json = serde_json::to_string(&setup_payload)?;
    trace!("Sending setup message: {}", setup_json);
    ws_sink.send(Message::Text(setup_json.into())).await?;

    await_setup_complete(&mut ws_source, SETUP_TIMEOUT).await?;
    Ok((ws_sink, ws_source))
}

/// Reads the first server frame and checks that it is `setupComplete`.
async fn await_setup_complete<R>(ws_source: &mut R, wait: Duration) -> Result<(), LiveError>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    debug!("Waiting for SetupComplete message...");
    let first = match tokio::time::timeout(wait, ws_source.next()).await {
        Ok(Some(Ok(msg))) => msg,
        Ok(Some(Err(e))) => return Err(LiveError::WebSocketError(e)),
        Ok(None) => return Err(LiveError::ConnectionClosed),
        Err(_) => {
            return Err(LiveError::SetupError(format!(
                "no setupComplete within {}s",
                wait.as_secs()
            )));
        }
    };

    let setup_ok = message_text(&first)
        .and_then(|t| serde_json::from_str::<ServerMessage>(&t).ok())
        .is_some_and(|m| m.setup_complete.is_some());

    if !setup_ok {
        if let Message::Close(Some(frame)) = &first {
            return Err(LiveError::SetupError(format!(
                "server closed during setup ({:?}): {}",
                frame.code, frame.reason
            )));
        }
        error!(
            "SetupComplete message not successfully received or parsed. First message: {:?}",
            first
        );
        return Err(LiveError::UnexpectedMessage);
    }
    info!("Setup phase complete.");
    Ok(())
}

pub(crate) fn spawn_listen_task(
    ws_sink: WsSink,
    ws_source: WsSource,
    tools: Arc<ToolRegistry>,
    shutdown_rx: oneshot::Receiver<()>,
    outgoing_rx: mpsc::Receiver<ClientMessagePayload>,
    events_tx: mpsc::Sender<SessionEvent>,
) {
    let span = info_span!("live_session");
    tokio::spawn(
        async move {
            match listen(ws_sink, ws_source, tools, shutdown_rx, outgoing_rx, events_tx).await {
                Ok(()) => info!("Listen task finished gracefully."),
                Err(e) => error!("Listen task failed: {}", e),
            }
        }
        .instrument(span),
    );
}

async fn listen<W, R>(
    mut ws_sink: W,
    mut ws_source: R,
    tools: Arc<ToolRegistry>,
    mut shutdown_rx: oneshot::Receiver<()>,
    mut outgoing_rx: mpsc::Receiver<ClientMessagePayload>,
    events_tx: mpsc::Sender<SessionEvent>,
) -> Result<(), LiveError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => {
                info!("Shutdown signal received. Closing WebSocket.");
                break;
            }
            maybe_outgoing = outgoing_rx.recv() => {
                let Some(payload) = maybe_outgoing else {
                    info!("All client handles dropped. Closing WebSocket.");
                    break;
                };
                let json_message = match serde_json::to_string(&payload) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                };
                ws_sink.send(Message::Text(json_message.into())).await?;
            }
            msg_result = ws_source.next() => {
                match msg_result {
                    Some(Ok(message)) => {
                        let should_stop =
                            process_server_message(message, &tools, &mut ws_sink, &events_tx).await?;
                        if should_stop {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("WebSocket read error: {:?}", e);
                        return Err(LiveError::WebSocketError(e));
                    }
                    None => {
                        info!("WebSocket stream ended (server closed connection).");
                        return Ok(());
                    }
                }
            }
        }
    }

    let _ = ws_sink.send(Message::Close(None)).await;
    let _ = ws_sink.close().await;
    Ok(())
}

fn message_text(message: &Message) -> Option<String> {
    match message {
        Message::Text(t) => Some(t.to_string()),
        Message::Binary(b) => String::from_utf8(b.to_vec()).ok(),
        _ => None,
    }
}

/// Returns `true` when the listen loop should stop.
async fn process_server_message<W>(
    message: Message,
    tools: &ToolRegistry,
    ws_sink: &mut W,
    events_tx: &mpsc::Sender<SessionEvent>,
) -> Result<bool, LiveError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    if let Message::Close(close_frame_opt) = &message {
        match close_frame_opt {
            Some(close_frame) => info!(
                "Received WebSocket Close frame from server. Code: {:?}, Reason: '{}'",
                close_frame.code, close_frame.reason,
            ),
            None => info!("Received WebSocket Close frame from server."),
        }
        return Ok(true);
    }

    let Some(text) = message_text(&message) else {
        return Ok(false);
    };

    let server_message = match serde_json::from_str::<ServerMessage>(&text) {
        Ok(m) => m,
        Err(e) => {
            error!(
                "Failed to parse ServerMessage: {:?}, raw text size: {}",
                e,
                text.len()
            );
            trace!("Failed parse raw text: '{}'", text);
            return Ok(false);
        }
    };

    if let Some(tool_call) = &server_message.tool_call {
        let mut function_responses = Vec::with_capacity(tool_call.function_calls.len());
        for call in tool_call.function_calls.iter().cloned() {
            function_responses.push(tools.dispatch(call).await);
        }
        if !function_responses.is_empty() {
            let count = function_responses.len();
            let payload = ClientMessagePayload::ToolResponse(BidiGenerateContentToolResponse {
                function_responses,
            });
            let json_msg = serde_json::to_string(&payload)?;
            ws_sink.send(Message::Text(json_msg.into())).await?;
            info!("Sent {} tool response(s).", count);
        }
    }

    if let Some(cancellation) = &server_message.tool_call_cancellation {
        debug!(ids = ?cancellation.ids, "Server cancelled tool calls");
    }

    for event in events_from_server_message(&server_message) {
        if events_tx.send(event).await.is_err() {
            info!("Event receiver dropped. Stopping session.");
            return Ok(true);
        }
    }
    Ok(false)
}

/// Flattens one server message into session events.
///
/// Order: resumption handle, go-away, model turn parts, output then input
/// transcription, interruption, turn completion, usage.
pub(crate) fn events_from_server_message(message: &ServerMessage) -> Vec<SessionEvent> {
    let mut events = Vec::new();

    if let Some(update) = &message.session_resumption_update {
        if update.resumable && !update.new_handle.is_empty() {
            events.push(SessionEvent::SessionHandle(update.new_handle.clone()));
        }
    }

    if let Some(go_away) = &message.go_away {
        events.push(SessionEvent::GoAway {
            time_left: go_away.time_left.clone(),
        });
    }

    if let Some(content) = &message.server_content {
        if let Some(model_turn) = &content.model_turn {
            for part in &model_turn.parts {
                if let Some(blob) = &part.inline_data {
                    match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
                        Ok(bytes) => events.push(SessionEvent::Audio(bytes)),
                        Err(e) => warn!("Dropping undecodable inline data: {}", e),
                    }
                }
                if let Some(text) = &part.text {
                    if part.thought == Some(true) || text.is_empty() {
                        continue;
                    }
                    events.push(SessionEvent::Text {
                        text: text.clone(),
                        partial: true,
                    });
                }
            }
        }

        if let Some(t) = &content.output_transcription {
            if !t.text.is_empty() {
                events.push(SessionEvent::Transcript {
                    source: TranscriptSource::Output,
                    text: t.text.clone(),
                });
            }
        }
        if let Some(t) = &content.input_transcription {
            if !t.text.is_empty() {
                events.push(SessionEvent::Transcript {
                    source: TranscriptSource::Input,
                    text: t.text.clone(),
                });
            }
        }

        if content.interrupted {
            events.push(SessionEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(SessionEvent::TurnComplete);
        }
    }

    if let Some(usage) = &message.usage_metadata {
        events.push(SessionEvent::Usage(usage.clone()));
    }

    events
}
