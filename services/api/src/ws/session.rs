//! Manages the WebSocket connection lifecycle for a voice session.

use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use chorus_core::events::{Event, SessionId};
use chorus_core::session::Transport;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{Instrument, debug, error, info, instrument, warn};

/// Outbound messages queued per connection before new ones are dropped.
const OUTBOUND_BUFFER: usize = 64;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Bridges bus events for one session onto its socket writer.
///
/// The bus publishes synchronously, so delivery only enqueues; the writer
/// task drains the queue onto the socket.
pub struct WsTransport {
    tx: mpsc::Sender<ServerMessage>,
}

impl WsTransport {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { tx }
    }
}

impl Transport for WsTransport {
    fn deliver(&self, topic: &str, event: &Event) -> bool {
        let Some(message) = ServerMessage::from_event(event) else {
            debug!(topic, "Event has no client representation");
            return true;
        };
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(topic, session_id = %event.session_id, "Outbound queue full; dropping message");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Main handler for an individual WebSocket connection.
///
/// Announces the session id, then feeds binary frames and control messages
/// into the orchestrator until the client goes away.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = SessionId::generate();
    tracing::Span::current().record("session_id", session_id.as_str());
    info!("New WebSocket connection");

    let (mut socket_tx, mut socket_rx) = socket.split();
    if send_msg(
        &mut socket_tx,
        ServerMessage::Session {
            session_id: session_id.clone(),
        },
    )
    .await
    .is_err()
    {
        error!("Failed to send session message to client");
        return;
    }

    let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
    let transport = Arc::new(WsTransport::new(tx.clone()));
    let orchestrator = &state.orchestrator;
    orchestrator.connect(session_id.clone(), &transport);

    let writer = tokio::spawn(
        async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = send_msg(&mut socket_tx, message).await {
                    warn!(error = %e, "Failed to write to client; stopping writer");
                    break;
                }
            }
        }
        .instrument(tracing::info_span!("ws_writer")),
    );

    while let Some(msg_result) = socket_rx.next().await {
        match msg_result {
            Ok(Message::Binary(frame)) => orchestrator.ingest_frame(&session_id, frame),
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => handle_client_message(&state, &session_id, message),
                Err(e) => {
                    warn!(error = %e, "Invalid client message");
                    let error = ServerMessage::Error {
                        message: format!("Invalid message: {e}"),
                    };
                    if tx.try_send(error).is_err() {
                        debug!("Could not queue error reply");
                    }
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client sent close frame");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        }
    }

    orchestrator.disconnect(&session_id);
    drop(transport);
    writer.abort();
    info!("WebSocket connection closed");
}

fn handle_client_message(state: &AppState, session_id: &SessionId, message: ClientMessage) {
    let orchestrator = &state.orchestrator;
    match message {
        ClientMessage::StopListening => orchestrator.stop_listening(session_id),
        ClientMessage::UserText { text } => {
            if text.trim().is_empty() {
                debug!("Ignoring empty user text");
                return;
            }
            orchestrator.user_text(session_id, text);
        }
        ClientMessage::DeviceSelect { settings } => {
            orchestrator.select_device(session_id, Value::Object(settings))
        }
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
