//! WebSocket signaling transport
//!
//! One socket per peer. Text frames carry JSON requests; responses and server
//! events share a single writer task. Requests from one socket are handled in
//! order, and an application error never closes the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use sfu_signaling::{
    PeerConnection, PeerId, RequestFrame, ResponseFrame, ServerEvent, SignalingError,
};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::server::AppState;

/// Capacity of the per-socket response queue
const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// How long queued responses and events may take to flush after the peer leaves
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Display name other peers use to `call` this one
    pub name: Option<String>,
}

/// Upgrade handler: `ws://host/ws?name={name}`
///
/// The peer is registered before the upgrade so that a taken name or a full
/// server is reported as an HTTP error.
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let name = query
        .name
        .ok_or_else(|| AppError::bad_request("Missing name query parameter"))?;
    let connection = state.orchestrator.connect(name)?;

    let orchestrator = Arc::clone(&state.orchestrator);
    let peer_id = connection.peer_id.clone();
    Ok(ws
        .max_message_size(state.max_message_size)
        .on_failed_upgrade(move |e| {
            warn!(peer_id = %peer_id, error = %e, "WebSocket upgrade failed");
            tokio::spawn(async move {
                orchestrator.disconnect(&peer_id).await;
            });
        })
        .on_upgrade(move |socket| handle_socket(socket, state, connection)))
}

async fn handle_socket(socket: WebSocket, state: AppState, connection: PeerConnection) {
    let PeerConnection { peer_id, events } = connection;
    info!(peer_id = %peer_id, "WebSocket connection established");

    let (sink, mut stream) = socket.split();
    let (response_tx, response_rx) = mpsc::channel::<String>(RESPONSE_CHANNEL_CAPACITY);
    let writer = tokio::spawn(write_loop(sink, response_rx, events, peer_id.clone()));

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                let error =
                    SignalingError::ProtocolViolation("binary frames are not supported".into());
                if !respond(&response_tx, ResponseFrame::failure(None, &error)).await {
                    break;
                }
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(peer_id = %peer_id, error = %e, "WebSocket receive error");
                break;
            }
        };

        let response = handle_frame(&state, &peer_id, text.as_str()).await;
        if !respond(&response_tx, response).await {
            break;
        }
    }

    // Closing both queues lets the writer flush what is left and stop
    drop(response_tx);
    state.orchestrator.disconnect(&peer_id).await;
    if !drain_writer(writer, WRITER_DRAIN_TIMEOUT).await {
        debug!(peer_id = %peer_id, "Writer did not drain in time");
    }
    info!(peer_id = %peer_id, "WebSocket connection closed");
}

async fn handle_frame(state: &AppState, peer_id: &PeerId, text: &str) -> ResponseFrame {
    let (id, request) = RequestFrame::parse(text);
    let result = match request {
        Ok(request) => {
            let method = request.method();
            let result = state.orchestrator.handle_request(peer_id, request).await;
            if let Err(e) = &result {
                debug!(peer_id = %peer_id, method, kind = e.kind(), error = %e, "Request failed");
            }
            result
        }
        Err(e) => {
            warn!(peer_id = %peer_id, error = %e, "Rejected malformed frame");
            Err(e)
        }
    };
    ResponseFrame::from_result(id, result)
}

async fn respond(response_tx: &mpsc::Sender<String>, response: ResponseFrame) -> bool {
    match serde_json::to_string(&response) {
        Ok(text) => response_tx.send(text).await.is_ok(),
        Err(e) => {
            error!(error = %e, "Failed to encode response");
            true
        }
    }
}

/// Wait for the writer to finish, aborting it after `timeout`. Returns whether it drained.
async fn drain_writer(mut writer: JoinHandle<()>, timeout: Duration) -> bool {
    if tokio::time::timeout(timeout, &mut writer).await.is_ok() {
        true
    } else {
        writer.abort();
        false
    }
}

/// Forward responses and server events to the socket until both queues are closed
async fn write_loop<S>(
    mut sink: S,
    mut responses: mpsc::Receiver<String>,
    mut events: mpsc::Receiver<ServerEvent>,
    peer_id: PeerId,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let text = tokio::select! {
            Some(text) = responses.recv() => text,
            Some(event) = events.recv() => match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(
                        peer_id = %peer_id,
                        event = event.name(),
                        error = %e,
                        "Failed to encode event"
                    );
                    continue;
                }
            },
            else => break,
        };

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            debug!(peer_id = %peer_id, error = %e, "Failed to send WebSocket message");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfu_signaling::ProducerId;

    #[tokio::test]
    async fn test_writer_flushes_queued_messages_after_close() {
        let (response_tx, response_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(8);
        let (sink, socket) = futures::channel::mpsc::unbounded::<Message>();

        response_tx.send("{\"id\":1,\"ok\":true}".to_string()).await.unwrap();
        event_tx
            .send(ServerEvent::RemoteProducer {
                producer_id: ProducerId::from("p1"),
            })
            .await
            .unwrap();
        drop(response_tx);
        drop(event_tx);

        let writer = tokio::spawn(write_loop(sink, response_rx, event_rx, PeerId::from("alice")));
        assert!(drain_writer(writer, Duration::from_secs(5)).await);

        let texts: Vec<String> = socket
            .filter_map(|message| async move {
                match message {
                    Message::Text(text) => Some(text.as_str().to_string()),
                    _ => None,
                }
            })
            .collect()
            .await;
        assert_eq!(texts.len(), 2);
        assert!(texts.iter().any(|t| t.contains("remoteProducer")));
        assert!(texts.iter().any(|t| t.contains("\"id\":1")));
    }

    #[tokio::test]
    async fn test_stuck_writer_is_aborted() {
        let writer = tokio::spawn(std::future::pending::<()>());
        assert!(!drain_writer(writer, Duration::from_millis(10)).await);
    }
}
