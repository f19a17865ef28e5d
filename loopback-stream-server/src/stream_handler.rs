use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::watch;

use loopback_stream_core::{Broadcaster, DeviceDirectory, StreamError, StreamMessage};

use crate::AppState;

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Handles WebSocket upgrade requests to `/ws/audio`.
pub async fn stream_socket<D: DeviceDirectory + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<D>>,
) -> Response {
    let broadcaster = Arc::clone(state.session.broadcaster());
    let shutdown = state.shutdown.subscribe();
    ws.on_upgrade(move |socket| serve_subscriber(socket, broadcaster, shutdown))
}

/// How a subscriber connection ended.
enum Ending {
    /// The peer sent a close frame; the reply is queued by the transport.
    PeerClosed,
    /// The transport failed or vanished; nothing more can be sent.
    TransportLost,
    /// The server ends the connection with this close code.
    Server(u16),
}

/// Manages one subscriber connection.
///
/// 1. Registers with the broadcaster (queues the handshake if capturing).
/// 2. Forwards queued handshakes as text and audio as binary.
/// 3. Ignores peer payloads until the peer closes or the transport fails.
async fn serve_subscriber(mut socket: WebSocket, broadcaster: Arc<Broadcaster>, mut shutdown: watch::Receiver<bool>) {
    let mut subscription = broadcaster.register();
    let id = subscription.id();
    log::info!("Stream client {} connected ({} live)", id, broadcaster.live_count());

    let ending = if *shutdown.borrow() {
        Ending::Server(close_code::AWAY)
    } else {
        loop {
            tokio::select! {
                queued = subscription.recv() => {
                    let Some(queued) = queued else {
                        log::warn!("Stream client {} evicted", id);
                        break Ending::Server(close_code::AGAIN);
                    };

                    let frame = match queued {
                        StreamMessage::Handshake(format) => match serde_json::to_string(&format) {
                            Ok(text) => Message::Text(text.into()),
                            Err(e) => {
                                log::error!("Failed to encode handshake: {}", e);
                                continue;
                            }
                        },
                        StreamMessage::Audio(payload) => Message::Binary(payload),
                    };

                    if let Err(e) = socket.send(frame).await {
                        log::debug!("Stream client {}: {}", id, StreamError::TransportFailure(e.to_string()));
                        break Ending::TransportLost;
                    }
                }
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Close(_))) => break Ending::PeerClosed,
                    None => break Ending::TransportLost,
                    Some(Err(e)) => {
                        log::debug!("Stream client {}: {}", id, StreamError::TransportFailure(e.to_string()));
                        break Ending::TransportLost;
                    }
                    Some(Ok(_)) => {}
                },
                _ = shutdown.changed() => break Ending::Server(close_code::AWAY),
            }
        }
    };

    drop(subscription);
    log::info!("Stream client {} disconnected ({} live)", id, broadcaster.live_count());

    match ending {
        Ending::Server(code) => {
            let frame = CloseFrame {
                code,
                reason: "".into(),
            };
            if let Err(e) = socket.send(Message::Close(Some(frame))).await {
                log::debug!("Stream client {}: close not delivered: {}", id, e);
            }
        }
        // Reading once more flushes the automatic close reply.
        Ending::PeerClosed => {
            let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, socket.recv()).await;
        }
        Ending::TransportLost => {}
    }
}
