//! WebSocket upgrade handler and per-connection tasks.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt, future};
use tracing::{debug, info, warn};

use relay_core::error::AppError;
use relay_realtime::connection::close::CloseReason;
use relay_realtime::connection::handle::SessionHandle;
use relay_realtime::connection::writer::run_writer;

use crate::error::ApiError;
use crate::extractors::ForwardedUser;
use crate::state::AppState;

/// GET /ws: WebSocket upgrade
pub async fn ws_upgrade(
    State(state): State<AppState>,
    user: ForwardedUser,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if !state.node.connections.is_accepting() {
        return Err(AppError::service_unavailable("Node is shutting down").into());
    }

    let response = match user.0 {
        Some(user_id) => ws.on_upgrade(move |socket| handle_socket(state, user_id, socket)),
        None => ws.on_upgrade(reject_socket),
    };
    Ok(response)
}

/// Close a connection that arrived without an identity.
async fn reject_socket(mut socket: WebSocket) {
    debug!("Rejecting WebSocket without user id");
    let _ = socket.send(close_message(&CloseReason::missing_identity())).await;
}

/// Runs an established connection until either side ends it.
async fn handle_socket(state: AppState, user_id: String, mut socket: WebSocket) {
    let connections = state.node.connections.clone();

    let session = match connections.open(&user_id) {
        Ok(session) => session,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Failed to open session");
            let _ = socket.send(close_message(&CloseReason::shutdown())).await;
            return;
        }
    };
    let session_id = session.id;

    let (ws_tx, mut ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(session, ws_tx));

    let writer_done = loop {
        tokio::select! {
            _ = &mut writer => break true,
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    connections.handle_text(&session_id, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => connections.handle_binary(&session_id),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    connections.touch(&session_id);
                }
                Some(Ok(Message::Close(_))) | None => {
                    connections.close_session(&session_id, CloseReason::client_gone());
                    break false;
                }
                Some(Err(e)) => {
                    debug!(session_id = %session_id, error = %e, "WebSocket read failed");
                    connections.close_session(&session_id, CloseReason::client_gone());
                    break false;
                }
            },
        }
    };

    if writer_done {
        let reason = if connections.is_accepting() {
            CloseReason::client_gone()
        } else {
            CloseReason::shutdown()
        };
        connections.close_session(&session_id, reason);
    } else if tokio::time::timeout(state.config.realtime.drain_timeout(), &mut writer)
        .await
        .is_err()
    {
        warn!(session_id = %session_id, "Writer did not finish in time");
        writer.abort();
    }

    info!(session_id = %session_id, user_id = %user_id, "WebSocket connection finished");
}

/// Drain the session queue into the socket, then send the close frame.
async fn write_loop(
    session: Arc<SessionHandle>,
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
) {
    let sink = (&mut ws_tx).with(|text: String| {
        future::ready(Ok::<_, axum::Error>(Message::Text(text.into())))
    });
    let reason = run_writer(session, sink).await;

    if let Some(reason) = reason {
        let _ = ws_tx.send(close_message(&reason)).await;
    }
    let _ = ws_tx.close().await;
}

fn close_message(reason: &CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code,
        reason: reason.reason.clone().into(),
    }))
}
