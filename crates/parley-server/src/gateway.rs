//! WebSocket gateway: handshake, frame decoding and the per-socket writer.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use parley_shared::constants::WS_PING_INTERVAL_SECS;
use parley_shared::protocol::ClientFrame;
use parley_shared::types::UserId;
use parley_shared::AuthError;

use crate::api::AppState;
use crate::error::ServerError;
use crate::identity::bearer_credential;

#[derive(Debug, Default, Deserialize)]
pub struct HandshakeParams {
    token: Option<String>,
}

/// The credential from the `Authorization` header, else from `?token=`.
pub(crate) fn credential<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_credential)
        .or(query.filter(|t| !t.is_empty()))
}

/// Authenticate before upgrading. A bad or missing credential is a 401 and
/// no session is ever registered.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HandshakeParams>,
) -> Response {
    let Some(token) = credential(&headers, params.token.as_deref()) else {
        warn!("WebSocket handshake without credential");
        return ServerError::Unauthorized(AuthError::InvalidCredential("missing credential".into()))
            .into_response();
    };

    let user = match state.hub.authenticate(token) {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake rejected");
            return ServerError::Unauthorized(e).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserId) {
    let hub = state.hub.clone();
    let (ctx, mut outbound) = hub.connect(user).await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let session = ctx.session_id;
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping.tick().await;

        loop {
            tokio::select! {
                next = outbound.recv() => {
                    let Some(envelope) = next else { break };
                    let text = match envelope.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(session = %session, error = %e, "Failed to encode event");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(session = %session, "Writer stopped");
    });

    while let Some(next) = ws_receiver.next().await {
        match next {
            Ok(Message::Text(text)) => match ClientFrame::from_json(&text) {
                Ok(frame) => hub.dispatch(&ctx, frame).await,
                Err(e) => warn!(user = %ctx.user_id, session = %session, error = %e, "Malformed frame ignored"),
            },
            Ok(Message::Binary(_)) => {
                debug!(session = %session, "Binary frame ignored");
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                debug!(session = %session, error = %e, "WebSocket read error");
                break;
            }
        }
    }

    hub.disconnect(&ctx).await;
    writer.abort();
    info!(user = %ctx.user_id, session = %session, "WebSocket closed");
}
