//! WebSocket upgrade and the transport adapters that connect an axum
//! socket to the session engine.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rill_engine::{run_listening_session, ListenerSink, ListenerStream, SessionError};

use crate::GatewayState;

pub(crate) async fn handle_listen_ws_upgrade(
    State(state): State<Arc<GatewayState>>,
    Path((campaign_id, listener_address)): Path<(u64, String)>,
    websocket: WebSocketUpgrade,
) -> Response {
    websocket.on_upgrade(move |socket| {
        run_listener_connection(state, socket, campaign_id, listener_address)
    })
}

async fn run_listener_connection(
    state: Arc<GatewayState>,
    socket: WebSocket,
    campaign_id: u64,
    listener_address: String,
) {
    let (sender, receiver) = socket.split();
    let sink: Arc<dyn ListenerSink> = Arc::new(WsListenerSink {
        sender: tokio::sync::Mutex::new(sender),
    });
    let stream = WsListenerStream { receiver };

    let deps = state.session_deps();
    let result = run_listening_session(
        &deps,
        &state.session_config,
        campaign_id,
        &listener_address,
        stream,
        sink,
    )
    .await;

    match result {
        Ok(outcome) => tracing::info!(
            campaign_id,
            listener_address,
            reason = outcome.reason.as_str(),
            earned_amount = outcome.settlement.earned_amount,
            "listener connection finished"
        ),
        Err(SessionError::Precondition(failure)) => {
            tracing::info!(campaign_id, listener_address, %failure, "listener connection rejected")
        }
        Err(error) => {
            tracing::error!(campaign_id, listener_address, %error, "listener connection failed")
        }
    }
}

struct WsListenerStream {
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl ListenerStream for WsListenerStream {
    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            let message = match self.receiver.next().await? {
                Ok(message) => message,
                Err(error) => return Some(Err(error.into())),
            };
            match message {
                WsMessage::Text(text) => return Some(Ok(text.to_string())),
                WsMessage::Binary(bytes) => {
                    return Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|_| anyhow!("binary frame must be UTF-8 encoded text")),
                    )
                }
                // Transport-level liveness is handled by axum itself.
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                WsMessage::Close(_) => return None,
            }
        }
    }
}

struct WsListenerSink {
    sender: tokio::sync::Mutex<SplitSink<WebSocket, WsMessage>>,
}

#[async_trait]
impl ListenerSink for WsListenerSink {
    async fn send_text(&self, text: String) -> Result<()> {
        let mut sender = self.sender.lock().await;
        sender
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(Into::into)
    }

    async fn close(&self, code: u16) -> Result<()> {
        let mut sender = self.sender.lock().await;
        sender
            .send(WsMessage::Close(Some(CloseFrame {
                code,
                reason: "".into(),
            })))
            .await
            .map_err(Into::into)
    }
}
