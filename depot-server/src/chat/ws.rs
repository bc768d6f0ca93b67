//! Chat WebSocket endpoint
//!
//! GET /ws/chat?token=<JWT>
//! Auth: 令牌通过 query parameter 传递（浏览器 WebSocket 不支持自定义 headers）
//!
//! 协议:
//! - Client → Server: [`ClientEvent`]
//! - Server → Client: [`ServerEvent`]

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use shared::{AppError, ClientEvent, ServerEvent};
use tokio::time::Duration;

use super::error::error_frame;
use super::hub::ChatHub;
use crate::auth::CurrentUser;
use crate::core::ServerState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    token: Option<String>,
}

/// GET /ws/chat?token=<JWT>
///
/// 凭证在升级前解析，失败直接返回 401，不建立任何会话
pub async fn handle_chat_ws(
    State(state): State<ServerState>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let user = state.chat_hub.authenticate(query.token.as_deref()).await?;
    let hub = state.chat_hub.clone();
    Ok(ws.on_upgrade(move |socket| chat_ws_session(socket, hub, user)))
}

async fn chat_ws_session(socket: WebSocket, hub: Arc<ChatHub>, user: CurrentUser) {
    let (mut sink, mut stream) = socket.split();

    let mut session = match hub.attach(user).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Chat session setup failed");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    let connection_id = session.connection_id;
    let user_id = session.user.id;

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // skip immediate

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }

            event = session.receiver.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => hub.handle(connection_id, &session.user, event).await,
                            Err(e) => {
                                if send_event(&mut sink, &malformed_frame(&e)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    hub.disconnect(connection_id, user_id);
}

async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}

/// 无法解析的客户端帧: 连接保持打开
fn malformed_frame(err: &serde_json::Error) -> ServerEvent {
    error_frame(
        &AppError::validation(format!("Malformed event: {}", err)),
        None,
        false,
    )
}
