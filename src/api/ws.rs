// WebSocket connection fan-out: inbound frame dispatch and broadcast
// forwarding for one client.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde::Deserialize;

use crate::engine::config::VIEWPORT_DEFAULT_EXTENT;
use crate::engine::game::ActionKind;
use crate::engine::server::FrameOutput;

use super::AppState;

/// Client color preference: a bare hue or an HSL string like
/// `hsl(210, 80%, 60%)`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ColorPref {
    Hue(u16),
    Text(String),
}

impl ColorPref {
    /// Resolve to a hue in 0..360. Unparseable strings fall back to the
    /// default hue.
    pub fn hue(&self) -> u16 {
        match self {
            ColorPref::Hue(h) => h % 360,
            ColorPref::Text(s) => {
                let digits: String = s
                    .chars()
                    .skip_while(|c| !c.is_ascii_digit())
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                digits
                    .parse::<u16>()
                    .map(|h| h % 360)
                    .unwrap_or(crate::engine::config::DEFAULT_HUE)
            }
        }
    }
}

/// Messages accepted from clients. Unknown topics and malformed payloads
/// are dropped with a warning; the client is not notified.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "player-preferences", rename_all = "camelCase")]
    PlayerPreferences {
        name: String,
        color: Option<ColorPref>,
        session_id: Option<String>,
        session_token: Option<String>,
    },
    #[serde(rename = "player-action", rename_all = "camelCase")]
    PlayerAction {
        action: ActionKind,
        x: i32,
        y: i32,
        session_id: Option<String>,
        session_token: Option<String>,
        viewport_width: Option<u32>,
        viewport_height: Option<u32>,
    },
    #[serde(rename = "security-dashboard", rename_all = "camelCase")]
    SecurityDashboard { admin_key: String },
    #[serde(rename = "disconnect")]
    Disconnect,
}

/// WebSocket upgrade handler.
pub async fn ws_game(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let server = state.server;
    let conn = server.register_connection();
    let mut rx = server.subscribe();

    // Forward broadcast frames and dispatch inbound frames until the client
    // goes away. A broadcast the client cannot keep up with is skipped, not
    // queued forever.
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if socket.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(conn, "WebSocket client lagged, skipped {n} messages");
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
                        let message = match parsed {
                            Ok(m) => m,
                            Err(e) => {
                                tracing::warn!(conn, "Dropping malformed frame: {e}");
                                continue;
                            }
                        };
                        if matches!(message, ClientMessage::Disconnect) {
                            break;
                        }
                        let output = dispatch(&server, conn, message);
                        let mut client_gone = false;
                        for unicast in &output.unicast {
                            match serde_json::to_string(unicast) {
                                Ok(json) => {
                                    if socket.send(Message::Text(json.into())).await.is_err() {
                                        client_gone = true;
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::error!(conn, "Failed to serialize frame: {e}");
                                }
                            }
                        }
                        if client_gone || output.disconnect {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary and ping/pong frames are ignored
                    }
                    Some(Err(_)) => {
                        break;
                    }
                }
            }
        }
    }

    server.handle_disconnect(conn);
}

fn dispatch(
    server: &crate::engine::server::GameServer,
    conn: u64,
    message: ClientMessage,
) -> FrameOutput {
    match message {
        ClientMessage::PlayerPreferences {
            name,
            color,
            session_id,
            session_token,
        } => {
            let hue = color
                .map(|c| c.hue())
                .unwrap_or(crate::engine::config::DEFAULT_HUE);
            server.handle_welcome(
                conn,
                &name,
                hue,
                session_id.as_deref(),
                session_token.as_deref(),
            )
        }
        ClientMessage::PlayerAction {
            action,
            x,
            y,
            session_id,
            session_token,
            viewport_width,
            viewport_height,
        } => {
            // Clients send full viewport dimensions; the materializer works
            // in half-extents.
            let tiles_x = viewport_width
                .map(|w| (w / 2) as usize)
                .unwrap_or(VIEWPORT_DEFAULT_EXTENT);
            let tiles_y = viewport_height
                .map(|h| (h / 2) as usize)
                .unwrap_or(VIEWPORT_DEFAULT_EXTENT);
            server.handle_action(conn, action, x, y, session_id, session_token, tiles_x, tiles_y)
        }
        ClientMessage::SecurityDashboard { admin_key } => server.handle_dashboard(&admin_key),
        ClientMessage::Disconnect => FrameOutput {
            unicast: Vec::new(),
            disconnect: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_pref_hue() {
        let hue: ColorPref = serde_json::from_str("210").unwrap();
        assert_eq!(hue.hue(), 210);
        let wrapped: ColorPref = serde_json::from_str("400").unwrap();
        assert_eq!(wrapped.hue(), 40);
        let hsl: ColorPref = serde_json::from_str("\"hsl(210, 80%, 60%)\"").unwrap();
        assert_eq!(hsl.hue(), 210);
        let junk: ColorPref = serde_json::from_str("\"rebeccapurple\"").unwrap();
        assert_eq!(junk.hue(), crate::engine::config::DEFAULT_HUE);
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"player-action","action":"flip","x":3,"y":4,"sessionId":"abc","sessionToken":"def","viewportWidth":40,"viewportHeight":30}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::PlayerAction {
                action,
                x,
                y,
                session_id,
                viewport_width,
                ..
            } => {
                assert_eq!(action, ActionKind::Flip);
                assert_eq!((x, y), (3, 4));
                assert_eq!(session_id.as_deref(), Some("abc"));
                assert_eq!(viewport_width, Some(40));
            }
            other => panic!("unexpected parse: {other:?}"),
        }

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"player-preferences","name":"alice","color":120}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::PlayerPreferences { .. }));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"warp","x":1}"#).is_err());
    }
}
