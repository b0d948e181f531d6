use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tracing::debug;

use crate::hub::SubscriberHub;
use crate::web::AppState;

/// Upgrades a subscriber connection for one room. The room id is a
/// channel id for live captions or a meeting id for VOD playback.
pub async fn subscribe_room(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, state.hub.clone()))
}

/// Forwards hub events to the socket. Inbound client frames only keep
/// the connection alive and are otherwise ignored; delivery is one-way.
async fn handle_socket(mut socket: WebSocket, room_id: String, hub: SubscriberHub) {
    let (client_id, mut rx) = hub.connect(&room_id).await;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(event) = outbound else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.disconnect(&room_id, client_id).await;
    debug!("Subscriber socket for room {} closed", room_id);
}
