//! Subscriber hub
//!
//! Per-room fan-out of caption events to browser WebSocket clients, plus
//! a short caption history so late joiners catch up. Each client is an
//! unbounded sender drained by its socket task; a failed send means the
//! client went away and it is removed. Delivery never blocks on a slow
//! client and a failing client never aborts the broadcast to the rest.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::models::{RoomMessage, Subtitle};

/// Captions kept per room for late joiners.
const HISTORY_CAPACITY: usize = 200;

pub type ClientSender = mpsc::UnboundedSender<RoomMessage>;
pub type ClientReceiver = mpsc::UnboundedReceiver<RoomMessage>;

struct Client {
    id: Uuid,
    tx: ClientSender,
}

#[derive(Default)]
struct HubInner {
    rooms: HashMap<String, Vec<Client>>,
    history: HashMap<String, VecDeque<Subtitle>>,
}

#[derive(Clone, Default)]
pub struct SubscriberHub {
    inner: Arc<RwLock<HubInner>>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client to a room and immediately delivers the stored
    /// caption history. Returns the client id for `disconnect` and the
    /// receiver its socket task drains.
    pub async fn connect(&self, room_id: &str) -> (Uuid, ClientReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let mut inner = self.inner.write().await;
        let subtitles: Vec<Subtitle> = inner
            .history
            .get(room_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default();
        let _ = tx.send(RoomMessage::History { subtitles });

        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .push(Client { id, tx });
        debug!("Subscriber {} joined room {}", id, room_id);
        (id, rx)
    }

    pub async fn disconnect(&self, room_id: &str, client_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(clients) = inner.rooms.get_mut(room_id) {
            clients.retain(|c| c.id != client_id);
            if clients.is_empty() {
                inner.rooms.remove(room_id);
            }
        }
        debug!("Subscriber {} left room {}", client_id, room_id);
    }

    /// Appends the caption to the room history (FIFO-trimmed) and
    /// delivers a `subtitle_created` event to every client.
    pub async fn broadcast_created(&self, room_id: &str, subtitle: Subtitle) {
        let mut inner = self.inner.write().await;
        let history = inner.history.entry(room_id.to_string()).or_default();
        history.push_back(subtitle.clone());
        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }
        Self::deliver(&mut inner.rooms, room_id, RoomMessage::Created { subtitle });
    }

    /// Delivers an interim preview. Never stored.
    pub async fn broadcast_interim(&self, room_id: &str, text: String) {
        let mut inner = self.inner.write().await;
        let msg = RoomMessage::Interim {
            text,
            channel_id: room_id.to_string(),
        };
        Self::deliver(&mut inner.rooms, room_id, msg);
    }

    /// Patches the matching history entry (keeping the original text in a
    /// side field), then delivers a `subtitle_corrected` event.
    pub async fn broadcast_corrected(&self, room_id: &str, id: Uuid, corrected_text: String) {
        let mut inner = self.inner.write().await;
        if let Some(history) = inner.history.get_mut(room_id) {
            if let Some(entry) = history.iter_mut().find(|s| s.id == id) {
                if entry.original_text.is_none() {
                    entry.original_text = Some(entry.text.clone());
                }
                entry.text = corrected_text.clone();
            }
        }
        Self::deliver(
            &mut inner.rooms,
            room_id,
            RoomMessage::Corrected { id, corrected_text },
        );
    }

    /// Drops the room's caption history (invoked on worker stop).
    pub async fn clear_history(&self, room_id: &str) {
        let mut inner = self.inner.write().await;
        inner.history.remove(room_id);
    }

    pub async fn history(&self, room_id: &str) -> Vec<Subtitle> {
        let inner = self.inner.read().await;
        inner
            .history
            .get(room_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn subscriber_count(&self, room_id: &str) -> usize {
        let inner = self.inner.read().await;
        inner.rooms.get(room_id).map(|c| c.len()).unwrap_or(0)
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.rooms.keys().cloned().collect()
    }

    fn deliver(rooms: &mut HashMap<String, Vec<Client>>, room_id: &str, msg: RoomMessage) {
        let Some(clients) = rooms.get_mut(room_id) else {
            return;
        };
        clients.retain(|client| client.tx.send(msg.clone()).is_ok());
        if clients.is_empty() {
            rooms.remove(room_id);
        }
    }
}
