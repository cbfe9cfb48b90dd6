use std::time::Duration;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::{debug, info, warn};

use ladder_types::CommunityId;
use ladder_types::events::Notification;

use crate::state::AppState;

/// Server sends a Ping on this period; a peer that never answers is dropped
/// after two missed Pongs.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only forward events of this community.
    pub community: Option<CommunityId>,
}

pub async fn events_upgrade(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let events = state.engine.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, events, query.community))
}

async fn forward_events(socket: WebSocket, mut events: Receiver<Notification>, filter: Option<CommunityId>) {
    let (mut sender, mut receiver) = socket.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut awaiting_pong = false;
    let mut missed_heartbeats: u8 = 0;

    info!("Event subscriber connected");
    loop {
        tokio::select! {
            result = events.recv() => {
                let event = match result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Event subscriber lagged by {} events", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if filter.is_some_and(|c| c != event.community()) {
                    continue;
                }
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                        missed_heartbeats = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Event socket error: {}", e);
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if awaiting_pong {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout, dropping event subscriber");
                        break;
                    }
                }
                awaiting_pong = true;
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    info!("Event subscriber disconnected");
}
