use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::location::LocationProvider;
use crate::state::AppState;

pub async fn fleet_feed(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let feed = state.fleet.changes();
    ws.on_upgrade(move |socket| forward_feed(socket, feed, "fleet"))
}

pub async fn ride_feed(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let feed = state.booking.changes();
    ws.on_upgrade(move |socket| forward_feed(socket, feed, "rides"))
}

pub async fn rider_feed(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let feed = state.rider_location.changes();
    ws.on_upgrade(move |socket| forward_feed(socket, feed, "rider"))
}

/// Pushes every feed value to the client as JSON until either side closes.
async fn forward_feed<S, T>(socket: WebSocket, mut feed: S, name: &'static str)
where
    S: Stream<Item = T> + Unpin + Send + 'static,
    T: Serialize + Send + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    info!(feed = name, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(value) = feed.next().await {
            let json = match serde_json::to_string(&value) {
                Ok(json) => json,
                Err(err) => {
                    warn!(feed = name, error = %err, "failed to serialize feed value for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(feed = name, "websocket client disconnected");
}
