/// WebSocket handler for pushing usage updates

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::time::interval;
use tracing::debug;

use super::handlers::UsageReport;
use super::AppState;

/// WebSocket handler streaming a usage report every polling interval
pub async fn ws_usage_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_usage_websocket(socket, state))
}

async fn handle_usage_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let mut interval = interval(state.profiler.config().interval);
    debug!("usage websocket opened");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = UsageReport::collect(&state, state.window);
                if let Ok(json) = serde_json::to_string(&report) {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    debug!("usage websocket closed");
}
