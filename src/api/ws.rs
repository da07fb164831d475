//! `/ws-fraud` push endpoint — §6.
//!
//! A single socket multiplexes both Push Bus topics, tagging each frame
//! with `/topic/queue` or `/topic/stats` the way the reference backend's
//! WebSocket handler tags signal frames by symbol. Delivery is best-effort:
//! a subscriber that lags behind the broadcast channel's capacity just
//! misses frames (§4.7) and is expected to reconcile via the REST GETs.

use super::ApiState;
use crate::push::PushFrame;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::debug;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ApiState) {
    let mut case_rx = state.push_bus.subscribe_case_events();
    let mut stats_rx = state.push_bus.subscribe_stats();

    loop {
        tokio::select! {
            case = case_rx.recv() => {
                let Ok(case) = case else { continue };
                let frame = PushFrame::CaseEvents(case);
                let Ok(text) = serde_json::to_string(&frame) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            stats = stats_rx.recv() => {
                let Ok(stats) = stats else { continue };
                let frame = PushFrame::Stats(stats);
                let Ok(text) = serde_json::to_string(&frame) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "ws-fraud socket error");
                        break;
                    }
                }
            }
        }
    }
}
