use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::models::FinalLevel;

use super::rest::SignalDto;
use super::AppState;

#[derive(Deserialize)]
pub struct StreamQuery {
    /// Optional comma-separated ticker filter
    #[serde(default)]
    tickers: String,
}

/// Server-pushed signal stream: red-level signals only, JSON per frame
pub async fn stream_signals(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let filter: HashSet<String> = query
        .tickers
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    ws.on_upgrade(move |socket| handle_stream(socket, state, filter))
}

async fn handle_stream(mut socket: WebSocket, state: Arc<AppState>, filter: HashSet<String>) {
    let mut receiver = state.broadcast.subscribe();
    tracing::info!(
        "Signal stream client connected (filter: {})",
        if filter.is_empty() {
            "all".to_string()
        } else {
            filter.iter().cloned().collect::<Vec<_>>().join(",")
        }
    );

    loop {
        tokio::select! {
            signal = receiver.recv() => {
                let signal = match signal {
                    Ok(s) => s,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Stream client lagged, {} signal(s) dropped", missed);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                // The channel carries whatever the scanner funnels in;
                // the stream contract is red-only.
                if signal.final_level != FinalLevel::Red {
                    continue;
                }
                if !filter.is_empty() && !filter.contains(&signal.ticker) {
                    continue;
                }

                let dto = SignalDto::from(signal);
                let payload = match serde_json::to_string(&dto) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::error!("Failed to serialize stream signal: {}", e);
                        continue;
                    }
                };

                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Client pings and text are ignored; None means gone
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
        }
    }

    tracing::info!("Signal stream client disconnected");
}
