/// WebSocket endpoints (§6, §10.6): `/price` streams the eligible-watchlist
/// or open-position feed; `/status` streams the engine status snapshot.
/// Both authenticate via a `?token=` query parameter (a `WebSocketUpgrade`
/// handler can't run the `AuthBearer` header extractor before the upgrade)
/// and then run a `tokio::select!` loop pushing broadcast messages out while
/// accepting client frames.
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

async fn token_valid(state: &Arc<AppState>, token: &Option<String>) -> bool {
    let Some(token) = token else { return false };
    match state.session_token.read().await.as_deref() {
        Some(expected) => expected == token,
        None => false,
    }
}

pub async fn price_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if !token_valid(&state, &query.token).await {
        warn!("price websocket rejected: invalid token");
        return (axum::http::StatusCode::FORBIDDEN, "invalid or missing token").into_response();
    }

    ws.on_upgrade(move |socket| handle_price_connection(socket, state)).into_response()
}

pub async fn status_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if !token_valid(&state, &query.token).await {
        warn!("status websocket rejected: invalid token");
        return (axum::http::StatusCode::FORBIDDEN, "invalid or missing token").into_response();
    }

    ws.on_upgrade(move |socket| handle_status_connection(socket, state)).into_response()
}

async fn handle_price_connection(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.telemetry.subscribe_price();
    let mut paused = false;
    info!("price websocket connected");

    loop {
        tokio::select! {
            sent = rx.recv() => {
                match sent {
                    Ok(payload) if !paused => {
                        let Ok(json) = serde_json::to_string(&payload) else { continue };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match text.as_str() {
                            "stop_feed" => { debug!("price feed paused by client"); paused = true; }
                            "start_feed" => { debug!("price feed resumed by client"); paused = false; }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "price websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    info!("price websocket disconnected");
}

async fn handle_status_connection(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.telemetry.subscribe_status();
    let mut paused = false;
    info!("status websocket connected");

    loop {
        tokio::select! {
            sent = rx.recv() => {
                match sent {
                    Ok(snapshot) if !paused => {
                        let Ok(json) = serde_json::to_string(&snapshot) else { continue };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match text.as_str() {
                            "stop_feed" => { debug!("status feed paused by client"); paused = true; }
                            "start_feed" => { debug!("status feed resumed by client"); paused = false; }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "status websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    info!("status websocket disconnected");
}
