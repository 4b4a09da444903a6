//! WebSocket relay: a full-duplex tunnel between the client
//! and the provider's data plane, two pumps raced with `tokio::select!` —
//! the same "loser cancelled" shape this codebase already uses for its own
//! outbound relay client, turned around to face an inbound client and an
//! outbound upstream.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::{info, warn};

use crate::error::SsapError;
use crate::model::SessionRecord;
use crate::relay::{authorize, extract_client_token};
use crate::AppState;

const AUTH_FAILURE_CLOSE_CODE: u16 = 4401;

fn to_ws_url(dataplane_url: &str) -> String {
    if let Some(rest) = dataplane_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = dataplane_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        dataplane_url.to_string()
    }
}

pub async fn execute_ws(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(e) = state.config.require_enabled() {
        return e.into_response();
    }

    let token = extract_client_token(&headers);

    ws.on_upgrade(move |socket| async move {
        let token = match token {
            Some(t) => t,
            None => {
                close_with_error_frame(socket, &SsapError::Unauthenticated).await;
                return;
            }
        };

        match authorize(&state, &session_id, &token, "execute").await {
            Ok((_claims, record)) => {
                run_tunnel(socket, &state, &record).await;
            }
            Err(e) => close_with_error_frame(socket, &e).await,
        }
    })
}

/// Best-effort: send a JSON error frame, then a close frame, ignoring any
/// send failure — the client may already be gone.
async fn close_with_error_frame(mut socket: WebSocket, err: &SsapError) {
    let frame = serde_json::json!({
        "type": "error",
        "error_type": "RelayError",
        "error": err.to_string(),
    });
    let _ = socket.send(AxumMessage::Text(frame.to_string())).await;
    let _ = socket
        .send(AxumMessage::Close(Some(CloseFrame {
            code: AUTH_FAILURE_CLOSE_CODE,
            reason: err.to_string().into(),
        })))
        .await;
}

/// Connect to the upstream data plane and, on success, pump frames between
/// it and `client_socket` until either side closes. On any setup failure the
/// client socket is still intact (never split) so the caller can report the
/// error over it instead of just dropping the connection.
async fn run_tunnel(client_socket: WebSocket, state: &AppState, record: &SessionRecord) {
    let upstream = match connect_upstream(state, record).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(session_id = %record.session_id, err = %e, "relay: upstream setup failed");
            close_with_error_frame(client_socket, &e).await;
            return;
        }
    };

    let (mut upstream_sink, mut upstream_stream) = upstream.split();
    let (mut client_sink, mut client_stream) = client_socket.split();

    tokio::select! {
        _ = pump_client_to_upstream(&mut client_stream, &mut upstream_sink) => {
            info!(session_id = %record.session_id, "relay: client side closed first");
        }
        _ = pump_upstream_to_client(&mut upstream_stream, &mut client_sink) => {
            info!(session_id = %record.session_id, "relay: upstream side closed first");
        }
    }

    let _ = upstream_sink.close().await;
    let _ = client_sink.close().await;
}

async fn connect_upstream(
    state: &AppState,
    record: &SessionRecord,
) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, SsapError> {
    let upstream_url = format!("{}/execute/ws", to_ws_url(&record.dataplane_url));
    let mut request = upstream_url
        .into_client_request()
        .map_err(|e| SsapError::BackendUnavailable(format!("building upstream request: {e}")))?;
    let api_key = state
        .config
        .provider
        .api_key
        .parse()
        .map_err(|_| SsapError::BackendUnavailable("provider API key is not a valid header value".into()))?;
    request.headers_mut().insert("X-Api-Key", api_key);

    let config = WebSocketConfig {
        max_message_size: None,
        max_frame_size: None,
        ..Default::default()
    };

    let (upstream, _resp) = connect_async_with_config(request, Some(config), false)
        .await
        .map_err(|e| SsapError::BackendUnavailable(format!("connecting to upstream data plane: {e}")))?;
    Ok(upstream)
}

async fn pump_client_to_upstream(
    client_stream: &mut (impl Stream<Item = Result<AxumMessage, axum::Error>> + Unpin),
    upstream_sink: &mut (impl Sink<TungsteniteMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
) {
    while let Some(msg) = client_stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };
        let forwarded = match msg {
            AxumMessage::Text(text) => TungsteniteMessage::Text(text),
            AxumMessage::Binary(data) => TungsteniteMessage::Binary(data),
            AxumMessage::Ping(data) => TungsteniteMessage::Ping(data),
            AxumMessage::Pong(data) => TungsteniteMessage::Pong(data),
            AxumMessage::Close(_) => break,
        };
        if upstream_sink.send(forwarded).await.is_err() {
            break;
        }
    }
}

async fn pump_upstream_to_client(
    upstream_stream: &mut (impl Stream<Item = Result<TungsteniteMessage, tokio_tungstenite::tungstenite::Error>> + Unpin),
    client_sink: &mut (impl Sink<AxumMessage, Error = axum::Error> + Unpin),
) {
    while let Some(msg) = upstream_stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };
        let forwarded = match msg {
            TungsteniteMessage::Text(text) => AxumMessage::Text(text),
            TungsteniteMessage::Binary(data) => AxumMessage::Binary(data),
            TungsteniteMessage::Ping(data) => AxumMessage::Ping(data),
            TungsteniteMessage::Pong(data) => AxumMessage::Pong(data),
            TungsteniteMessage::Close(_) | TungsteniteMessage::Frame(_) => break,
        };
        if client_sink.send(forwarded).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_swaps_scheme() {
        assert_eq!(to_ws_url("http://sandbox.local:8080"), "ws://sandbox.local:8080");
        assert_eq!(to_ws_url("https://sandbox.local"), "wss://sandbox.local");
    }
}
