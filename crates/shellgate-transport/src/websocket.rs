//! WebSocket transport for remote sessions.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        FromRequestParts, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::request::Parts,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    auth::{AuthError, Claims},
    gateway::Gateway,
    http::{ApiError, bearer_token},
    protocol::{ClientMessage, ErrorCode, ServerMessage},
};

/// How long a closed connection waits for its in-flight action to finish.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TokenParams {
    token: Option<String>,
}

/// Claims of an upgrade request.
///
/// Browsers cannot set headers on WebSocket requests, so `?token=` is
/// accepted alongside a bearer header.
pub struct WsAuthenticated(pub Claims);

impl FromRequestParts<Arc<Gateway>> for WsAuthenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, gateway: &Arc<Gateway>) -> Result<Self, Self::Rejection> {
        let from_query = Query::<TokenParams>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(params)| params.token)
            .filter(|t| !t.is_empty());
        let token = match from_query {
            Some(token) => token,
            None => bearer_token(&parts.headers)
                .ok_or(AuthError::MissingToken)?
                .to_string(),
        };

        gateway
            .authenticate(&token)
            .map(Self)
            .map_err(|e| {
                tracing::warn!("Rejected WebSocket connection: {e}");
                e.into()
            })
    }
}

/// WebSocket upgrade handler.
///
/// The token is checked before the upgrade, so unauthenticated clients never
/// get a session.
pub async fn ws_handler(
    WsAuthenticated(claims): WsAuthenticated,
    State(gateway): State<Arc<Gateway>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, claims))
}

async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, claims: Claims) {
    let lease = match gateway.open_session(&claims) {
        Ok(lease) => lease,
        Err(e) => {
            tracing::error!("Failed to open session: {e}");
            return;
        }
    };
    let connection_id = lease.id();
    tracing::info!(%connection_id, subject = %claims.sub, "Connection opened");

    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let _ = tx.send(ServerMessage::Connected(
        gateway.connected_info(lease.session()).await,
    ));

    // Actions run one at a time, in arrival order.
    let (action_tx, mut action_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let mut worker = {
        let gateway = Arc::clone(&gateway);
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(action) = action_rx.recv().await {
                let response = gateway.dispatch(connection_id, action, &tx).await;
                if tx.send(response).is_err() {
                    break;
                }
            }
        })
    };

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(%connection_id, "WebSocket error: {e}");
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Ping) => {
                let _ = tx.send(ServerMessage::Pong);
            }
            Ok(action) => {
                if action_tx.send(action).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(%connection_id, "Invalid client message: {e}");
                let _ = tx.send(ServerMessage::error(
                    None,
                    ErrorCode::InvalidMessage,
                    format!("Invalid message: {e}"),
                ));
            }
        }
    }

    // Destroying the session kills whatever it is still running.
    drop(action_tx);
    drop(lease);
    if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, &mut worker)
        .await
        .is_err()
    {
        tracing::warn!(%connection_id, "Worker did not stop in time, aborting");
        worker.abort();
    }
    send_task.abort();

    tracing::info!(%connection_id, "Connection closed");
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use chrono::Duration as TtlDuration;
    use shellgate_core::UnconfiguredAssistant;
    use shellgate_session::{SessionDefaults, SessionRegistry, history::MemoryHistory};
    use tower::ServiceExt;

    use super::*;
    use crate::{auth::TokenAuthority, http::router};

    const SECRET: &str = "websocket-test-credential-0123456789";

    fn gateway() -> Arc<Gateway> {
        let registry = Arc::new(SessionRegistry::new(SessionDefaults::new(std::env::temp_dir())));
        let authority = TokenAuthority::new(SECRET, b"ws-key", TtlDuration::hours(1)).unwrap();
        Arc::new(Gateway::new(
            registry,
            Arc::new(MemoryHistory::new()),
            Arc::new(UnconfiguredAssistant),
            authority,
        ))
    }

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_upgrade_without_token_is_rejected() {
        let gateway = gateway();
        let response = router(Arc::clone(&gateway))
            .oneshot(upgrade_request("/ws"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(gateway.registry().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_with_bad_token_is_rejected() {
        let gateway = gateway();
        let response = router(Arc::clone(&gateway))
            .oneshot(upgrade_request("/ws?token=not-a-jwt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(gateway.registry().is_empty());
    }
}
