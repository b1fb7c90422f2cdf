use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use lobby_types::ChatError;
use lobby_types::events::{ClientCommand, ServerEvent};
use lobby_types::models::Identity;

use crate::router::ChatRouter;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive a WebSocket whose credential was already verified at the HTTP
/// upgrade. Runs until the client goes away, then removes the connection
/// from every room it joined.
pub async fn handle_connection(socket: WebSocket, router: ChatRouter, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();
    let registry = router.registry().clone();

    let (conn_id, mut outbound_rx) = registry.register(identity.clone());
    info!(
        "{} ({}) connected to gateway [conn={}]",
        identity.user_name, identity.user_id, conn_id
    );

    registry.send_to(
        conn_id,
        &ServerEvent::Ready {
            user_id: identity.user_id.clone(),
            user_name: identity.user_name.clone(),
            connection_id: conn_id,
        },
    );

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                payload = outbound_rx.recv() => {
                    let Some(payload) = payload else { break };
                    if sender.send(Message::Text(payload.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client, one at a time
    let recv_identity = identity.clone();
    let recv_registry = registry.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let result = match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(cmd) => router.handle(conn_id, &recv_identity, cmd).await,
                        Err(e) => {
                            warn!(
                                "{} ({}) bad command: {} -- raw: {}",
                                recv_identity.user_name,
                                recv_identity.user_id,
                                e,
                                text.chars().take(200).collect::<String>()
                            );
                            Err(ChatError::ValidationFailed(format!("malformed command: {}", e)))
                        }
                    };

                    if let Err(e) = result {
                        recv_registry.send_to(conn_id, &error_event(&e));
                    }
                }
                Message::Binary(_) => {
                    recv_registry.send_to(
                        conn_id,
                        &error_event(&ChatError::ValidationFailed(
                            "binary frames are not supported".into(),
                        )),
                    );
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let rooms = registry.disconnect(conn_id);
    info!(
        "{} ({}) disconnected from gateway [conn={}, rooms={}]",
        identity.user_name,
        identity.user_id,
        conn_id,
        rooms.len()
    );
}

pub fn error_event(err: &ChatError) -> ServerEvent {
    ServerEvent::Error {
        code: err.code().to_string(),
        message: err.public_message(),
    }
}
