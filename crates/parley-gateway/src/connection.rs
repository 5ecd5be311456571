use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::api::Claims;
use parley_types::events::{ClientCommand, GatewayEvent, RoomId};
use parley_types::models::PresenceStatus;

use crate::Gateway;

/// The first frame must be an identify command carrying a valid token.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive a single WebSocket connection from handshake to teardown.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: authenticated handshake, before the connection is registered.
    let claims = match wait_for_identify(&mut receiver, &gateway).await {
        Some(claims) => claims,
        None => {
            warn!("websocket client failed to identify, closing");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let user_id = claims.sub;
    info!("{} ({}) connected to gateway", claims.username, user_id);

    // Step 2: confirm the handshake.
    if send_event(&mut sender, &GatewayEvent::Ready { user_id })
        .await
        .is_err()
    {
        return;
    }

    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.registry.register(conn_id, user_id, tx).await;

    // Replay who is already online so this client starts with a full view.
    for online in gateway.presence.online_users().await {
        if online == user_id {
            continue;
        }
        let event = GatewayEvent::UserStatusChange {
            user_id: online,
            status: PresenceStatus::Online,
        };
        if send_event(&mut sender, &event).await.is_err() {
            gateway.registry.unregister(conn_id).await;
            return;
        }
    }

    // First connection flips the user online and broadcasts once.
    gateway.presence.on_connect(user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward routed events to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
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

    // Read commands from the client, strictly in arrival order — the
    // single consumer is what preserves per-connection event ordering.
    let gateway_recv = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(&gateway_recv, conn_id, user_id, cmd).await,
                    Err(e) => {
                        warn!(%user_id, error = %e, "bad command");
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Teardown runs even after an abrupt disconnect. In-flight operations
    // may still complete; their fan-out simply no longer finds this
    // connection's room memberships.
    if gateway.registry.unregister(conn_id).await.is_some() {
        gateway.presence.on_disconnect(user_id).await;
    }
    info!("{} disconnected from gateway", user_id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    gateway: &Gateway,
) -> Option<Claims> {
    let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientCommand::Identify { token }) =
                    serde_json::from_str::<ClientCommand>(&text)
                {
                    return match gateway.verifier.verify(&token) {
                        Ok(claims) => Some(claims),
                        Err(e) => {
                            warn!(error = %e, "websocket handshake rejected");
                            None
                        }
                    };
                }
            }
        }
        None
    });

    handshake.await.ok().flatten()
}

async fn handle_command(gateway: &Gateway, conn_id: Uuid, user_id: Uuid, cmd: ClientCommand) {
    let outcome = match cmd {
        ClientCommand::Identify { .. } => Ok(()), // already handled

        ClientCommand::Join(_) => {
            // Clients join their own room; the authenticated id wins over
            // whatever the payload claims.
            gateway
                .registry
                .join_room(conn_id, RoomId::User(user_id))
                .await;
            Ok(())
        }

        ClientCommand::JoinGroup(group_id) => {
            gateway
                .registry
                .join_room(conn_id, RoomId::Group(group_id))
                .await;
            Ok(())
        }

        ClientCommand::SendMessage(req) => {
            gateway.engine.send_message(user_id, req).await.map(drop)
        }

        ClientCommand::MarkAsRead { message_id } => {
            gateway.engine.mark_read(user_id, message_id).await.map(drop)
        }

        ClientCommand::Typing(target) => gateway.engine.typing(user_id, target, true).await,

        ClientCommand::StopTyping(target) => gateway.engine.typing(user_id, target, false).await,

        ClientCommand::PinMessage { message_id } => {
            gateway.engine.toggle_pin(user_id, message_id).await.map(drop)
        }

        ClientCommand::CreatePoll(req) => {
            gateway.engine.create_poll(user_id, req).await.map(drop)
        }

        ClientCommand::VotePoll(req) => gateway.engine.vote_poll(user_id, req).await.map(drop),
    };

    // Over the socket, failed operations are dropped silently — the other
    // party never sees a partial event. The log line is for operators.
    if let Err(e) = outcome {
        debug!(%user_id, error = %e, "dropped socket command");
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap();
    sender.send(Message::Text(text.into())).await
}
