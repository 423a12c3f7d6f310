//! Per-connection socket task.
//!
//! One task per admitted WebSocket: it pumps the registry's outbound
//! channel into the socket and dispatches parsed inbound events into the
//! registry mailbox. When the socket closes or errors, it reports the
//! disconnect so the registry can degrade any linked session.

use crate::actors::{SessionRegistryHandle, SignalKind};
use crate::auth::VerifiedIdentity;
use crate::errors::CallError;

use super::protocol::{ClientEvent, ServerEvent};

use axum::extract::ws::{Message, WebSocket};
use common::types::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default close reason when a finalize request carries none.
const DEFAULT_CLOSE_REASON: &str = "closed";

/// Run one admitted connection to completion.
pub(crate) async fn run_connection(
    mut socket: WebSocket,
    connection_id: ConnectionId,
    identity: VerifiedIdentity,
    registry: SessionRegistryHandle,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let snapshot = match registry
        .connect(connection_id, identity.clone(), outbound_tx.clone())
        .await
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(
                target: "cc.gateway",
                connection_id = %connection_id,
                error = %e,
                "Registry rejected connection, closing socket"
            );
            return;
        }
    };

    info!(
        target: "cc.gateway",
        connection_id = %connection_id,
        role = identity.role.as_str(),
        active_sessions = snapshot.len(),
        "Connection established"
    );

    // First frame: the session snapshot, so a dispatcher can populate its
    // call list without polling.
    if send_event(
        &mut socket,
        &ServerEvent::ActiveSessionsSnapshot { sessions: snapshot },
    )
    .await
    .is_err()
    {
        let _ = registry.disconnect(connection_id).await;
        return;
    }

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    // Registry side dropped the sender; nothing more to relay.
                    None => break,
                }
            }

            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                dispatch_event(connection_id, event, &registry, &outbound_tx)
                                    .await;
                            }
                            Err(e) => {
                                warn!(
                                    target: "cc.gateway",
                                    connection_id = %connection_id,
                                    error = %e,
                                    "Unparseable client frame, dropping"
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary/ping/pong frames carry no signaling events.
                    }
                    Some(Err(e)) => {
                        debug!(
                            target: "cc.gateway",
                            connection_id = %connection_id,
                            error = %e,
                            "Socket error, treating as disconnect"
                        );
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = registry.disconnect(connection_id).await {
        warn!(
            target: "cc.gateway",
            connection_id = %connection_id,
            error = %e,
            "Failed to report disconnect to registry"
        );
    }

    info!(
        target: "cc.gateway",
        connection_id = %connection_id,
        "Connection closed"
    );
}

/// Serialize and send one event frame.
async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(e) => {
            // Serialization of our own enum cannot fail in practice; drop
            // the frame rather than the connection if it ever does.
            warn!(target: "cc.gateway", error = %e, "Failed to serialize outbound event");
            Ok(())
        }
    }
}

/// Route a parsed client event into the registry.
async fn dispatch_event(
    connection_id: ConnectionId,
    event: ClientEvent,
    registry: &SessionRegistryHandle,
    outbound: &mpsc::UnboundedSender<ServerEvent>,
) {
    let result: Result<(), CallError> = match event {
        ClientEvent::RegisterParticipant { participant_id } => {
            registry
                .register_participant(connection_id, participant_id)
                .await
        }

        ClientEvent::OpenSession { context } => registry
            .open_session(connection_id, context)
            .await
            // The opened event (with the new id) is delivered by the
            // registry itself; only failures surface here.
            .map(|_session_id| ()),

        ClientEvent::JoinSession {
            session_id,
            participant_id,
        } => {
            registry
                .join_session(connection_id, session_id, participant_id)
                .await
        }

        ClientEvent::Offer {
            session_id,
            payload,
        } => {
            registry
                .signal(connection_id, session_id, SignalKind::Offer, payload)
                .await
        }

        ClientEvent::Answer {
            session_id,
            payload,
        } => {
            registry
                .signal(connection_id, session_id, SignalKind::Answer, payload)
                .await
        }

        ClientEvent::IceCandidate {
            session_id,
            payload,
        } => {
            registry
                .signal(connection_id, session_id, SignalKind::IceCandidate, payload)
                .await
        }

        ClientEvent::RenegotiationRequest { session_id } => {
            registry
                .signal(
                    connection_id,
                    session_id,
                    SignalKind::Renegotiation,
                    serde_json::Value::Null,
                )
                .await
        }

        ClientEvent::FinalizeSession { session_id, reason } => {
            registry
                .finalize_session(
                    session_id,
                    reason.unwrap_or_else(|| DEFAULT_CLOSE_REASON.to_string()),
                )
                .await
        }
    };

    if let Err(e) = result {
        debug!(
            target: "cc.gateway",
            connection_id = %connection_id,
            error = %e,
            "Client event failed"
        );
        let _ = outbound.send(ServerEvent::Error {
            code: e.error_code(),
            message: e.client_message(),
        });
    }
}
