//! `SessionRegistryActor` - single owner of all live signaling state.
//!
//! The registry actor is the only writer of the session map and its
//! lookup indexes (connection -> session, participant -> connection).
//! Every signaling event is fully processed (lookup -> mutate -> relay)
//! before the next message is considered, so a Join and a concurrent
//! Disconnect for the same session can never interleave their mutations.
//!
//! Connection I/O stays concurrent: socket tasks feed this mailbox and
//! pump per-connection outbound channels. Relay sends are non-blocking -
//! an unreachable peer loses frames rather than stalling the registry.

use crate::auth::VerifiedIdentity;
use crate::errors::CallError;
use crate::gateway::protocol::ServerEvent;
use crate::observability::metrics::GatewayMetrics;
use crate::session::{Session, SessionContext, SessionSummary};

use super::messages::{RegistryMessage, SignalKind, StatsSnapshot};

use common::types::{ConnectionId, ParticipantId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Close reason sent to room members during graceful shutdown.
const SHUTDOWN_CLOSE_REASON: &str = "shutdown";

/// Handle to the `SessionRegistryActor`.
///
/// This is the public interface for interacting with the registry.
/// Cloneable; all methods are async and return results via oneshot
/// channels.
#[derive(Clone)]
pub struct SessionRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl SessionRegistryHandle {
    /// Create a new `SessionRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(cc_id: String, metrics: Arc<GatewayMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionRegistryActor::new(cc_id, receiver, cancel_token.clone(), metrics);

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Admit an authenticated connection and receive the session snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Internal`] if the registry is unavailable.
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        identity: VerifiedIdentity,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<Vec<SessionSummary>, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Connect {
                connection_id,
                identity,
                sender,
                respond_to: tx,
            })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }

    /// Associate a stable participant identity with a connection.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Internal`] if the registry is unavailable.
    pub async fn register_participant(
        &self,
        connection_id: ConnectionId,
        participant_id: ParticipantId,
    ) -> Result<(), CallError> {
        self.sender
            .send(RegistryMessage::RegisterParticipant {
                connection_id,
                participant_id,
            })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))
    }

    /// Open a new session with the caller as initiator.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Conflict`] if the connection is already linked
    /// to a session, [`CallError::Draining`] during shutdown.
    pub async fn open_session(
        &self,
        connection_id: ConnectionId,
        context: SessionContext,
    ) -> Result<SessionId, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::OpenSession {
                connection_id,
                context,
                respond_to: tx,
            })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))?
    }

    /// Join an existing session as responder.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::SessionNotFound`] for an unknown id,
    /// [`CallError::Conflict`] if the connection is already linked.
    pub async fn join_session(
        &self,
        connection_id: ConnectionId,
        session_id: SessionId,
        participant_id: Option<ParticipantId>,
    ) -> Result<(), CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::JoinSession {
                connection_id,
                session_id,
                participant_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))?
    }

    /// Record and relay a negotiation event. Unknown sessions are logged
    /// and dropped inside the actor - no error surfaces here.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Internal`] if the registry is unavailable.
    pub async fn signal(
        &self,
        connection_id: ConnectionId,
        session_id: SessionId,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Result<(), CallError> {
        self.sender
            .send(RegistryMessage::Signal {
                connection_id,
                session_id,
                kind,
                payload,
            })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))
    }

    /// Close a session for all parties. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Internal`] if the registry is unavailable.
    pub async fn finalize_session(
        &self,
        session_id: SessionId,
        reason: String,
    ) -> Result<(), CallError> {
        self.sender
            .send(RegistryMessage::FinalizeSession { session_id, reason })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))
    }

    /// Notify the registry that a connection's transport dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Internal`] if the registry is unavailable.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), CallError> {
        self.sender
            .send(RegistryMessage::Disconnect { connection_id })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))
    }

    /// Force-close every session idle past `idle_timeout`. Returns the
    /// number of sessions reaped.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Internal`] if the registry is unavailable.
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> Result<usize, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::SweepIdle {
                idle_timeout,
                respond_to: tx,
            })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }

    /// Read-only registry snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Internal`] if the registry is unavailable.
    pub async fn get_stats(&self) -> Result<StatsSnapshot, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStats { respond_to: tx })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Internal`] if the registry is unavailable.
    pub async fn shutdown(&self) -> Result<(), CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for dependent tasks (reaper, servers).
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Registry-side state for one admitted connection.
struct ClientConnection {
    /// Outbound channel pumped by the connection's socket task.
    sender: mpsc::UnboundedSender<ServerEvent>,
    /// Identity established at admission.
    identity: VerifiedIdentity,
    /// Explicitly registered stable identity, if any.
    participant: Option<ParticipantId>,
    /// Session this connection is linked to (at most one at a time).
    session: Option<SessionId>,
}

/// The `SessionRegistryActor` implementation.
///
/// This struct owns the actor state and runs the message loop.
pub struct SessionRegistryActor {
    /// Controller instance ID.
    cc_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Sessions by ID.
    sessions: HashMap<SessionId, Session>,
    /// Admitted connections by ID (the connection -> session index lives
    /// in each entry's `session` field).
    connections: HashMap<ConnectionId, ClientConnection>,
    /// Participant -> most recent live connection.
    participant_index: HashMap<ParticipantId, ConnectionId>,
    /// Whether the registry is accepting new sessions.
    accepting_new: bool,
    /// Shared metrics.
    metrics: Arc<GatewayMetrics>,
}

impl SessionRegistryActor {
    /// Create a new registry actor (not started).
    fn new(
        cc_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            cc_id,
            receiver,
            cancel_token,
            sessions: HashMap::new(),
            connections: HashMap::new(),
            participant_index: HashMap::new(),
            accepting_new: true,
            metrics,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "cc.actor.registry", fields(cc_id = %self.cc_id))]
    async fn run(mut self) {
        info!(
            target: "cc.actor.registry",
            cc_id = %self.cc_id,
            "SessionRegistryActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.registry",
                        cc_id = %self.cc_id,
                        "SessionRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(
                                target: "cc.actor.registry",
                                cc_id = %self.cc_id,
                                "SessionRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "cc.actor.registry",
            cc_id = %self.cc_id,
            sessions_remaining = self.sessions.len(),
            "SessionRegistryActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Connect {
                connection_id,
                identity,
                sender,
                respond_to,
            } => {
                let snapshot = self.handle_connect(connection_id, identity, sender);
                let _ = respond_to.send(snapshot);
            }

            RegistryMessage::RegisterParticipant {
                connection_id,
                participant_id,
            } => {
                self.handle_register_participant(connection_id, participant_id);
            }

            RegistryMessage::OpenSession {
                connection_id,
                context,
                respond_to,
            } => {
                let result = self.handle_open_session(connection_id, context);
                let _ = respond_to.send(result);
            }

            RegistryMessage::JoinSession {
                connection_id,
                session_id,
                participant_id,
                respond_to,
            } => {
                let result = self.handle_join_session(connection_id, session_id, participant_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Signal {
                connection_id,
                session_id,
                kind,
                payload,
            } => {
                self.handle_signal(connection_id, session_id, kind, payload);
            }

            RegistryMessage::FinalizeSession { session_id, reason } => {
                self.handle_finalize(session_id, &reason);
            }

            RegistryMessage::Disconnect { connection_id } => {
                self.handle_disconnect(connection_id);
            }

            RegistryMessage::SweepIdle {
                idle_timeout,
                respond_to,
            } => {
                let reaped = self.handle_sweep(idle_timeout);
                let _ = respond_to.send(reaped);
            }

            RegistryMessage::GetStats { respond_to } => {
                let _ = respond_to.send(StatsSnapshot {
                    active_sessions: self.sessions.len(),
                    connections: self.connections.len(),
                });
            }

            RegistryMessage::Shutdown { respond_to } => {
                info!(
                    target: "cc.actor.registry",
                    cc_id = %self.cc_id,
                    session_count = self.sessions.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.cancel_token.cancel();
                let _ = respond_to.send(());
            }
        }
    }

    /// Admit a connection and return the current session snapshot so a
    /// newly-connected dispatcher can populate its UI without polling.
    fn handle_connect(
        &mut self,
        connection_id: ConnectionId,
        identity: VerifiedIdentity,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Vec<SessionSummary> {
        debug!(
            target: "cc.actor.registry",
            cc_id = %self.cc_id,
            connection_id = %connection_id,
            role = identity.role.as_str(),
            "Connection admitted"
        );

        self.connections.insert(
            connection_id,
            ClientConnection {
                sender,
                identity,
                participant: None,
                session: None,
            },
        );

        self.metrics.connection_admitted();

        self.sessions.values().map(Session::summary).collect()
    }

    /// Record a stable identity for a connection, silently replacing a
    /// stale prior connection's index entry.
    fn handle_register_participant(
        &mut self,
        connection_id: ConnectionId,
        participant_id: ParticipantId,
    ) {
        let Some(conn) = self.connections.get_mut(&connection_id) else {
            warn!(
                target: "cc.actor.registry",
                connection_id = %connection_id,
                "RegisterParticipant from unknown connection"
            );
            return;
        };

        conn.participant = Some(participant_id.clone());

        if let Some(previous) = self
            .participant_index
            .insert(participant_id.clone(), connection_id)
        {
            if previous != connection_id {
                debug!(
                    target: "cc.actor.registry",
                    participant_id = %participant_id,
                    previous_connection = %previous,
                    connection_id = %connection_id,
                    "Replaced stale connection for participant"
                );
            }
        }
    }

    /// Create a session with the caller as initiator and broadcast its
    /// existence.
    #[instrument(skip_all, fields(cc_id = %self.cc_id, connection_id = %connection_id))]
    fn handle_open_session(
        &mut self,
        connection_id: ConnectionId,
        context: SessionContext,
    ) -> Result<SessionId, CallError> {
        if !self.accepting_new {
            return Err(CallError::Draining);
        }

        let Some(conn) = self.connections.get_mut(&connection_id) else {
            return Err(CallError::Internal("connection not admitted".to_string()));
        };

        if conn.session.is_some() {
            return Err(CallError::Conflict(
                "Connection already in a session".to_string(),
            ));
        }

        let session_id = SessionId::new();
        let session = Session::new(
            session_id,
            connection_id,
            conn.participant.clone(),
            context,
        );
        let summary = session.summary();

        conn.session = Some(session_id);
        self.sessions.insert(session_id, session);
        self.metrics.session_opened();

        // Deliver the opened event to the caller (carrying the new id) and
        // broadcast it to every other connection.
        for (member_id, member) in &self.connections {
            let event = ServerEvent::SessionOpened {
                session: summary.clone(),
            };
            if member.sender.send(event).is_err() {
                debug!(
                    target: "cc.actor.registry",
                    connection_id = %member_id,
                    "Dropped session_opened for closed outbound channel"
                );
            }
        }

        info!(
            target: "cc.actor.registry",
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session opened"
        );

        Ok(session_id)
    }

    /// Link a responder into a session's room and notify the initiator.
    #[instrument(skip_all, fields(cc_id = %self.cc_id, session_id = %session_id))]
    fn handle_join_session(
        &mut self,
        connection_id: ConnectionId,
        session_id: SessionId,
        participant_id: Option<ParticipantId>,
    ) -> Result<(), CallError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(CallError::SessionNotFound(session_id.to_string()));
        }

        let Some(conn) = self.connections.get_mut(&connection_id) else {
            return Err(CallError::Internal("connection not admitted".to_string()));
        };

        if conn.session.is_some() {
            return Err(CallError::Conflict(
                "Connection already in a session".to_string(),
            ));
        }

        let responder_participant = participant_id.or_else(|| conn.participant.clone());
        conn.session = Some(session_id);

        let Some(session) = self.sessions.get_mut(&session_id) else {
            // Checked above; unreachable without a bug in this handler.
            return Err(CallError::SessionNotFound(session_id.to_string()));
        };

        session.record_peer_joined(connection_id, responder_participant.clone());
        let initiator = session.initiator_connection;

        if let Some(initiator_conn) = self.connections.get(&initiator) {
            let _ = initiator_conn.sender.send(ServerEvent::PeerJoined {
                session_id,
                connection_id,
                participant_id: responder_participant,
            });
        }

        info!(
            target: "cc.actor.registry",
            connection_id = %connection_id,
            "Peer joined session"
        );

        Ok(())
    }

    /// Record a negotiation event and relay it to the other room members.
    ///
    /// Unknown sessions are logged and dropped - other participants only
    /// ever observe an absence of relays, never an error.
    fn handle_signal(
        &mut self,
        connection_id: ConnectionId,
        session_id: SessionId,
        kind: SignalKind,
        payload: serde_json::Value,
    ) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            warn!(
                target: "cc.actor.registry",
                cc_id = %self.cc_id,
                session_id = %session_id,
                kind = kind.as_str(),
                "Signaling event for unknown session, dropping"
            );
            return;
        };

        match kind {
            SignalKind::Offer => session.record_offer(),
            SignalKind::Answer => session.record_answer(),
            SignalKind::IceCandidate | SignalKind::Renegotiation => session.record_signal(),
        }

        let recipients = session.peers_of(connection_id);

        let event = match kind {
            SignalKind::Offer => ServerEvent::Offer {
                session_id,
                from: connection_id,
                payload,
            },
            SignalKind::Answer => ServerEvent::Answer {
                session_id,
                from: connection_id,
                payload,
            },
            SignalKind::IceCandidate => ServerEvent::IceCandidate {
                session_id,
                from: connection_id,
                payload,
            },
            SignalKind::Renegotiation => ServerEvent::RenegotiationNeeded {
                session_id,
                from: connection_id,
            },
        };

        let mut delivered: u64 = 0;
        for recipient in recipients {
            if let Some(conn) = self.connections.get(&recipient) {
                if conn.sender.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        self.metrics.events_relayed(delivered);

        debug!(
            target: "cc.actor.registry",
            session_id = %session_id,
            from = %connection_id,
            kind = kind.as_str(),
            delivered,
            "Relayed signaling event"
        );
    }

    /// Finalize a session. Idempotent: finalizing an unknown or
    /// already-closed session is a no-op.
    fn handle_finalize(&mut self, session_id: SessionId, reason: &str) {
        if !self.close_session(session_id, reason) {
            debug!(
                target: "cc.actor.registry",
                session_id = %session_id,
                "Finalize for unknown session, no-op"
            );
        }
    }

    /// Remove a connection, notify its session peers, and degrade the
    /// session (retained for explicit finalize or the reaper).
    fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        let Some(conn) = self.connections.remove(&connection_id) else {
            return;
        };

        self.metrics.connection_closed();

        // Drop the participant index entry only if this connection is
        // still the one on file (a newer connection may have replaced it).
        if let Some(participant) = &conn.participant {
            if self.participant_index.get(participant) == Some(&connection_id) {
                self.participant_index.remove(participant);
            }
        }

        let Some(session_id) = conn.session else {
            debug!(
                target: "cc.actor.registry",
                connection_id = %connection_id,
                role = conn.identity.role.as_str(),
                "Connection closed (no session linked)"
            );
            return;
        };

        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };

        if session.state().is_terminal() {
            return;
        }

        session.record_disconnect(connection_id);
        let remaining = session.room().iter().copied().collect::<Vec<_>>();

        for member in remaining {
            if let Some(peer) = self.connections.get(&member) {
                let _ = peer.sender.send(ServerEvent::PeerDisconnected {
                    session_id,
                    connection_id,
                });
            }
        }

        info!(
            target: "cc.actor.registry",
            connection_id = %connection_id,
            session_id = %session_id,
            "Connection dropped, session degraded"
        );
    }

    /// Force-close every session idle past the threshold. Returns the
    /// number of sessions reaped.
    fn handle_sweep(&mut self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let idle: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.idle_for(now) >= idle_timeout)
            .map(|s| s.id)
            .collect();

        let reaped = idle.len();
        for session_id in idle {
            self.close_session(session_id, "timeout");
        }

        if reaped > 0 {
            self.metrics.sessions_reaped(reaped as u64);
        }

        reaped
    }

    /// Close a session: terminal state, `session_closed` to every room
    /// member, room evicted, session and index entries removed in the
    /// same operation. Returns false if the session was not present.
    fn close_session(&mut self, session_id: SessionId, reason: &str) -> bool {
        let Some(mut session) = self.sessions.remove(&session_id) else {
            return false;
        };

        let members = session.close();

        for member in members {
            if let Some(conn) = self.connections.get_mut(&member) {
                conn.session = None;
                let _ = conn.sender.send(ServerEvent::SessionClosed {
                    session_id,
                    reason: reason.to_string(),
                });
            }
        }

        self.metrics.session_closed();

        info!(
            target: "cc.actor.registry",
            cc_id = %self.cc_id,
            session_id = %session_id,
            reason = %reason,
            total_sessions = self.sessions.len(),
            "Session closed"
        );

        true
    }

    /// Perform graceful shutdown: close every session with reason
    /// "shutdown" so clients do not wait on peers that will never answer.
    fn graceful_shutdown(&mut self) {
        info!(
            target: "cc.actor.registry",
            cc_id = %self.cc_id,
            session_count = self.sessions.len(),
            connection_count = self.connections.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        let open: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session_id in open {
            self.close_session(session_id, SHUTDOWN_CLOSE_REASON);
        }

        info!(
            target: "cc.actor.registry",
            cc_id = %self.cc_id,
            "Graceful shutdown complete"
        );
    }
}
