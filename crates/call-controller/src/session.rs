//! Session state for one call negotiation.
//!
//! A session coordinates exactly two logical roles: the initiator (field
//! client) and the responder (dispatcher). The state machine records state
//! only - it accepts out-of-order negotiation events permissively and
//! simply tracks the latest recognized state, tolerating network-induced
//! reordering. Retry/backoff is a client concern.
//!
//! # Lifecycle
//!
//! Created on `open_session` from an admitted connection, mutated by
//! signaling events and disconnects, destroyed by an explicit
//! `finalize_session` or by the inactivity reaper. Nothing survives a
//! process restart.

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, ParticipantId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of a session.
///
/// `Closed` is terminal and is the only state in which a session leaves
/// the registry. `Connected` and `Reconnecting` are advisory: no server
/// event transitions into them, since negotiation completion is observed
/// only by the peers themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session created, no responder yet.
    Init,
    /// A responder has joined; negotiation may proceed.
    WaitingForPeer,
    /// Latest recognized negotiation event was an offer.
    OfferSent,
    /// Latest recognized negotiation event was an answer.
    AnswerReceived,
    /// Media path established (advisory, never set by the server).
    Connected,
    /// Peer attempting to re-establish (advisory, never set by the server).
    Reconnecting,
    /// A participant's connection dropped; session retained for recovery.
    Disconnected,
    /// Finalized or reaped; terminal.
    Closed,
}

impl SessionState {
    /// Returns the state as a string for logging and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::WaitingForPeer => "waiting_for_peer",
            SessionState::OfferSent => "offer_sent",
            SessionState::AnswerReceived => "answer_received",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Disconnected => "disconnected",
            SessionState::Closed => "closed",
        }
    }

    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// Geographic position captured at session open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Free-form metadata captured at session open.
///
/// Opaque to the coordination logic - passed through to observers so a
/// dispatch console can render the call list without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    /// Call category/type (e.g. "audio", "incident").
    pub category: String,
    /// Reported position of the initiator, if the client sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Free-text note from the initiator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Observer-facing summary of a session (snapshot and lifecycle events).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub state: SessionState,
    pub context: SessionContext,
    pub created_at: DateTime<Utc>,
}

/// The unit of coordination for one call negotiation.
#[derive(Debug)]
pub struct Session {
    /// Session ID, generated at creation, immutable.
    pub id: SessionId,
    /// Connection that opened the session (the field client).
    pub initiator_connection: ConnectionId,
    /// Stable identity of the initiator, if registered.
    pub initiator_participant: Option<ParticipantId>,
    /// Connection that joined to answer, set once a peer joins.
    pub responder_connection: Option<ConnectionId>,
    /// Stable identity of the responder.
    pub responder_participant: Option<ParticipantId>,
    /// Metadata captured at creation, passed through to observers.
    pub context: SessionContext,
    /// Creation timestamp (observer-facing).
    pub created_at: DateTime<Utc>,
    /// Current state machine value.
    state: SessionState,
    /// Live connections for fan-out.
    room: HashSet<ConnectionId>,
    /// Refreshed on every state-changing signaling event; drives the reaper.
    /// Monotonic by construction (`Instant` never goes backwards).
    last_activity: Instant,
}

impl Session {
    /// Create a session in the `Init` state with the initiator in the room.
    #[must_use]
    pub fn new(
        id: SessionId,
        initiator_connection: ConnectionId,
        initiator_participant: Option<ParticipantId>,
        context: SessionContext,
    ) -> Self {
        let mut room = HashSet::new();
        room.insert(initiator_connection);

        Self {
            id,
            initiator_connection,
            initiator_participant,
            responder_connection: None,
            responder_participant: None,
            context,
            created_at: Utc::now(),
            state: SessionState::Init,
            room,
            last_activity: Instant::now(),
        }
    }

    /// Current state machine value.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Live connections currently in the session's room.
    #[must_use]
    pub fn room(&self) -> &HashSet<ConnectionId> {
        &self.room
    }

    /// Room members other than `sender`, for relay fan-out.
    #[must_use]
    pub fn peers_of(&self, sender: ConnectionId) -> Vec<ConnectionId> {
        self.room.iter().copied().filter(|m| *m != sender).collect()
    }

    /// Time elapsed since the last state-changing event.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Refresh the activity clock.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// A responder joined: record identity, link into the room, move to
    /// `WaitingForPeer`. Joining a `Disconnected` session re-arms it the
    /// same way - that is how a dispatcher re-attaches after a peer drop.
    pub fn record_peer_joined(
        &mut self,
        connection: ConnectionId,
        participant: Option<ParticipantId>,
    ) {
        if self.state.is_terminal() {
            return;
        }
        self.responder_connection = Some(connection);
        self.responder_participant = participant;
        self.room.insert(connection);
        self.state = SessionState::WaitingForPeer;
        self.touch();
    }

    /// An offer flowed through the session. Repeatable (ICE restarts).
    pub fn record_offer(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::OfferSent;
        self.touch();
    }

    /// An answer flowed through the session. Repeatable (ICE restarts).
    pub fn record_answer(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::AnswerReceived;
        self.touch();
    }

    /// A candidate or renegotiation request flowed through: free-flowing
    /// events that refresh activity without changing state.
    pub fn record_signal(&mut self) {
        self.touch();
    }

    /// A room member's transport dropped. The session is retained in
    /// `Disconnected` so it can still be finalized or reaped.
    pub fn record_disconnect(&mut self, connection: ConnectionId) {
        self.room.remove(&connection);
        if !self.state.is_terminal() {
            self.state = SessionState::Disconnected;
            self.touch();
        }
    }

    /// Finalize: terminal, cleared responder linkage, emptied room.
    /// Returns the members that were in the room for close notification.
    pub fn close(&mut self) -> Vec<ConnectionId> {
        self.state = SessionState::Closed;
        self.responder_connection = None;
        self.responder_participant = None;
        self.room.drain().collect()
    }

    /// Observer-facing summary.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            state: self.state,
            context: self.context.clone(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn audio_context() -> SessionContext {
        SessionContext {
            category: "audio".to_string(),
            location: None,
            note: None,
        }
    }

    fn new_session() -> Session {
        Session::new(
            SessionId::new(),
            ConnectionId::new(),
            Some(ParticipantId::from("employee-77")),
            audio_context(),
        )
    }

    #[test]
    fn test_new_session_starts_in_init_with_initiator_in_room() {
        let session = new_session();
        assert_eq!(session.state(), SessionState::Init);
        assert!(session.room().contains(&session.initiator_connection));
        assert_eq!(session.room().len(), 1);
        assert!(session.responder_connection.is_none());
    }

    #[test]
    fn test_peer_join_moves_to_waiting_for_peer() {
        let mut session = new_session();
        let responder = ConnectionId::new();

        session.record_peer_joined(responder, Some(ParticipantId::from("operator-3")));

        assert_eq!(session.state(), SessionState::WaitingForPeer);
        assert_eq!(session.responder_connection, Some(responder));
        assert!(session.room().contains(&responder));
        assert_eq!(session.room().len(), 2);
    }

    #[test]
    fn test_offer_and_answer_advance_state() {
        let mut session = new_session();
        session.record_peer_joined(ConnectionId::new(), None);

        session.record_offer();
        assert_eq!(session.state(), SessionState::OfferSent);

        session.record_answer();
        assert_eq!(session.state(), SessionState::AnswerReceived);

        // ICE restart: offer again after answer, no return to earlier states
        session.record_offer();
        assert_eq!(session.state(), SessionState::OfferSent);
    }

    #[test]
    fn test_out_of_order_negotiation_is_accepted() {
        // An answer before any offer is recorded, not rejected
        let mut session = new_session();
        session.record_answer();
        assert_eq!(session.state(), SessionState::AnswerReceived);
    }

    #[test]
    fn test_candidates_do_not_change_state() {
        let mut session = new_session();
        session.record_offer();
        session.record_signal();
        assert_eq!(session.state(), SessionState::OfferSent);
    }

    #[test]
    fn test_disconnect_degrades_but_retains_session() {
        let mut session = new_session();
        let responder = ConnectionId::new();
        session.record_peer_joined(responder, None);

        session.record_disconnect(responder);

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.room().contains(&responder));
        // Responder linkage is cleared only on close
        assert_eq!(session.responder_connection, Some(responder));
    }

    #[test]
    fn test_join_after_disconnect_rearms_session() {
        let mut session = new_session();
        let first = ConnectionId::new();
        session.record_peer_joined(first, None);
        session.record_disconnect(first);

        let second = ConnectionId::new();
        session.record_peer_joined(second, Some(ParticipantId::from("operator-4")));

        assert_eq!(session.state(), SessionState::WaitingForPeer);
        assert_eq!(session.responder_connection, Some(second));
    }

    #[test]
    fn test_close_is_terminal_and_clears_linkage() {
        let mut session = new_session();
        let responder = ConnectionId::new();
        session.record_peer_joined(responder, None);

        let members = session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.responder_connection.is_none());
        assert!(session.room().is_empty());
        assert_eq!(members.len(), 2);

        // No transition out of Closed
        session.record_offer();
        assert_eq!(session.state(), SessionState::Closed);
        session.record_peer_joined(ConnectionId::new(), None);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_clock_is_monotonic_and_refreshed() {
        let mut session = new_session();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(session.idle_for(Instant::now()), Duration::from_secs(30));

        session.record_offer();
        assert_eq!(session.idle_for(Instant::now()), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(5)).await;
        let before = session.idle_for(Instant::now());
        session.record_signal();
        let after = session.idle_for(Instant::now());
        assert!(after <= before, "activity timestamp never decreases");
    }

    #[test]
    fn test_summary_carries_context_through() {
        let mut context = audio_context();
        context.note = Some("north gate".to_string());
        let session = Session::new(SessionId::new(), ConnectionId::new(), None, context);

        let summary = session.summary();
        assert_eq!(summary.session_id, session.id);
        assert_eq!(summary.state, SessionState::Init);
        assert_eq!(summary.context.note.as_deref(), Some("north gate"));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::WaitingForPeer).unwrap();
        assert_eq!(json, "\"waiting_for_peer\"");
    }
}
