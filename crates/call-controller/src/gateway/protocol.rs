//! Wire protocol for the signaling WebSocket.
//!
//! Events are internally-tagged JSON (`{"event": "offer", ...}`), one
//! event per text frame. Negotiation payloads (SDP, ICE candidates) are
//! relayed verbatim as [`serde_json::Value`] - the controller never
//! interprets their contents.

use common::types::{ConnectionId, ParticipantId, SessionId};
use serde::{Deserialize, Serialize};

use crate::session::{SessionContext, SessionSummary};

/// Events sent by clients to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Associate a stable identity with this connection.
    RegisterParticipant { participant_id: ParticipantId },

    /// Open a new session; the caller becomes the initiator.
    OpenSession { context: SessionContext },

    /// Join an existing session as the responder.
    JoinSession {
        session_id: SessionId,
        #[serde(default)]
        participant_id: Option<ParticipantId>,
    },

    /// SDP offer, relayed to the other room members.
    Offer {
        session_id: SessionId,
        payload: serde_json::Value,
    },

    /// SDP answer, relayed to the other room members.
    Answer {
        session_id: SessionId,
        payload: serde_json::Value,
    },

    /// ICE candidate, relayed to the other room members.
    IceCandidate {
        session_id: SessionId,
        payload: serde_json::Value,
    },

    /// Request renegotiation (signal-only, no state change).
    RenegotiationRequest { session_id: SessionId },

    /// Close the session for all parties.
    FinalizeSession {
        session_id: SessionId,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Events sent by the controller to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Initial frame after admission: every active session.
    ActiveSessionsSnapshot { sessions: Vec<SessionSummary> },

    /// A session was opened (sent to the opener and broadcast to others).
    SessionOpened { session: SessionSummary },

    /// A responder joined the session (sent to the initiator).
    PeerJoined {
        session_id: SessionId,
        connection_id: ConnectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_id: Option<ParticipantId>,
    },

    /// Relayed SDP offer.
    Offer {
        session_id: SessionId,
        from: ConnectionId,
        payload: serde_json::Value,
    },

    /// Relayed SDP answer.
    Answer {
        session_id: SessionId,
        from: ConnectionId,
        payload: serde_json::Value,
    },

    /// Relayed ICE candidate.
    IceCandidate {
        session_id: SessionId,
        from: ConnectionId,
        payload: serde_json::Value,
    },

    /// A peer requested renegotiation.
    RenegotiationNeeded {
        session_id: SessionId,
        from: ConnectionId,
    },

    /// A room member's transport dropped.
    PeerDisconnected {
        session_id: SessionId,
        connection_id: ConnectionId,
    },

    /// The session was finalized or reaped.
    SessionClosed { session_id: SessionId, reason: String },

    /// Synchronous failure for open/join requests.
    Error { code: i32, message: String },
}
