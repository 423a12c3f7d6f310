//! Message types for the registry mailbox.
//!
//! All mutation of registry state flows through strongly-typed message
//! passing via `tokio::sync::mpsc`. Request-reply operations carry a
//! `tokio::sync::oneshot` response channel.

use crate::auth::VerifiedIdentity;
use crate::errors::CallError;
use crate::gateway::protocol::ServerEvent;
use crate::session::{SessionContext, SessionSummary};

use common::types::{ConnectionId, ParticipantId, SessionId};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Messages sent to the `SessionRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// An authenticated connection was admitted by the gateway.
    Connect {
        connection_id: ConnectionId,
        identity: VerifiedIdentity,
        /// Outbound channel for events addressed to this connection.
        sender: mpsc::UnboundedSender<ServerEvent>,
        /// Response channel for the initial session snapshot.
        respond_to: oneshot::Sender<Vec<SessionSummary>>,
    },

    /// Associate a stable identity with a connection.
    RegisterParticipant {
        connection_id: ConnectionId,
        participant_id: ParticipantId,
    },

    /// Open a new session with the caller as initiator.
    OpenSession {
        connection_id: ConnectionId,
        context: SessionContext,
        /// Response channel for the new session id or error.
        respond_to: oneshot::Sender<Result<SessionId, CallError>>,
    },

    /// Join an existing session as responder.
    JoinSession {
        connection_id: ConnectionId,
        session_id: SessionId,
        participant_id: Option<ParticipantId>,
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// A negotiation event to record and relay (no synchronous response:
    /// unknown sessions are logged and dropped).
    Signal {
        connection_id: ConnectionId,
        session_id: SessionId,
        kind: SignalKind,
        payload: serde_json::Value,
    },

    /// Close a session for all parties. Idempotent.
    FinalizeSession {
        session_id: SessionId,
        reason: String,
    },

    /// A connection's transport dropped.
    Disconnect { connection_id: ConnectionId },

    /// Force-close every session idle past the threshold.
    SweepIdle {
        idle_timeout: Duration,
        /// Response channel for the number of sessions reaped.
        respond_to: oneshot::Sender<usize>,
    },

    /// Read-only registry snapshot (for health checks and stats).
    GetStats {
        respond_to: oneshot::Sender<StatsSnapshot>,
    },

    /// Initiate graceful shutdown (SIGTERM received).
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Kind of a relayed negotiation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SDP offer - advances state to `OfferSent`.
    Offer,
    /// SDP answer - advances state to `AnswerReceived`.
    Answer,
    /// ICE candidate - free-flowing, no state change.
    IceCandidate,
    /// Renegotiation request - free-flowing, no state change.
    Renegotiation,
}

impl SignalKind {
    /// Returns the kind as a string for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice_candidate",
            SignalKind::Renegotiation => "renegotiation_request",
        }
    }
}

/// Read-only snapshot of registry size and connection count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Sessions currently in the registry.
    pub active_sessions: usize,
    /// Currently admitted connections.
    pub connections: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kind_labels() {
        assert_eq!(SignalKind::Offer.as_str(), "offer");
        assert_eq!(SignalKind::Renegotiation.as_str(), "renegotiation_request");
    }

    #[test]
    fn test_stats_snapshot_serializes() {
        let snapshot = StatsSnapshot {
            active_sessions: 2,
            connections: 5,
        };
        let value = serde_json::to_value(snapshot).unwrap();
        assert_eq!(value["active_sessions"], 2);
        assert_eq!(value["connections"], 5);
    }
}
