//! Signaling server: HTTP router and connection admission.
//!
//! Authentication happens BEFORE the WebSocket upgrade completes: the
//! credential is the `token` query parameter of the upgrade request, and
//! a missing or invalid credential is answered with `401 Unauthorized` -
//! a hard refusal with no session state touched. Only authenticated
//! sockets ever reach the registry.

use crate::actors::SessionRegistryHandle;
use crate::auth::TokenValidator;

use super::connection::run_connection;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use common::types::ConnectionId;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared state for the signaling router.
#[derive(Clone)]
pub struct GatewayState {
    /// Handle to the registry actor.
    pub registry: SessionRegistryHandle,
    /// Credential validator collaborator.
    pub validator: Arc<dyn TokenValidator>,
}

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
struct ConnectQuery {
    /// Opaque credential extracted from the connection handshake.
    token: Option<String>,
}

/// Create the signaling router with the WebSocket endpoint.
pub fn signaling_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// WebSocket upgrade handler.
///
/// Validates the handshake credential and either refuses the connection
/// (401, no upgrade) or admits it and hands the socket to its task. The
/// upgrade itself is only considered after the credential passes, so an
/// unauthenticated caller learns nothing about the endpoint beyond 401.
async fn ws_upgrade_handler(
    ws: Option<WebSocketUpgrade>,
    Query(query): Query<ConnectQuery>,
    State(state): State<GatewayState>,
) -> Response {
    let Some(token) = query.token else {
        warn!(target: "cc.gateway", "Connection attempt without credential, refusing");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let identity = match state.validator.validate(&token) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(
                target: "cc.gateway",
                error = %e,
                "Credential validation failed, refusing connection"
            );
            return (StatusCode::UNAUTHORIZED, e.client_message()).into_response();
        }
    };

    let Some(ws) = ws else {
        return StatusCode::UPGRADE_REQUIRED.into_response();
    };

    let connection_id = ConnectionId::new();
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| run_connection(socket, connection_id, identity, registry))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::{ClientRole, VerifiedIdentity};
    use crate::errors::CallError;
    use crate::observability::metrics::GatewayMetrics;
    use axum::body::Body;
    use axum::http::Request;
    use common::types::ParticipantId;
    use tower::ServiceExt;

    /// Validator that admits a single fixed credential.
    struct FixedValidator;

    impl TokenValidator for FixedValidator {
        fn validate(&self, credential: &str) -> Result<VerifiedIdentity, CallError> {
            if credential == "good-token" {
                Ok(VerifiedIdentity {
                    participant: ParticipantId::from("employee-77"),
                    role: ClientRole::Field,
                })
            } else {
                Err(CallError::Unauthorized("bad credential".to_string()))
            }
        }
    }

    fn test_router() -> Router {
        let registry =
            SessionRegistryHandle::new("cc-test-gw".to_string(), GatewayMetrics::new());
        signaling_router(GatewayState {
            registry,
            validator: Arc::new(FixedValidator),
        })
    }

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("host", "localhost")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_credential_is_refused() {
        let response = test_router()
            .oneshot(upgrade_request("/ws"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_credential_is_refused() {
        let response = test_router()
            .oneshot(upgrade_request("/ws?token=forged"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_credential_passes_authentication() {
        // `oneshot` requests are not upgradable, so admission stops at the
        // upgrade step - the point is that a valid credential never sees 401.
        let response = test_router()
            .oneshot(upgrade_request("/ws?token=good-token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    }
}
