//! Connection authentication at the transport boundary.
//!
//! The gateway consumes token *validation* only - issuance lives with the
//! platform's identity service. [`TokenValidator`] is the collaborator
//! boundary; [`JwtTokenValidator`] is the production implementation
//! (HS256, shared secret).
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Any validation failure, including internal validator faults, is
//!   reported as `Unauthorized` (fail closed)
//! - Client-facing messages never include token contents or subjects

use crate::errors::CallError;

use common::jwt::{check_token_size, validate_iat, AccessClaims, DEFAULT_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use common::types::ParticipantId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::debug;

/// Role a validated client acts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    /// Field-worker client (opens sessions).
    Field,
    /// Dispatch/operator client (answers sessions).
    Dispatch,
}

impl ClientRole {
    /// Returns the role as a string for logging and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ClientRole::Field => "field",
            ClientRole::Dispatch => "dispatch",
        }
    }

    fn parse(role: &str) -> Option<Self> {
        match role {
            "field" => Some(ClientRole::Field),
            "dispatch" => Some(ClientRole::Dispatch),
            _ => None,
        }
    }
}

/// Identity established for an admitted connection.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    /// Stable participant identity carried by the credential.
    pub participant: ParticipantId,
    /// Role granted by the credential.
    pub role: ClientRole,
}

/// Collaborator boundary for credential validation.
///
/// Implementations must return quickly - a slow validator blocks only the
/// connection being admitted, but it still holds that client's handshake
/// open.
pub trait TokenValidator: Send + Sync {
    /// Validate an opaque credential and return the identity it represents.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Unauthorized`] for every failure mode; the
    /// gateway refuses the connection without touching session state.
    fn validate(&self, credential: &str) -> Result<VerifiedIdentity, CallError>;
}

/// JWT access-token validator (HS256, shared secret).
pub struct JwtTokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenValidator {
    /// Create a validator from the configured signing secret.
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }
}

impl TokenValidator for JwtTokenValidator {
    fn validate(&self, credential: &str) -> Result<VerifiedIdentity, CallError> {
        check_token_size(credential).map_err(|e| {
            debug!(target: "cc.auth", error = %e, "Token rejected before parsing");
            CallError::Unauthorized("token too large".to_string())
        })?;

        let token_data = decode::<AccessClaims>(credential, &self.decoding_key, &self.validation)
            .map_err(|e| {
            debug!(target: "cc.auth", error = %e, "Token signature/claims validation failed");
            CallError::Unauthorized("token validation failed".to_string())
        })?;

        validate_iat(token_data.claims.iat, DEFAULT_CLOCK_SKEW).map_err(|e| {
            debug!(target: "cc.auth", error = %e, "Token iat validation failed");
            CallError::Unauthorized("token issued in the future".to_string())
        })?;

        let role = ClientRole::parse(&token_data.claims.role).ok_or_else(|| {
            debug!(
                target: "cc.auth",
                role = %token_data.claims.role,
                "Token carries unknown role"
            );
            CallError::Unauthorized("unknown role".to_string())
        })?;

        Ok(VerifiedIdentity {
            participant: ParticipantId::new(token_data.claims.sub),
            role,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const TEST_SECRET: &str = "test-signing-secret-1234567890";

    fn now_epoch() -> i64 {
        i64::try_from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs(),
        )
        .unwrap()
    }

    fn sign(claims: &AccessClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn validator() -> JwtTokenValidator {
        JwtTokenValidator::new(&SecretString::from(TEST_SECRET))
    }

    #[test]
    fn test_valid_field_token_accepted() {
        let claims = AccessClaims::new(
            "employee-77".to_string(),
            "field".to_string(),
            now_epoch() + 600,
            now_epoch(),
        );
        let token = sign(&claims, TEST_SECRET);

        let identity = validator().validate(&token).expect("token should validate");
        assert_eq!(identity.participant.as_str(), "employee-77");
        assert_eq!(identity.role, ClientRole::Field);
    }

    #[test]
    fn test_valid_dispatch_token_accepted() {
        let claims = AccessClaims::new(
            "operator-3".to_string(),
            "dispatch".to_string(),
            now_epoch() + 600,
            now_epoch(),
        );
        let token = sign(&claims, TEST_SECRET);

        let identity = validator().validate(&token).expect("token should validate");
        assert_eq!(identity.role, ClientRole::Dispatch);
    }

    #[test]
    fn test_expired_token_rejected() {
        let claims = AccessClaims::new(
            "employee-77".to_string(),
            "field".to_string(),
            now_epoch() - 600,
            now_epoch() - 1200,
        );
        let token = sign(&claims, TEST_SECRET);

        let result = validator().validate(&token);
        assert!(matches!(result, Err(CallError::Unauthorized(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let claims = AccessClaims::new(
            "employee-77".to_string(),
            "field".to_string(),
            now_epoch() + 600,
            now_epoch(),
        );
        let token = sign(&claims, "a-different-secret-entirely");

        let result = validator().validate(&token);
        assert!(matches!(result, Err(CallError::Unauthorized(_))));
    }

    #[test]
    fn test_unknown_role_rejected() {
        let claims = AccessClaims::new(
            "employee-77".to_string(),
            "warehouse".to_string(),
            now_epoch() + 600,
            now_epoch(),
        );
        let token = sign(&claims, TEST_SECRET);

        let result = validator().validate(&token);
        assert!(matches!(result, Err(CallError::Unauthorized(_))));
    }

    #[test]
    fn test_oversized_token_rejected_without_parsing() {
        let token = "a".repeat(common::jwt::MAX_JWT_SIZE_BYTES + 1);

        let result = validator().validate(&token);
        assert!(matches!(result, Err(CallError::Unauthorized(_))));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let result = validator().validate("not-a-jwt");
        assert!(matches!(result, Err(CallError::Unauthorized(_))));
    }
}
