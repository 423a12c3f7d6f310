//! JWT utilities shared across FieldComm services.
//!
//! This module provides common JWT validation utilities including:
//! - Size limits for DoS prevention
//! - Clock skew constants for iat validation
//! - iat validation logic
//! - Access-token claims structure
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Generic error messages prevent information leakage
//! - The `sub` field in claims is redacted in Debug output

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected BEFORE any parsing or cryptographic
/// operations. Typical access tokens are 200-500 bytes; 8KB allows for
/// reasonable expansion while preventing oversized-token resource abuse.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes per NIST SP 800-63B).
///
/// Tokens with `iat` (issued-at) timestamps more than this amount in the
/// future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Prevents misconfiguration that would weaken security through an
/// excessively large skew tolerance.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT validation.
///
/// Note: Error messages are intentionally generic to prevent information
/// leakage. Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Access-token claims structure.
///
/// Carried by every client connecting to the signaling gateway. The `sub`
/// field contains the stable participant identity (e.g. an employee id)
/// and is redacted in Debug output.
///
/// # Fields
///
/// - `sub`: Subject (stable participant identity)
/// - `role`: Client role (`"field"` or `"dispatch"`)
/// - `exp`: Expiration timestamp (Unix epoch seconds)
/// - `iat`: Issued-at timestamp (Unix epoch seconds)
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (stable participant identity) - redacted in Debug output.
    pub sub: String,

    /// Client role granted by the token issuer.
    pub role: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
}

impl fmt::Debug for AccessClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessClaims")
            .field("sub", &"[REDACTED]")
            .field("role", &self.role)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

impl AccessClaims {
    /// Creates a new `AccessClaims` instance.
    #[must_use]
    pub fn new(sub: String, role: String, exp: i64, iat: i64) -> Self {
        Self {
            sub,
            role,
            exp,
            iat,
        }
    }
}

// =============================================================================
// Validation Helpers
// =============================================================================

/// Check a raw token's size before any parsing.
///
/// # Errors
///
/// Returns [`JwtValidationError::TokenTooLarge`] when the token exceeds
/// [`MAX_JWT_SIZE_BYTES`].
pub fn check_token_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        return Err(JwtValidationError::TokenTooLarge);
    }
    Ok(())
}

/// Validate an `iat` (issued-at) claim against the current clock.
///
/// An `iat` further in the future than `clock_skew` indicates either a
/// misbehaving issuer or a replayed token minted against a skewed clock;
/// both are rejected. Past `iat` values are not checked here - expiry is
/// the signature library's concern.
///
/// # Errors
///
/// Returns [`JwtValidationError::IatTooFarInFuture`] when the claim fails
/// the skew check.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0);

    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX);

    if iat > now.saturating_add(skew) {
        return Err(JwtValidationError::IatTooFarInFuture);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn now_epoch() -> i64 {
        i64::try_from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs(),
        )
        .unwrap()
    }

    #[test]
    fn test_check_token_size_accepts_typical_token() {
        let token = "a".repeat(400);
        assert!(check_token_size(&token).is_ok());
    }

    #[test]
    fn test_check_token_size_rejects_oversized_token() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            check_token_size(&token),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_validate_iat_accepts_past_iat() {
        assert!(validate_iat(now_epoch() - 60, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_validate_iat_accepts_iat_within_skew() {
        assert!(validate_iat(now_epoch() + 60, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_validate_iat_rejects_future_iat() {
        assert_eq!(
            validate_iat(now_epoch() + 3600, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_claims_debug_redacts_subject() {
        let claims = AccessClaims::new(
            "employee-77".to_string(),
            "field".to_string(),
            now_epoch() + 600,
            now_epoch(),
        );
        let debug_str = format!("{claims:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("employee-77"));
        assert!(debug_str.contains("field"));
    }

    #[test]
    fn test_error_messages_are_generic() {
        assert_eq!(
            JwtValidationError::TokenTooLarge.to_string(),
            JwtValidationError::MalformedToken.to_string()
        );
    }
}
