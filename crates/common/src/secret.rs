//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate with
//! FieldComm-specific guidance. Use these types for all sensitive values
//! like signing secrets, bearer tokens, and API keys.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding one gets safe logging behavior for free -
//! a secret can only reach a log line through an explicit
//! `expose_secret()` call. Secrets are also zeroized when dropped.
//!
//! # FieldComm Usage Guidelines
//!
//! Use `SecretString` for:
//! - JWT signing secrets
//! - Bearer tokens
//! - API keys
//!
//! Use `SecretBox<T>` for custom secret types (e.g. binary key material).

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
