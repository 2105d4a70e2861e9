//! Cryptographic primitives backing the handshake and record layers.
//!
//! This module intentionally stays small: the session core needs ephemeral
//! Diffie-Hellman, HKDF, and AEAD, nothing more. Errors are reported through
//! [`crate::error::SessionError`] rather than a separate crypto-local error
//! type, so callers match on one taxonomy end to end.

pub mod hkdf;
pub mod random;
