// StrandKex error types

use thiserror::Error;

/// Top-level error type for the StrandKex crate.
#[derive(Debug, Error)]
pub enum KexError {
    // ── Codec errors ────────────────────────────────────────────────────
    #[error("malformed parameters: {0}")]
    MalformedParameters(String),

    #[error("invalid delimiter 0x{0:02x}: must not be an ASCII digit")]
    InvalidDelimiter(u8),

    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    // ── Group errors ────────────────────────────────────────────────────
    #[error("invalid group: {0}")]
    InvalidGroup(String),

    #[error("parameter generation failed: {0}")]
    ParameterGeneration(String),

    // ── Agreement errors ────────────────────────────────────────────────
    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    // ── Handshake errors ────────────────────────────────────────────────
    #[error("invalid handshake state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, KexError>;
