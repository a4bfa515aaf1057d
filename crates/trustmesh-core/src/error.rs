//! # Error Types
//!
//! Validation and canonicalization errors for the foundational types.
//! Each variant carries the rejected input so callers can report it
//! without re-deriving it.

use thiserror::Error;

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical representations.
    #[error("float {0} cannot be canonicalized; encode amounts as integers or decimal strings")]
    FloatRejected(f64),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Validation errors for domain primitive newtypes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Account address is empty, too long, or contains whitespace.
    #[error("invalid address: \"{0}\" (expected 1-128 characters without whitespace)")]
    InvalidAddress(String),

    /// Shipment reference is blank or too long.
    #[error("invalid shipment reference: \"{0}\" (expected 1-256 non-blank characters)")]
    InvalidShipmentRef(String),

    /// Escrow identifiers start at 1.
    #[error("invalid escrow id: 0 (identifiers start at 1)")]
    ZeroEscrowId,

    /// Amount string is not a non-negative integer.
    #[error("invalid amount: \"{0}\" (expected a non-negative integer)")]
    InvalidAmount(String),

    /// Digest string is not `sha256:` followed by 64 lowercase hex digits.
    #[error("invalid digest: \"{0}\" (expected sha256:<64 hex digits>)")]
    InvalidDigest(String),

    /// Timestamp string or epoch value is not a valid UTC instant.
    #[error("invalid timestamp: \"{value}\" ({reason})")]
    InvalidTimestamp {
        /// The input that failed to parse.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}
