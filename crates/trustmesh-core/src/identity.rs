//! # Identity Newtypes
//!
//! Identifiers used throughout the escrow engine. Each is a distinct type:
//! an [`Address`] cannot be passed where a [`ShipmentRef`] is expected, and
//! an [`EscrowId`] is not interchangeable with a raw counter value.
//!
//! ## Validation
//!
//! String-based identifiers validate at construction and on deserialization
//! (`serde(try_from = "String")`), so an invalid value cannot enter the
//! system through either path.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const MAX_ADDRESS_LEN: usize = 128;
const MAX_SHIPMENT_REF_LEN: usize = 256;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// An account identity on the custody ledger: a buyer, a seller, the agent,
/// or the engine's own custody account.
///
/// Opaque to the engine, which only compares addresses for equality and
/// hands them to the custody asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Create an address, validating format.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidAddress`] if the value is empty,
    /// longer than 128 characters, or contains whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        if s.is_empty() || s.len() > MAX_ADDRESS_LEN || s.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidAddress(s));
        }
        Ok(Self(s))
    }

    /// Access the address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

// ---------------------------------------------------------------------------
// EscrowId
// ---------------------------------------------------------------------------

/// Sequential escrow identifier assigned by the registry.
///
/// The first escrow is `1`; identifiers are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct EscrowId(u64);

impl EscrowId {
    /// The identifier assigned to the first escrow.
    pub const FIRST: EscrowId = EscrowId(1);

    /// Create an identifier from its numeric value.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroEscrowId`] for `0`.
    pub fn new(value: u64) -> Result<Self, ValidationError> {
        if value == 0 {
            return Err(ValidationError::ZeroEscrowId);
        }
        Ok(Self(value))
    }

    /// The numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// The identifier following this one, or `None` on counter overflow.
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl std::fmt::Display for EscrowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "escrow#{}", self.0)
    }
}

impl TryFrom<u64> for EscrowId {
    type Error = ValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EscrowId> for u64 {
    fn from(id: EscrowId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// ShipmentRef
// ---------------------------------------------------------------------------

/// External proof-of-dispatch reference supplied by the seller
/// (e.g. `SHIP-123`).
///
/// Compared byte-for-byte; `SHIP-1` and `ship-1` are distinct references.
/// Leading or trailing whitespace is rejected rather than trimmed, so a
/// reference has exactly one spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShipmentRef(String);

impl ShipmentRef {
    /// Create a shipment reference, validating format.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidShipmentRef`] if the value is empty,
    /// starts or ends with whitespace, or is longer than 256 bytes.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        if s.is_empty() || s.trim() != s || s.len() > MAX_SHIPMENT_REF_LEN {
            return Err(ValidationError::InvalidShipmentRef(s));
        }
        Ok(Self(s))
    }

    /// Access the reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShipmentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ShipmentRef {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ShipmentRef> for String {
    fn from(r: ShipmentRef) -> Self {
        r.0
    }
}
