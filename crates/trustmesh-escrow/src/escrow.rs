//! # Escrow Records
//!
//! The escrow record, its lifecycle status, and the audit trail of
//! transitions applied to it.
//!
//! ## Lifecycle
//!
//! ```text
//!   Created ──link_shipment──▶ Linked ──release_funds──▶ Released
//!      │                         │
//!      ├──refund─────────────────┴──refund──▶ Refunded
//!      │
//!      └──cancel_unlinked (after deadline)──▶ Cancelled
//! ```
//!
//! `extend_escrow` keeps the status and moves the deadline. Released,
//! Refunded and Cancelled are terminal: every operation on a terminal
//! escrow is rejected and the record never changes again.

use serde::{Deserialize, Serialize};
use serde_json::json;

use trustmesh_core::{
    sha256_digest, Address, Amount, CanonicalBytes, ContentDigest, EscrowId, ShipmentRef,
    Timestamp,
};

use crate::error::EscrowError;

// ── Status ─────────────────────────────────────────────────────────────

/// Lifecycle status of an escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Funded by the buyer, no shipment bound yet.
    Created,
    /// The seller has bound a shipment reference.
    Linked,
    /// Funds paid to the seller.
    Released,
    /// Funds returned to the buyer by the agent.
    Refunded,
    /// Funds returned to the buyer after the deadline passed unlinked.
    Cancelled,
}

impl EscrowStatus {
    /// Return the canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Linked => "LINKED",
            Self::Released => "RELEASED",
            Self::Refunded => "REFUNDED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether this is a terminal status (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded | Self::Cancelled)
    }

    /// Whether the escrow still holds its deposit in custody.
    pub fn holds_funds(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Operations ─────────────────────────────────────────────────────────

/// The public operations that act on an escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Buyer deposit.
    Create,
    /// Seller binds a shipment reference.
    LinkShipment,
    /// Agent pushes the deadline out.
    Extend,
    /// Agent pays the seller.
    Release,
    /// Agent returns funds to the buyer.
    Refund,
    /// Buyer reclaims an unlinked escrow after its deadline.
    CancelUnlinked,
}

impl Operation {
    /// Return the canonical string name of this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::LinkShipment => "link_shipment",
            Self::Extend => "extend",
            Self::Release => "release",
            Self::Refund => "refund",
            Self::CancelUnlinked => "cancel_unlinked",
        }
    }

    /// The status an escrow lands in when this operation succeeds from
    /// `from`, or `None` if the transition is not allowed.
    pub fn target(&self, from: EscrowStatus) -> Option<EscrowStatus> {
        use EscrowStatus::*;
        match (self, from) {
            (Self::LinkShipment, Created) => Some(Linked),
            (Self::Extend, Created | Linked) => Some(from),
            (Self::Release, Linked) => Some(Released),
            (Self::Refund, Created | Linked) => Some(Refunded),
            (Self::CancelUnlinked, Created) => Some(Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Transition Records ─────────────────────────────────────────────────

/// One entry in an escrow's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// The operation applied.
    pub operation: Operation,
    /// Status before the operation; `None` for the creation record.
    pub from_status: Option<EscrowStatus>,
    /// Status after the operation.
    pub to_status: EscrowStatus,
    /// The caller that performed it.
    pub actor: Address,
    /// Clock reading when it was applied.
    pub at: Timestamp,
    /// Digest of the free-text note or reason, if one was supplied.
    pub evidence_digest: Option<ContentDigest>,
}

/// Digest a free-text note or reason for the audit trail.
///
/// Blank text yields `None`. The digest binds the escrow and operation so
/// the same note on two escrows hashes differently.
pub fn evidence_digest(
    escrow_id: EscrowId,
    operation: Operation,
    text: &str,
) -> Result<Option<ContentDigest>, EscrowError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let canonical = CanonicalBytes::new(&json!({
        "escrow_id": escrow_id.get(),
        "operation": operation.as_str(),
        "text": text,
    }))?;
    Ok(Some(sha256_digest(&canonical)))
}

// ── Escrow ─────────────────────────────────────────────────────────────

/// A funded escrow held by the engine.
///
/// Instances handed out by the engine are snapshots; mutating one does not
/// affect the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    /// Registry identifier.
    pub id: EscrowId,
    /// The depositor; receives refunds.
    pub buyer: Address,
    /// The payee on release.
    pub seller: Address,
    /// Deposit held in custody.
    pub amount: Amount,
    /// Delivery deadline.
    pub expected_by: Timestamp,
    /// Shipment bound by the seller, if any.
    pub shipment: Option<ShipmentRef>,
    /// Lifecycle status.
    pub status: EscrowStatus,
    /// Clock reading at deposit.
    pub created_at: Timestamp,
    /// Applied transitions, oldest first.
    pub history: Vec<TransitionRecord>,
}

impl Escrow {
    /// Whether the escrow's deadline has passed at `now`.
    ///
    /// The deadline instant itself does not count as expired.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expected_by
    }

    /// Whether the escrow still holds its deposit in custody.
    pub fn is_open(&self) -> bool {
        self.status.holds_funds()
    }

    /// Check that `operation` is permitted from the current status.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::InvalidState`] otherwise.
    pub fn ensure_transition(&self, operation: Operation) -> Result<EscrowStatus, EscrowError> {
        operation
            .target(self.status)
            .ok_or(EscrowError::InvalidState {
                escrow_id: self.id,
                operation,
                status: self.status,
            })
    }

    /// The most recent transition, if any.
    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.history.last()
    }
}
