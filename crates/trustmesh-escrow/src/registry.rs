//! # Escrow Registry
//!
//! Arena of escrow records keyed by [`EscrowId`], plus the shipment index
//! that enforces one escrow per shipment reference.
//!
//! Identifiers are dense: the escrow with id `n` lives at index `n - 1`,
//! and `escrow_count` always equals the highest id assigned. Records are
//! never removed.
//!
//! The registry has no locking of its own. The engine owns it behind a
//! single mutex, and only the engine's crate can mutate records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use trustmesh_core::{Address, Amount, EscrowId, ShipmentRef, Timestamp};

use crate::error::EscrowError;
use crate::escrow::{Escrow, EscrowStatus, Operation, TransitionRecord};

/// Fields supplied by the buyer at deposit.
#[derive(Debug, Clone)]
pub(crate) struct NewEscrow {
    pub buyer: Address,
    pub seller: Address,
    pub amount: Amount,
    pub expected_by: Timestamp,
    pub created_at: Timestamp,
}

/// Serializable export of every escrow, in id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Number of escrows ever created.
    pub escrow_count: u64,
    /// All escrows, ordered by id.
    pub escrows: Vec<Escrow>,
}

/// Storage for escrow records.
#[derive(Debug, Default)]
pub struct Registry {
    escrows: Vec<Escrow>,
    shipments: HashMap<ShipmentRef, EscrowId>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from a snapshot.
    ///
    /// # Errors
    ///
    /// Rejects snapshots whose ids are not `1..=n` in order, whose count
    /// disagrees with the record list, or that bind one shipment to two
    /// escrows. Also rejects records with a zero amount, and records whose
    /// shipment link contradicts their status.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Result<Self, EscrowError> {
        let mut registry = Self::new();
        if snapshot.escrow_count != snapshot.escrows.len() as u64 {
            return Err(EscrowError::CorruptSnapshot(format!(
                "snapshot declares {} escrows but carries {}",
                snapshot.escrow_count,
                snapshot.escrows.len()
            )));
        }
        for escrow in snapshot.escrows {
            let expected = registry.next_id()?;
            if escrow.id != expected {
                return Err(EscrowError::CorruptSnapshot(format!(
                    "expected {expected}, found {}",
                    escrow.id
                )));
            }
            check_record(&escrow)?;
            if let Some(shipment) = &escrow.shipment {
                if let Some(linked_to) = registry.shipments.get(shipment) {
                    return Err(EscrowError::CorruptSnapshot(format!(
                        "{shipment} bound to both {linked_to} and {}",
                        escrow.id
                    )));
                }
                registry.shipments.insert(shipment.clone(), escrow.id);
            }
            registry.escrows.push(escrow);
        }
        Ok(registry)
    }

    /// Number of escrows ever created; also the highest id assigned.
    pub fn escrow_count(&self) -> u64 {
        self.escrows.len() as u64
    }

    /// The id the next escrow will receive.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::IdSpaceExhausted`] once `u64::MAX` has been
    /// assigned.
    pub fn next_id(&self) -> Result<EscrowId, EscrowError> {
        match self.last_id() {
            None => Ok(EscrowId::FIRST),
            Some(last) => last.next().ok_or(EscrowError::IdSpaceExhausted { last }),
        }
    }

    fn last_id(&self) -> Option<EscrowId> {
        self.escrows.last().map(|e| e.id)
    }

    fn index(id: EscrowId) -> Option<usize> {
        usize::try_from(id.get() - 1).ok()
    }

    /// Look up an escrow.
    pub fn get(&self, id: EscrowId) -> Option<&Escrow> {
        Self::index(id).and_then(|i| self.escrows.get(i))
    }

    /// Look up an escrow or fail with [`EscrowError::UnknownEscrow`].
    pub fn require(&self, id: EscrowId) -> Result<&Escrow, EscrowError> {
        self.get(id).ok_or(EscrowError::UnknownEscrow(id))
    }

    pub(crate) fn require_mut(&mut self, id: EscrowId) -> Result<&mut Escrow, EscrowError> {
        Self::index(id)
            .and_then(|i| self.escrows.get_mut(i))
            .ok_or(EscrowError::UnknownEscrow(id))
    }

    /// The escrow a shipment reference is bound to, if any.
    pub fn shipment_owner(&self, shipment: &ShipmentRef) -> Option<EscrowId> {
        self.shipments.get(shipment).copied()
    }

    /// Iterate escrows in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Escrow> {
        self.escrows.iter()
    }

    /// Sum of deposits still held by open escrows, or `None` on overflow.
    pub fn open_total(&self) -> Option<Amount> {
        Amount::checked_sum(self.escrows.iter().filter(|e| e.is_open()).map(|e| e.amount))
    }

    /// Export every record.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            escrow_count: self.escrow_count(),
            escrows: self.escrows.clone(),
        }
    }

    /// Append a funded escrow and return its id.
    pub(crate) fn insert(&mut self, new: NewEscrow) -> Result<EscrowId, EscrowError> {
        let id = self.next_id()?;
        let record = TransitionRecord {
            operation: Operation::Create,
            from_status: None,
            to_status: EscrowStatus::Created,
            actor: new.buyer.clone(),
            at: new.created_at,
            evidence_digest: None,
        };
        self.escrows.push(Escrow {
            id,
            buyer: new.buyer,
            seller: new.seller,
            amount: new.amount,
            expected_by: new.expected_by,
            shipment: None,
            status: EscrowStatus::Created,
            created_at: new.created_at,
            history: vec![record],
        });
        Ok(id)
    }

    /// Fail if `shipment` is already bound.
    pub(crate) fn ensure_shipment_free(&self, shipment: &ShipmentRef) -> Result<(), EscrowError> {
        match self.shipments.get(shipment) {
            Some(linked_to) => Err(EscrowError::ShipmentAlreadyLinked {
                shipment: shipment.clone(),
                linked_to: *linked_to,
            }),
            None => Ok(()),
        }
    }

    /// Bind `shipment` to `id` and move the escrow to Linked.
    pub(crate) fn bind_shipment(
        &mut self,
        id: EscrowId,
        shipment: ShipmentRef,
        record: TransitionRecord,
    ) -> Result<(), EscrowError> {
        self.ensure_shipment_free(&shipment)?;
        let escrow = self.require_mut(id)?;
        escrow.shipment = Some(shipment.clone());
        escrow.status = record.to_status;
        escrow.history.push(record);
        self.shipments.insert(shipment, id);
        Ok(())
    }
}

/// Field consistency of a single imported record.
fn check_record(escrow: &Escrow) -> Result<(), EscrowError> {
    if escrow.amount.is_zero() {
        return Err(EscrowError::CorruptSnapshot(format!(
            "{} holds a zero amount",
            escrow.id
        )));
    }
    // Refunds are allowed with or without a linked shipment.
    let link_required = match escrow.status {
        EscrowStatus::Created | EscrowStatus::Cancelled => Some(false),
        EscrowStatus::Linked | EscrowStatus::Released => Some(true),
        EscrowStatus::Refunded => None,
    };
    match link_required {
        Some(required) if required != escrow.shipment.is_some() => {
            Err(EscrowError::CorruptSnapshot(format!(
                "{} is {} but {} a shipment",
                escrow.id,
                escrow.status,
                if escrow.shipment.is_some() { "has" } else { "lacks" }
            )))
        }
        _ => Ok(()),
    }
}
