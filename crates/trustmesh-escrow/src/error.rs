//! # Escrow Error Types
//!
//! Structured error hierarchy for the escrow engine. Every rejected
//! operation surfaces a distinct variant carrying the escrow, the caller or
//! status involved, and the values that failed the check.
//!
//! ## Reason Tokens
//!
//! External callers match on [`EscrowError::reason`], not on `Display`
//! text. The tokens are part of the engine's public contract:
//!
//! | Variant | Kind | Token |
//! |---|---|---|
//! | `NotBuyer` | `AccessDenied` | `"Not buyer"` |
//! | `NotSeller` | `AccessDenied` | `"Not seller"` |
//! | `NotAgent` | `AccessDenied` | `"Not agent"` |
//! | `InvalidState` | `InvalidState` | `"Invalid state"` |
//! | `InsufficientBalance` | `InsufficientBalance` | `"balance"` |
//! | `InsufficientAllowance` | `InsufficientAllowance` | `"allowance"` |
//! | `ShipmentAlreadyLinked` | `DuplicateReference` | `"Shipment already linked"` |
//! | `BadExtension` | `BoundExceeded` | `"Bad extension"` |
//! | `IdSpaceExhausted` | `BoundExceeded` | `"Id space exhausted"` |
//! | `NotExpired` | `NotExpired` | `"Not expired"` |
//! | `InvalidAmount` | `InvalidInput` | `"Invalid amount"` |
//! | `InvalidDeadline` | `InvalidInput` | `"Invalid deadline"` |
//! | `InvalidCounterparty` | `InvalidInput` | `"Invalid counterparty"` |
//! | `Validation` | `InvalidInput` | `"Invalid input"` |
//! | `Canonicalization` | `InvalidInput` | `"Invalid evidence"` |
//! | `CorruptSnapshot` | `InvalidInput` | `"Corrupt snapshot"` |
//! | `UnknownEscrow` | `NotFound` | `"Unknown escrow"` |
//! | `Reentrant` | `Reentrancy` | `"Reentrant call"` |
//! | `DepositRejected` | `CustodyFailure` | the ledger's own token |
//! | `Custody` | `CustodyFailure` | the ledger's own token (`"frozen"`, ...) |

use thiserror::Error;

use trustmesh_core::{
    Address, Amount, CanonicalizationError, EscrowId, ShipmentRef, Timestamp, ValidationError,
};
use trustmesh_custody::CustodyError;

use crate::escrow::{EscrowStatus, Operation};

/// Coarse classification of escrow failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller does not hold the role the operation requires.
    AccessDenied,
    /// The escrow's status does not permit the operation.
    InvalidState,
    /// The payer cannot cover the deposit.
    InsufficientBalance,
    /// The payer has not approved enough for the engine to pull.
    InsufficientAllowance,
    /// A shipment reference is already bound to another escrow.
    DuplicateReference,
    /// A configured or representable bound would be exceeded.
    BoundExceeded,
    /// The escrow's deadline has not passed yet.
    NotExpired,
    /// An argument failed validation.
    InvalidInput,
    /// No escrow exists under the given identifier.
    NotFound,
    /// The escrow already has an operation in flight.
    Reentrancy,
    /// The custody ledger rejected a payout; the operation was rolled back.
    CustodyFailure,
}

/// Errors arising from escrow operations.
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Caller is not the buyer of record.
    #[error("Not buyer: {caller} is not the buyer of {escrow_id}")]
    NotBuyer {
        /// The escrow acted on.
        escrow_id: EscrowId,
        /// The rejected caller.
        caller: Address,
    },

    /// Caller is not the seller of record.
    #[error("Not seller: {caller} is not the seller of {escrow_id}")]
    NotSeller {
        /// The escrow acted on.
        escrow_id: EscrowId,
        /// The rejected caller.
        caller: Address,
    },

    /// Caller is not the configured agent.
    #[error("Not agent: {caller} is not the escrow agent")]
    NotAgent {
        /// The rejected caller.
        caller: Address,
    },

    /// The escrow's status does not permit the operation.
    #[error("Invalid state: {escrow_id} cannot {operation} in status {status}")]
    InvalidState {
        /// The escrow acted on.
        escrow_id: EscrowId,
        /// The attempted operation.
        operation: Operation,
        /// The escrow's current status.
        status: EscrowStatus,
    },

    /// The buyer's balance cannot cover the deposit.
    #[error("balance: {account} holds {available}, deposit needs {required}")]
    InsufficientBalance {
        /// The paying account.
        account: Address,
        /// Its current balance.
        available: Amount,
        /// The deposit amount.
        required: Amount,
    },

    /// The buyer has not approved the engine for the full deposit.
    #[error("allowance: {owner} approved {available} for {spender}, deposit needs {required}")]
    InsufficientAllowance {
        /// The paying account.
        owner: Address,
        /// The engine's custody account.
        spender: Address,
        /// The current allowance.
        available: Amount,
        /// The deposit amount.
        required: Amount,
    },

    /// The shipment reference is already bound to an escrow.
    #[error("Shipment already linked: {shipment} is bound to {linked_to}")]
    ShipmentAlreadyLinked {
        /// The rejected reference.
        shipment: ShipmentRef,
        /// The escrow holding it.
        linked_to: EscrowId,
    },

    /// The extension is zero, exceeds the configured cap, or would move the
    /// deadline past the representable range.
    #[error("Bad extension: {escrow_id} requested {requested_secs}s, cap is {max_secs}s")]
    BadExtension {
        /// The escrow acted on.
        escrow_id: EscrowId,
        /// The requested extension in seconds.
        requested_secs: u64,
        /// The configured cap in seconds.
        max_secs: u64,
    },

    /// The registry has assigned every representable identifier.
    #[error("Id space exhausted: no identifier follows {last}")]
    IdSpaceExhausted {
        /// The last identifier assigned.
        last: EscrowId,
    },

    /// The deadline gating this operation has not passed.
    #[error("Not expired: {escrow_id} deadline {expected_by} has not passed (now {now})")]
    NotExpired {
        /// The escrow acted on.
        escrow_id: EscrowId,
        /// The escrow's deadline.
        expected_by: Timestamp,
        /// The clock reading at the time of the call.
        now: Timestamp,
    },

    /// Deposits must be positive.
    #[error("Invalid amount: deposits must be greater than zero")]
    InvalidAmount,

    /// The deadline supplied at creation is not in the future.
    #[error("Invalid deadline: {expected_by} is not after {now}")]
    InvalidDeadline {
        /// The rejected deadline.
        expected_by: Timestamp,
        /// The clock reading at the time of the call.
        now: Timestamp,
    },

    /// Buyer, seller, agent, and custody account must be distinct parties.
    #[error("Invalid counterparty: {0}")]
    InvalidCounterparty(String),

    /// A registry snapshot failed consistency checks on restore.
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// No escrow exists under the identifier.
    #[error("Unknown escrow: {0}")]
    UnknownEscrow(EscrowId),

    /// The escrow already has an operation in flight.
    #[error("Reentrant call: {operation} on {escrow_id} while another operation is in flight")]
    Reentrant {
        /// The escrow acted on.
        escrow_id: EscrowId,
        /// The rejected operation.
        operation: Operation,
    },

    /// The custody ledger rejected a deposit for a reason other than
    /// balance or allowance. No escrow was created.
    #[error("deposit from {buyer} rejected by custody: {source}")]
    DepositRejected {
        /// The paying account.
        buyer: Address,
        /// The ledger's rejection.
        #[source]
        source: CustodyError,
    },

    /// The custody ledger rejected a payout; the escrow was restored.
    #[error("custody transfer failed during {operation} of {escrow_id}: {source}")]
    Custody {
        /// The escrow acted on.
        escrow_id: EscrowId,
        /// The operation that was rolled back.
        operation: Operation,
        /// The ledger's rejection.
        #[source]
        source: CustodyError,
    },

    /// A domain primitive failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Evidence could not be canonicalized for digesting.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),
}

impl EscrowError {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotBuyer { .. } | Self::NotSeller { .. } | Self::NotAgent { .. } => {
                ErrorKind::AccessDenied
            }
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::InsufficientAllowance { .. } => ErrorKind::InsufficientAllowance,
            Self::ShipmentAlreadyLinked { .. } => ErrorKind::DuplicateReference,
            Self::BadExtension { .. } | Self::IdSpaceExhausted { .. } => ErrorKind::BoundExceeded,
            Self::NotExpired { .. } => ErrorKind::NotExpired,
            Self::InvalidAmount
            | Self::InvalidDeadline { .. }
            | Self::InvalidCounterparty(_)
            | Self::CorruptSnapshot(_)
            | Self::Validation(_)
            | Self::Canonicalization(_) => ErrorKind::InvalidInput,
            Self::UnknownEscrow(_) => ErrorKind::NotFound,
            Self::Reentrant { .. } => ErrorKind::Reentrancy,
            Self::DepositRejected { .. } | Self::Custody { .. } => ErrorKind::CustodyFailure,
        }
    }

    /// Stable reason token for callers to match on.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotBuyer { .. } => "Not buyer",
            Self::NotSeller { .. } => "Not seller",
            Self::NotAgent { .. } => "Not agent",
            Self::InvalidState { .. } => "Invalid state",
            Self::InsufficientBalance { .. } => "balance",
            Self::InsufficientAllowance { .. } => "allowance",
            Self::ShipmentAlreadyLinked { .. } => "Shipment already linked",
            Self::BadExtension { .. } => "Bad extension",
            Self::IdSpaceExhausted { .. } => "Id space exhausted",
            Self::NotExpired { .. } => "Not expired",
            Self::InvalidAmount => "Invalid amount",
            Self::InvalidDeadline { .. } => "Invalid deadline",
            Self::InvalidCounterparty(_) => "Invalid counterparty",
            Self::CorruptSnapshot(_) => "Corrupt snapshot",
            Self::UnknownEscrow(_) => "Unknown escrow",
            Self::Reentrant { .. } => "Reentrant call",
            Self::DepositRejected { source, .. } | Self::Custody { source, .. } => source.reason(),
            Self::Validation(_) => "Invalid input",
            Self::Canonicalization(_) => "Invalid evidence",
        }
    }

    /// Map a failed deposit pull onto the engine's taxonomy.
    pub(crate) fn from_deposit_failure(buyer: &Address, err: CustodyError) -> Self {
        match err {
            CustodyError::InsufficientBalance {
                account,
                available,
                required,
            } => Self::InsufficientBalance {
                account,
                available,
                required,
            },
            CustodyError::InsufficientAllowance {
                owner,
                spender,
                available,
                required,
            } => Self::InsufficientAllowance {
                owner,
                spender,
                available,
                required,
            },
            other => Self::DepositRejected {
                buyer: buyer.clone(),
                source: other,
            },
        }
    }
}
