//! # Custody Asset Contract
//!
//! Defines the [`CustodyAsset`] trait: the narrow interface through which
//! the escrow engine reaches the token ledger that holds escrowed funds.
//!
//! ## Calling Convention
//!
//! A ledger call carries its caller explicitly. `transfer` moves funds out
//! of `from` (the engine passes its own custody account), and
//! `transfer_from` spends `spender`'s allowance over `owner`'s balance.
//!
//! ## Failure Semantics
//!
//! Every mutating call either fully applies or returns an error with no
//! effect. The engine relies on this to roll back its own state when a
//! payout fails.
//!
//! Methods are synchronous: a transfer succeeds or fails before the call
//! returns, and there is no pending state to poll.

use thiserror::Error;

use trustmesh_core::{Address, Amount};

/// Reasons a custody ledger rejects a transfer.
///
/// [`CustodyError::reason`] returns the stable token callers match on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    /// The payer's balance is below the transfer amount.
    #[error("balance: {account} holds {available}, transfer needs {required}")]
    InsufficientBalance {
        /// The account being debited.
        account: Address,
        /// Its current balance.
        available: Amount,
        /// The transfer amount.
        required: Amount,
    },

    /// The spender's allowance over the owner's funds is below the amount.
    #[error(
        "allowance: {spender} may spend {available} of {owner}'s funds, transfer needs {required}"
    )]
    InsufficientAllowance {
        /// The account whose funds would be spent.
        owner: Address,
        /// The account spending them.
        spender: Address,
        /// The current allowance.
        available: Amount,
        /// The transfer amount.
        required: Amount,
    },

    /// The account is frozen by the ledger and can neither send nor receive.
    #[error("frozen: account {0} is frozen")]
    Frozen(Address),

    /// Crediting the amount would overflow the recipient balance or supply.
    #[error("overflow: crediting {amount} to {account} exceeds the ledger's range")]
    Overflow {
        /// The account being credited.
        account: Address,
        /// The amount that did not fit.
        amount: Amount,
    },
}

impl CustodyError {
    /// Stable failure token.
    ///
    /// | Variant | Token |
    /// |---|---|
    /// | `InsufficientBalance` | `"balance"` |
    /// | `InsufficientAllowance` | `"allowance"` |
    /// | `Frozen` | `"frozen"` |
    /// | `Overflow` | `"overflow"` |
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InsufficientBalance { .. } => "balance",
            Self::InsufficientAllowance { .. } => "allowance",
            Self::Frozen(_) => "frozen",
            Self::Overflow { .. } => "overflow",
        }
    }
}

/// The transferable-balance ledger holding escrowed funds.
///
/// The trait is object-safe (`Send + Sync`) so the engine can hold it as
/// `Arc<dyn CustodyAsset>`.
///
/// ## Reentrancy
///
/// Implementations may call back into arbitrary code during a transfer
/// (hooks, observers, a hostile token). The engine treats every call as
/// potentially reentrant and guards accordingly.
pub trait CustodyAsset: Send + Sync {
    /// Move `amount` from `owner` to `to`, spending `spender`'s allowance.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::InsufficientAllowance`] or
    /// [`CustodyError::InsufficientBalance`] when the pull cannot be
    /// satisfied, [`CustodyError::Frozen`] if either side is frozen.
    fn transfer_from(
        &self,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), CustodyError>;

    /// Move `amount` from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::InsufficientBalance`] if `from` cannot cover
    /// the amount, [`CustodyError::Frozen`] if either side is frozen.
    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), CustodyError>;

    /// Current balance of `account`.
    fn balance_of(&self, account: &Address) -> Amount;

    /// Amount `spender` may still pull from `owner`.
    fn allowance(&self, owner: &Address, spender: &Address) -> Amount;
}
