//! # In-Memory Token Ledger
//!
//! A fungible-token ledger with the accounting the escrow engine delegates
//! to its custody asset: balances, allowances, minting, and account freezes.
//!
//! All state sits behind one `parking_lot::RwLock`. A mutating call takes
//! the write lock once, validates, and applies, so a failed transfer leaves
//! no partial debit. The lock is never held while calling out.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde::Serialize;

use trustmesh_core::{Address, Amount};

use crate::asset::{CustodyAsset, CustodyError};

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<Address, Amount>,
    allowances: HashMap<(Address, Address), Amount>,
    frozen: HashSet<Address>,
    total_supply: Amount,
}

impl LedgerState {
    fn balance(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(Amount::ZERO)
    }

    fn ensure_not_frozen(&self, account: &Address) -> Result<(), CustodyError> {
        if self.frozen.contains(account) {
            return Err(CustodyError::Frozen(account.clone()));
        }
        Ok(())
    }

    /// Validate and apply a balance move. Nothing is written unless every
    /// check passes.
    fn move_funds(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        self.ensure_not_frozen(from)?;
        self.ensure_not_frozen(to)?;
        let available = self.balance(from);
        let Some(debited) = available.checked_sub(amount) else {
            return Err(CustodyError::InsufficientBalance {
                account: from.clone(),
                available,
                required: amount,
            });
        };
        if from == to {
            return Ok(());
        }
        let Some(credited) = self.balance(to).checked_add(amount) else {
            return Err(CustodyError::Overflow {
                account: to.clone(),
                amount,
            });
        };
        self.balances.insert(from.clone(), debited);
        self.balances.insert(to.clone(), credited);
        Ok(())
    }
}

/// Point-in-time export of a ledger, ordered by account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    /// Asset ticker.
    pub symbol: String,
    /// Decimal places of one whole token.
    pub decimals: u32,
    /// Sum of all balances.
    pub total_supply: Amount,
    /// Non-zero balances.
    pub balances: BTreeMap<Address, Amount>,
}

/// Thread-safe in-memory fungible-token ledger.
#[derive(Debug)]
pub struct InMemoryLedger {
    symbol: String,
    decimals: u32,
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    /// Create an empty ledger for an asset with the given ticker and
    /// decimal places.
    pub fn new(symbol: impl Into<String>, decimals: u32) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// A six-decimal USD stablecoin ledger.
    pub fn usdc() -> Self {
        Self::new("USDC", 6)
    }

    /// Asset ticker.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Decimal places of one whole token.
    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Sum of all balances.
    pub fn total_supply(&self) -> Amount {
        self.state.read().total_supply
    }

    /// Create `amount` new tokens in `to`'s balance.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::Overflow`] if the balance or total supply
    /// would overflow, [`CustodyError::Frozen`] if `to` is frozen.
    pub fn mint(&self, to: &Address, amount: Amount) -> Result<(), CustodyError> {
        let mut state = self.state.write();
        state.ensure_not_frozen(to)?;
        let overflow = || CustodyError::Overflow {
            account: to.clone(),
            amount,
        };
        let supply = state.total_supply.checked_add(amount).ok_or_else(overflow)?;
        let balance = state.balance(to).checked_add(amount).ok_or_else(overflow)?;
        state.total_supply = supply;
        state.balances.insert(to.clone(), balance);
        tracing::debug!(symbol = %self.symbol, to = %to, amount = %amount, "minted");
        Ok(())
    }

    /// Set `spender`'s allowance over `owner`'s funds, replacing any
    /// previous allowance.
    pub fn approve(&self, owner: &Address, spender: &Address, amount: Amount) {
        self.state
            .write()
            .allowances
            .insert((owner.clone(), spender.clone()), amount);
    }

    /// Freeze `account`: it can no longer send or receive.
    pub fn freeze(&self, account: &Address) {
        self.state.write().frozen.insert(account.clone());
        tracing::debug!(symbol = %self.symbol, account = %account, "account frozen");
    }

    /// Lift a freeze placed by [`freeze`](Self::freeze).
    pub fn unfreeze(&self, account: &Address) {
        self.state.write().frozen.remove(account);
    }

    /// Export balances for inspection or persistence.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read();
        LedgerSnapshot {
            symbol: self.symbol.clone(),
            decimals: self.decimals,
            total_supply: state.total_supply,
            balances: state
                .balances
                .iter()
                .filter(|(_, amount)| !amount.is_zero())
                .map(|(account, amount)| (account.clone(), *amount))
                .collect(),
        }
    }
}

impl CustodyAsset for InMemoryLedger {
    fn transfer_from(
        &self,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        let mut state = self.state.write();
        let key = (owner.clone(), spender.clone());
        let available = state.allowances.get(&key).copied().unwrap_or(Amount::ZERO);
        let Some(remaining) = available.checked_sub(amount) else {
            return Err(CustodyError::InsufficientAllowance {
                owner: owner.clone(),
                spender: spender.clone(),
                available,
                required: amount,
            });
        };
        state.move_funds(owner, to, amount)?;
        state.allowances.insert(key, remaining);
        Ok(())
    }

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), CustodyError> {
        self.state.write().move_funds(from, to, amount)
    }

    fn balance_of(&self, account: &Address) -> Amount {
        self.state.read().balance(account)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.state
            .read()
            .allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(Amount::ZERO)
    }
}
