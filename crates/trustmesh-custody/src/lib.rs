//! # trustmesh-custody: Custody Asset Boundary
//!
//! The escrow engine never owns token accounting. It moves funds into and
//! out of its custody account through the [`CustodyAsset`] trait, which
//! exposes exactly the four operations the engine consumes:
//!
//! - **`transfer_from`**: pull an approved amount from a payer.
//! - **`transfer`**: push an amount out of the engine's own account.
//! - **`balance_of`** / **`allowance`**: read-only precondition checks.
//!
//! [`InMemoryLedger`] is a complete fungible-token ledger (mint, approve,
//! account freezing) implementing the trait. It backs tests, local
//! simulations, and any deployment where the engine and ledger share a
//! process.

pub mod asset;
pub mod ledger;

pub use asset::{CustodyAsset, CustodyError};
pub use ledger::InMemoryLedger;
