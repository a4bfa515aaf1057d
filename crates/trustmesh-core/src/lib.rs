//! # trustmesh-core: Foundational Types for the TrustMesh Escrow Engine
//!
//! This crate defines the primitives every other crate in the workspace
//! builds on. It depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for domain primitives.** [`Address`], [`EscrowId`],
//!    [`ShipmentRef`] and [`Amount`] are distinct types with validated
//!    constructors. No bare strings or integers cross crate boundaries.
//!
//! 2. **Time is injected.** Nothing outside [`SystemClock`] reads the wall
//!    clock. Operations that depend on "now" take a [`Clock`], so tests drive
//!    time with [`ManualClock`].
//!
//! 3. **Audit evidence is content-addressed.** Notes and reasons attached to
//!    escrow transitions are hashed through [`CanonicalBytes`] into a
//!    [`ContentDigest`].
//!
//! ## Crate Policy
//!
//! - No dependencies on other `trustmesh-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod amount;
pub mod canonical;
pub mod digest;
pub mod error;
pub mod identity;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use amount::Amount;
pub use canonical::CanonicalBytes;
pub use digest::{sha256_digest, ContentDigest};
pub use error::{CanonicalizationError, ValidationError};
pub use identity::{Address, EscrowId, ShipmentRef};
pub use temporal::{Clock, ManualClock, SystemClock, Timestamp};
