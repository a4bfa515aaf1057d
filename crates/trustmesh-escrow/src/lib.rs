//! # trustmesh-escrow: Escrow Lifecycle Engine
//!
//! A buyer deposits funds into custody against a seller; a fixed agent
//! arbitrates release or refund; a deadline protects the buyer when the
//! seller never ships.
//!
//! - **Escrow** ([`escrow`]): the record, its status machine, and its audit
//!   trail.
//!
//! - **Registry** ([`registry`]): append-only arena of records with the
//!   global shipment index.
//!
//! - **Access** ([`access`]): caller checks against buyer, seller, and agent.
//!
//! - **Engine** ([`engine`]): the six operations, fail-atomic against the
//!   custody asset, with a per-escrow reentrancy guard.
//!
//! - **Events** ([`events`]): notifications emitted after commit.
//!
//! - **Config** ([`config`]): agent, custody account, extension cap, and
//!   release gate.

pub mod access;
pub mod config;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod events;
pub mod registry;

// Re-export primary types.
pub use access::{AccessGate, Role};
pub use config::{ConfigError, EngineConfig, ReleaseGate, DEFAULT_MAX_EXTENSION_SECS};
pub use engine::EscrowEngine;
pub use error::{ErrorKind, EscrowError};
pub use escrow::{Escrow, EscrowStatus, Operation, TransitionRecord};
pub use events::{EscrowEvent, EventLog, EventSink, FanoutSink, NullSink, TracingSink};
pub use registry::{Registry, RegistrySnapshot};
