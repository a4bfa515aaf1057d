//! # Escrow Lifecycle Engine
//!
//! Implements the six escrow operations over a [`Registry`], a
//! [`CustodyAsset`], an injected [`Clock`], and an [`EventSink`].
//!
//! ## Operation Shape
//!
//! Every operation runs in up to three phases:
//!
//! 1. Under the registry lock: resolve the caller's role, validate status
//!    and deadline, then apply the status change and mark the escrow
//!    in flight with its committed status.
//! 2. With the lock released: call the custody asset.
//! 3. Re-lock and commit (append the history record, queue the event), or
//!    restore the committed status if custody rejected the transfer.
//!
//! Read accessors report the committed status of an in-flight escrow, so
//! no observer sees a transition that may still be rolled back.
//!
//! ## Event Order
//!
//! Events are queued under the registry lock in commit order and delivered
//! with no lock held. One caller at a time drains the queue; a caller that
//! finds a drain in progress leaves its event to that drainer. Sinks
//! therefore see every escrow's events in the order its transitions
//! committed, and may call back into the engine.
//!
//! ## Security Invariant
//!
//! An escrow marked in flight rejects every operation with
//! [`EscrowError::Reentrant`] until the outer call finishes. The marker is
//! held by a guard whose `Drop` restores the prior status, so every exit
//! path, including a panicking custody implementation, clears it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use trustmesh_core::{Address, Amount, Clock, EscrowId, ShipmentRef, Timestamp};
use trustmesh_custody::CustodyAsset;

use crate::access::AccessGate;
use crate::config::{ConfigError, EngineConfig, ReleaseGate};
use crate::error::EscrowError;
use crate::escrow::{evidence_digest, Escrow, EscrowStatus, Operation, TransitionRecord};
use crate::events::{EscrowEvent, EventSink, NullSink};
use crate::registry::{NewEscrow, Registry, RegistrySnapshot};

#[derive(Debug, Default)]
struct EngineState {
    registry: Registry,
    /// Escrows with a payout outstanding, mapped to their committed status.
    in_flight: HashMap<EscrowId, EscrowStatus>,
    /// Committed events awaiting delivery, oldest first.
    outbox: VecDeque<EscrowEvent>,
    draining: bool,
}

impl EngineState {
    fn ensure_idle(&self, escrow_id: EscrowId, operation: Operation) -> Result<(), EscrowError> {
        if self.in_flight.contains_key(&escrow_id) {
            tracing::warn!(%escrow_id, %operation, "rejected reentrant call");
            return Err(EscrowError::Reentrant {
                escrow_id,
                operation,
            });
        }
        Ok(())
    }

    fn committed_status(&self, escrow: &Escrow) -> EscrowStatus {
        self.in_flight
            .get(&escrow.id)
            .copied()
            .unwrap_or(escrow.status)
    }

    fn committed(&self, escrow_id: EscrowId) -> Result<Escrow, EscrowError> {
        let mut escrow = self.registry.require(escrow_id)?.clone();
        escrow.status = self.committed_status(&escrow);
        Ok(escrow)
    }

    fn committed_open_total(&self) -> Option<Amount> {
        Amount::checked_sum(
            self.registry
                .iter()
                .filter(|e| self.committed_status(e).holds_funds())
                .map(|e| e.amount),
        )
    }

    fn committed_snapshot(&self) -> RegistrySnapshot {
        let mut snapshot = self.registry.snapshot();
        for escrow in &mut snapshot.escrows {
            if let Some(status) = self.in_flight.get(&escrow.id) {
                escrow.status = *status;
            }
        }
        snapshot
    }
}

/// A settlement whose status change is applied but whose payout has not
/// yet been confirmed.
///
/// Dropping it without [`commit`](Self::commit) restores the prior status.
/// It locks the engine state on drop, so it must never be dropped while
/// that lock is held.
struct PendingSettlement<'a> {
    state: &'a Mutex<EngineState>,
    escrow_id: EscrowId,
    record: Option<TransitionRecord>,
}

impl PendingSettlement<'_> {
    fn commit(mut self, event: EscrowEvent) {
        let mut state = self.state.lock();
        if let (Some(record), Ok(escrow)) =
            (self.record.take(), state.registry.require_mut(self.escrow_id))
        {
            escrow.history.push(record);
        }
        state.in_flight.remove(&self.escrow_id);
        state.outbox.push_back(event);
    }
}

impl Drop for PendingSettlement<'_> {
    fn drop(&mut self) {
        if self.record.is_none() {
            return;
        }
        let mut state = self.state.lock();
        if let Some(prior) = state.in_flight.remove(&self.escrow_id) {
            if let Ok(escrow) = state.registry.require_mut(self.escrow_id) {
                escrow.status = prior;
            }
        }
    }
}

/// Clears the drain flag if a sink panics mid-delivery.
struct DrainGuard<'a>(&'a Mutex<EngineState>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().draining = false;
        }
    }
}

/// The escrow lifecycle engine.
///
/// `Send + Sync`; share it behind an `Arc`.
pub struct EscrowEngine {
    config: EngineConfig,
    gate: AccessGate,
    asset: Arc<dyn CustodyAsset>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    state: Mutex<EngineState>,
}

impl std::fmt::Debug for EscrowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowEngine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("escrow_count", &self.escrow_count())
            .finish_non_exhaustive()
    }
}

impl EscrowEngine {
    /// Create an engine with an empty registry and no event sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is inconsistent.
    pub fn new(
        config: EngineConfig,
        asset: Arc<dyn CustodyAsset>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            gate: AccessGate::new(config.agent.clone()),
            config,
            asset,
            clock,
            events: Arc::new(NullSink),
            state: Mutex::new(EngineState::default()),
        })
    }

    /// Deliver committed events to `sink`.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Resume from a previously exported registry.
    pub fn with_registry(self, registry: Registry) -> Self {
        self.state.lock().registry = registry;
        self
    }

    // ── Operations ─────────────────────────────────────────────────────

    /// Fund a new escrow from `caller`'s balance and return its id.
    ///
    /// Balance is checked before allowance. Nothing is recorded unless the
    /// deposit lands in custody.
    pub fn create_escrow(
        &self,
        caller: &Address,
        seller: &Address,
        amount: Amount,
        expected_by: Timestamp,
    ) -> Result<EscrowId, EscrowError> {
        let now = self.clock.now();
        if amount.is_zero() {
            return Err(EscrowError::InvalidAmount);
        }
        if expected_by <= now {
            return Err(EscrowError::InvalidDeadline { expected_by, now });
        }
        self.check_parties(caller, seller)?;

        let custody = &self.config.custody_account;
        let available = self.asset.balance_of(caller);
        if available < amount {
            tracing::debug!(buyer = %caller, %available, %amount, "deposit rejected: balance");
            return Err(EscrowError::InsufficientBalance {
                account: caller.clone(),
                available,
                required: amount,
            });
        }
        let allowance = self.asset.allowance(caller, custody);
        if allowance < amount {
            tracing::debug!(buyer = %caller, %allowance, %amount, "deposit rejected: allowance");
            return Err(EscrowError::InsufficientAllowance {
                owner: caller.clone(),
                spender: custody.clone(),
                available: allowance,
                required: amount,
            });
        }
        // Fail before moving funds if no id is left to assign.
        self.state.lock().registry.next_id()?;

        self.asset
            .transfer_from(custody, caller, custody, amount)
            .map_err(|e| {
                tracing::warn!(buyer = %caller, %amount, error = %e, "deposit pull failed");
                EscrowError::from_deposit_failure(caller, e)
            })?;

        let inserted = {
            let mut state = self.state.lock();
            let inserted = state.registry.insert(NewEscrow {
                buyer: caller.clone(),
                seller: seller.clone(),
                amount,
                expected_by,
                created_at: now,
            });
            if let Ok(escrow_id) = inserted {
                state.outbox.push_back(EscrowEvent::EscrowCreated {
                    escrow_id,
                    buyer: caller.clone(),
                    seller: seller.clone(),
                    amount,
                    expected_by,
                });
            }
            inserted
        };
        let escrow_id = match inserted {
            Ok(id) => id,
            Err(err) => {
                // A concurrent create took the last id while funds were in transit.
                if let Err(e) = self.asset.transfer(custody, caller, amount) {
                    tracing::error!(
                        buyer = %caller,
                        %amount,
                        error = %e,
                        "failed to return orphaned deposit"
                    );
                }
                return Err(err);
            }
        };

        tracing::info!(
            %escrow_id,
            operation = %Operation::Create,
            buyer = %caller,
            %seller,
            %amount,
            %expected_by,
            "escrow created"
        );
        self.deliver_events();
        Ok(escrow_id)
    }

    /// Bind a shipment reference to an escrow. Seller only.
    pub fn link_shipment(
        &self,
        caller: &Address,
        escrow_id: EscrowId,
        shipment: ShipmentRef,
    ) -> Result<(), EscrowError> {
        let operation = Operation::LinkShipment;
        let now = self.clock.now();
        {
            let mut state = self.state.lock();
            let escrow = state.registry.require(escrow_id)?;
            self.gate.require_seller(escrow, caller)?;
            state.ensure_idle(escrow_id, operation)?;
            let to_status = escrow.ensure_transition(operation)?;
            let record = TransitionRecord {
                operation,
                from_status: Some(escrow.status),
                to_status,
                actor: caller.clone(),
                at: now,
                evidence_digest: None,
            };
            state
                .registry
                .bind_shipment(escrow_id, shipment.clone(), record)?;
            state.outbox.push_back(EscrowEvent::ShipmentLinked {
                escrow_id,
                shipment: shipment.clone(),
            });
        }

        tracing::info!(%escrow_id, %operation, %shipment, "shipment linked");
        self.deliver_events();
        Ok(())
    }

    /// Push an escrow's deadline out by `extra_secs`. Agent only.
    ///
    /// `extra_secs` must be positive and no larger than the configured cap.
    pub fn extend_escrow(
        &self,
        caller: &Address,
        escrow_id: EscrowId,
        extra_secs: u64,
        reason: &str,
    ) -> Result<Timestamp, EscrowError> {
        let operation = Operation::Extend;
        self.gate.require_agent(caller)?;
        let now = self.clock.now();
        let evidence = evidence_digest(escrow_id, operation, reason)?;
        let max_secs = self.config.max_extension_secs;
        let bad_extension = EscrowError::BadExtension {
            escrow_id,
            requested_secs: extra_secs,
            max_secs,
        };

        let expected_by = {
            let mut state = self.state.lock();
            let escrow = state.registry.require(escrow_id)?;
            state.ensure_idle(escrow_id, operation)?;
            let to_status = escrow.ensure_transition(operation)?;
            if extra_secs == 0 || extra_secs > max_secs {
                tracing::debug!(%escrow_id, extra_secs, max_secs, "extension rejected");
                return Err(bad_extension);
            }
            let expected_by = escrow
                .expected_by
                .checked_add_secs(extra_secs)
                .ok_or(bad_extension)?;
            let record = TransitionRecord {
                operation,
                from_status: Some(escrow.status),
                to_status,
                actor: caller.clone(),
                at: now,
                evidence_digest: evidence,
            };
            let escrow = state.registry.require_mut(escrow_id)?;
            escrow.expected_by = expected_by;
            escrow.history.push(record);
            state.outbox.push_back(EscrowEvent::EscrowExtended {
                escrow_id,
                extra_secs,
                expected_by,
                reason: reason.to_string(),
            });
            expected_by
        };

        tracing::info!(
            %escrow_id,
            %operation,
            extra_secs,
            %expected_by,
            "escrow extended"
        );
        self.deliver_events();
        Ok(expected_by)
    }

    /// Pay a linked escrow's deposit to its seller. Agent only.
    pub fn release_funds(
        &self,
        caller: &Address,
        escrow_id: EscrowId,
        note: &str,
    ) -> Result<(), EscrowError> {
        self.gate.require_agent(caller)?;
        self.settle(caller, escrow_id, Operation::Release, note)
    }

    /// Return an open escrow's deposit to its buyer. Agent only.
    pub fn refund(
        &self,
        caller: &Address,
        escrow_id: EscrowId,
        reason: &str,
    ) -> Result<(), EscrowError> {
        self.gate.require_agent(caller)?;
        self.settle(caller, escrow_id, Operation::Refund, reason)
    }

    /// Reclaim an unlinked escrow after its deadline. Buyer only.
    pub fn cancel_unlinked(
        &self,
        caller: &Address,
        escrow_id: EscrowId,
        reason: &str,
    ) -> Result<(), EscrowError> {
        self.settle(caller, escrow_id, Operation::CancelUnlinked, reason)
    }

    /// Shared path for the three fund-moving transitions.
    fn settle(
        &self,
        caller: &Address,
        escrow_id: EscrowId,
        operation: Operation,
        text: &str,
    ) -> Result<(), EscrowError> {
        let now = self.clock.now();
        let evidence = evidence_digest(escrow_id, operation, text)?;

        let (pending, payee, amount) = {
            let mut state = self.state.lock();
            let escrow = state.registry.require(escrow_id)?;
            if operation == Operation::CancelUnlinked {
                self.gate.require_buyer(escrow, caller)?;
            }
            state.ensure_idle(escrow_id, operation)?;
            let to_status = escrow.ensure_transition(operation)?;
            self.check_deadline(escrow, operation, now)?;

            let payee = match operation {
                Operation::Release => escrow.seller.clone(),
                _ => escrow.buyer.clone(),
            };
            let amount = escrow.amount;
            let prior = escrow.status;
            let record = TransitionRecord {
                operation,
                from_status: Some(prior),
                to_status,
                actor: caller.clone(),
                at: now,
                evidence_digest: evidence,
            };

            state.registry.require_mut(escrow_id)?.status = to_status;
            state.in_flight.insert(escrow_id, prior);
            let pending = PendingSettlement {
                state: &self.state,
                escrow_id,
                record: Some(record),
            };
            (pending, payee, amount)
        };

        if let Err(source) = self
            .asset
            .transfer(&self.config.custody_account, &payee, amount)
        {
            drop(pending);
            tracing::warn!(
                %escrow_id,
                %operation,
                %payee,
                %amount,
                error = %source,
                "payout failed, escrow restored"
            );
            return Err(EscrowError::Custody {
                escrow_id,
                operation,
                source,
            });
        }
        let event = match operation {
            Operation::Release => EscrowEvent::FundsReleased {
                escrow_id,
                seller: payee.clone(),
                amount,
                note: text.to_string(),
            },
            Operation::Refund => EscrowEvent::EscrowRefunded {
                escrow_id,
                buyer: payee.clone(),
                amount,
                reason: text.to_string(),
            },
            _ => EscrowEvent::EscrowCancelled {
                escrow_id,
                buyer: payee.clone(),
                amount,
                reason: text.to_string(),
            },
        };
        pending.commit(event);

        tracing::info!(%escrow_id, %operation, %payee, %amount, "escrow settled");
        self.deliver_events();
        Ok(())
    }

    /// Deliver queued events in commit order, unless another caller is
    /// already doing so.
    fn deliver_events(&self) {
        {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }
        let _guard = DrainGuard(&self.state);
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.outbox.pop_front() {
                    Some(event) => event,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            self.events.emit(&next);
        }
    }

    fn check_deadline(
        &self,
        escrow: &Escrow,
        operation: Operation,
        now: Timestamp,
    ) -> Result<(), EscrowError> {
        let gated = match operation {
            Operation::CancelUnlinked => !escrow.is_expired(now),
            Operation::Release => {
                self.config.release_gate == ReleaseGate::AfterDeadline && now < escrow.expected_by
            }
            _ => false,
        };
        if gated {
            tracing::debug!(
                escrow_id = %escrow.id,
                %operation,
                expected_by = %escrow.expected_by,
                %now,
                "deadline not reached"
            );
            return Err(EscrowError::NotExpired {
                escrow_id: escrow.id,
                expected_by: escrow.expected_by,
                now,
            });
        }
        Ok(())
    }

    fn check_parties(&self, buyer: &Address, seller: &Address) -> Result<(), EscrowError> {
        let custody = &self.config.custody_account;
        if buyer == seller {
            return Err(EscrowError::InvalidCounterparty(
                "buyer and seller must differ".to_string(),
            ));
        }
        if buyer == custody || seller == custody {
            return Err(EscrowError::InvalidCounterparty(format!(
                "custody account {custody} cannot be a party"
            )));
        }
        Ok(())
    }

    // ── Accessors ──────────────────────────────────────────────────────

    /// Number of escrows ever created.
    pub fn escrow_count(&self) -> u64 {
        self.state.lock().registry.escrow_count()
    }

    /// Cap on a single deadline extension.
    pub fn max_extension_duration(&self) -> Duration {
        Duration::from_secs(self.config.max_extension_secs)
    }

    /// Snapshot of one escrow as last committed.
    pub fn escrow(&self, escrow_id: EscrowId) -> Result<Escrow, EscrowError> {
        self.state.lock().committed(escrow_id)
    }

    /// The configured agent.
    pub fn agent(&self) -> &Address {
        self.gate.agent()
    }

    /// The ledger account holding escrowed funds.
    pub fn custody_account(&self) -> &Address {
        &self.config.custody_account
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The escrow a shipment reference is bound to, if any.
    pub fn shipment_owner(&self, shipment: &ShipmentRef) -> Option<EscrowId> {
        self.state.lock().registry.shipment_owner(shipment)
    }

    /// Sum of deposits held by open escrows. Between operations this equals
    /// the custody account's balance on a ledger the engine has sole use of.
    pub fn custodied_total(&self) -> Option<Amount> {
        self.state.lock().committed_open_total()
    }

    /// Export every escrow record as last committed.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.state.lock().committed_snapshot()
    }
}
