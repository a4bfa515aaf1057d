//! Adversarial custody tests.
//!
//! A hooked ledger calls back into the engine from inside a payout, the way
//! a hostile token contract would. The engine must reject any callback that
//! touches the escrow being settled, tolerate callbacks on other escrows,
//! and restore the escrow exactly when the payout itself fails.

use std::sync::{mpsc, Arc, Weak};

use parking_lot::Mutex;

use trustmesh_core::{Address, Amount, Clock, EscrowId, ManualClock, ShipmentRef, Timestamp};
use trustmesh_custody::{CustodyAsset, CustodyError, InMemoryLedger};
use trustmesh_escrow::{
    EngineConfig, ErrorKind, EscrowEngine, EscrowEvent, EscrowStatus, EventLog, EventSink,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const DAY: u64 = 24 * 60 * 60;

fn addr(s: &str) -> Address {
    Address::new(s).unwrap()
}

fn units(n: u128) -> Amount {
    Amount::new(n)
}

fn after(clock: &ManualClock, secs: u64) -> Timestamp {
    clock.now().checked_add_secs(secs).unwrap()
}

type Hook = Box<dyn FnOnce(&EscrowEngine) + Send>;

/// Ledger that runs a one-shot callback into the engine before each payout.
struct HookedLedger {
    inner: InMemoryLedger,
    engine: Mutex<Weak<EscrowEngine>>,
    hook: Mutex<Option<Hook>>,
}

impl HookedLedger {
    fn new() -> Self {
        Self {
            inner: InMemoryLedger::usdc(),
            engine: Mutex::new(Weak::new()),
            hook: Mutex::new(None),
        }
    }

    fn arm(&self, hook: impl FnOnce(&EscrowEngine) + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    fn fire(&self) {
        let hook = self.hook.lock().take();
        let engine = self.engine.lock().upgrade();
        if let (Some(hook), Some(engine)) = (hook, engine) {
            hook(&engine);
        }
    }
}

impl CustodyAsset for HookedLedger {
    fn transfer_from(
        &self,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        self.inner.transfer_from(spender, owner, to, amount)
    }

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), CustodyError> {
        self.fire();
        self.inner.transfer(from, to, amount)
    }

    fn balance_of(&self, account: &Address) -> Amount {
        self.inner.balance_of(account)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.inner.allowance(owner, spender)
    }
}

/// Sink that holds `ShipmentLinked` until released, then records each
/// event once delivery finishes.
struct GatedSink {
    delivered: Mutex<Vec<&'static str>>,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl EventSink for GatedSink {
    fn emit(&self, event: &EscrowEvent) {
        if matches!(event, EscrowEvent::ShipmentLinked { .. }) {
            if let Some(gate) = self.gate.lock().take() {
                gate.recv().unwrap();
            }
        }
        self.delivered.lock().push(event.name());
    }
}

struct Harness {
    engine: Arc<EscrowEngine>,
    ledger: Arc<HookedLedger>,
    clock: ManualClock,
    log: Arc<EventLog>,
    buyer: Address,
    seller: Address,
    agent: Address,
    custody: Address,
}

impl Harness {
    fn new() -> Self {
        let ledger = Arc::new(HookedLedger::new());
        let clock = ManualClock::new(Timestamp::parse("2026-05-04T00:00:00Z").unwrap());
        let log = Arc::new(EventLog::new());
        let (agent, custody) = (addr("agent"), addr("custody"));
        let engine = Arc::new(
            EscrowEngine::new(
                EngineConfig::new(agent.clone(), custody.clone()),
                ledger.clone(),
                Arc::new(clock.clone()),
            )
            .unwrap()
            .with_event_sink(log.clone()),
        );
        *ledger.engine.lock() = Arc::downgrade(&engine);

        let buyer = addr("buyer");
        ledger.inner.mint(&buyer, units(1_000_000)).unwrap();
        ledger.inner.approve(&buyer, &custody, units(1_000_000));
        Self {
            engine,
            ledger,
            clock,
            log,
            buyer,
            seller: addr("seller"),
            agent,
            custody,
        }
    }

    fn linked(&self, amount: u128, shipment: &str) -> EscrowId {
        let expected_by = after(&self.clock, 3 * DAY);
        let id = self
            .engine
            .create_escrow(&self.buyer, &self.seller, units(amount), expected_by)
            .unwrap();
        self.engine
            .link_shipment(&self.seller, id, ShipmentRef::new(shipment).unwrap())
            .unwrap();
        id
    }

    fn assert_conserved(&self) {
        assert_eq!(
            Some(self.ledger.balance_of(&self.custody)),
            self.engine.custodied_total()
        );
    }
}

// ---------------------------------------------------------------------------
// Reentrancy guard
// ---------------------------------------------------------------------------

#[test]
fn callback_refund_during_release_is_rejected() {
    let h = Harness::new();
    let id = h.linked(100, "SHIP-A");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let (agent, sink) = (h.agent.clone(), seen.clone());
    h.ledger.arm(move |engine| {
        // Readers see the committed status until the payout lands.
        let status = engine.escrow(id).map(|e| e.status).ok();
        let second = engine.refund(&agent, id, "double spend").map_err(|e| e.kind());
        sink.lock().push((status, second));
    });

    h.engine.release_funds(&h.agent, id, "delivered").unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, Some(EscrowStatus::Linked));
    assert_eq!(seen[0].1, Err(ErrorKind::Reentrancy));
    assert_eq!(h.engine.escrow(id).unwrap().status, EscrowStatus::Released);

    assert_eq!(h.ledger.balance_of(&h.seller), units(100));
    assert_eq!(h.ledger.balance_of(&h.buyer), units(999_900));
    assert_eq!(h.engine.escrow(id).unwrap().history.len(), 3);
    h.assert_conserved();
}

#[test]
fn callback_on_same_escrow_cannot_relink_or_extend() {
    let h = Harness::new();
    let expected_by = after(&h.clock, DAY);
    let id = h
        .engine
        .create_escrow(&h.buyer, &h.seller, units(5), expected_by)
        .unwrap();
    h.clock.advance_secs(2 * DAY).unwrap();

    let results = Arc::new(Mutex::new(Vec::new()));
    let (seller, agent, sink) = (h.seller.clone(), h.agent.clone(), results.clone());
    h.ledger.arm(move |engine| {
        let link = engine.link_shipment(&seller, id, ShipmentRef::new("SHIP-LATE").unwrap());
        let extend = engine.extend_escrow(&agent, id, DAY, "");
        let mut out = sink.lock();
        out.push(link.map_err(|e| e.kind()));
        out.push(extend.map(|_| ()).map_err(|e| e.kind()));
    });

    h.engine.cancel_unlinked(&h.buyer, id, "no shipment").unwrap();
    assert_eq!(
        *results.lock(),
        vec![Err(ErrorKind::Reentrancy), Err(ErrorKind::Reentrancy)]
    );
    assert!(h.engine.escrow(id).unwrap().shipment.is_none());
    assert_eq!(h.engine.escrow(id).unwrap().status, EscrowStatus::Cancelled);
}

#[test]
fn callback_on_other_escrow_proceeds() {
    let h = Harness::new();
    let first = h.linked(10, "SHIP-1");
    let second = h.linked(20, "SHIP-2");

    let agent = h.agent.clone();
    let outcome = Arc::new(Mutex::new(None));
    let sink = outcome.clone();
    h.ledger.arm(move |engine| {
        *sink.lock() = Some(engine.release_funds(&agent, second, "").map_err(|e| e.kind()));
    });

    h.engine.refund(&h.agent, first, "").unwrap();
    assert_eq!(*outcome.lock(), Some(Ok(())));
    assert_eq!(h.engine.escrow(first).unwrap().status, EscrowStatus::Refunded);
    assert_eq!(h.engine.escrow(second).unwrap().status, EscrowStatus::Released);
    assert_eq!(h.ledger.balance_of(&h.seller), units(20));
    h.assert_conserved();
}

// ---------------------------------------------------------------------------
// Rollback on failed payout
// ---------------------------------------------------------------------------

#[test]
fn frozen_seller_rolls_back_release() {
    let h = Harness::new();
    let id = h.linked(42, "SHIP-F");
    let before = h.engine.escrow(id).unwrap();
    let events_before = h.log.len();

    h.ledger.inner.freeze(&h.seller);
    let err = h.engine.release_funds(&h.agent, id, "delivered").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CustodyFailure);
    assert_eq!(err.reason(), "frozen");

    assert_eq!(h.engine.escrow(id).unwrap(), before);
    assert_eq!(h.log.len(), events_before);
    h.assert_conserved();

    // The escrow is no longer in flight: the agent can still refund.
    h.engine.refund(&h.agent, id, "seller sanctioned").unwrap();
    assert_eq!(h.ledger.balance_of(&h.buyer), units(1_000_000));
    h.assert_conserved();
}

#[test]
fn observers_never_see_a_pending_payout() {
    let h = Harness::new();
    let id = h.linked(100, "SHIP-P");
    h.ledger.inner.freeze(&h.seller);

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    h.ledger.arm(move |engine| {
        // A callback on the paying thread and an auditor on another thread.
        let local = (engine.escrow(id).ok().map(|e| e.status), engine.custodied_total());
        let remote = std::thread::scope(|s| {
            s.spawn(|| {
                let snapshot = engine.snapshot();
                (
                    engine.escrow(id).ok().map(|e| e.status),
                    engine.custodied_total(),
                    snapshot.escrows[0].status,
                )
            })
            .join()
            .unwrap()
        });
        sink.lock().push((local, remote));
    });

    assert!(h.engine.release_funds(&h.agent, id, "").is_err());
    let observed = observed.lock();
    assert_eq!(observed.len(), 1);
    let (local, remote) = observed[0];
    assert_eq!(local, (Some(EscrowStatus::Linked), Some(units(100))));
    assert_eq!(
        remote,
        (Some(EscrowStatus::Linked), Some(units(100)), EscrowStatus::Linked)
    );
    assert_eq!(h.engine.escrow(id).unwrap().status, EscrowStatus::Linked);
    h.assert_conserved();
}

// ---------------------------------------------------------------------------
// Multi-threaded callers
// ---------------------------------------------------------------------------

#[test]
fn concurrent_creations_get_contiguous_ids() {
    let ledger = Arc::new(InMemoryLedger::usdc());
    let clock = ManualClock::new(Timestamp::parse("2026-05-04T00:00:00Z").unwrap());
    let custody = addr("custody");
    let engine = EscrowEngine::new(
        EngineConfig::new(addr("agent"), custody.clone()),
        ledger.clone(),
        Arc::new(clock.clone()),
    )
    .unwrap();
    let expected_by = after(&clock, DAY);

    let buyers: Vec<Address> = (0..8).map(|n| addr(&format!("buyer-{n}"))).collect();
    for buyer in &buyers {
        ledger.mint(buyer, units(1_000)).unwrap();
        ledger.approve(buyer, &custody, units(1_000));
    }

    let ids = Mutex::new(Vec::new());
    std::thread::scope(|s| {
        for buyer in &buyers {
            let (engine, ids) = (&engine, &ids);
            s.spawn(move || {
                for _ in 0..25 {
                    let id = engine
                        .create_escrow(buyer, &addr("seller"), units(4), expected_by)
                        .unwrap();
                    ids.lock().push(id.get());
                }
            });
        }
    });

    let mut ids = ids.into_inner();
    ids.sort_unstable();
    assert_eq!(ids, (1..=200).collect::<Vec<u64>>());
    assert_eq!(engine.escrow_count(), 200);
    assert_eq!(ledger.balance_of(&custody), units(800));
    assert_eq!(engine.custodied_total(), Some(units(800)));
}

#[test]
fn racing_settlements_pay_out_once() {
    let h = Harness::new();
    for round in 0..20 {
        let id = h.linked(50, &format!("SHIP-RACE-{round}"));
        let results = Mutex::new(Vec::new());
        std::thread::scope(|s| {
            s.spawn(|| {
                let r = h.engine.release_funds(&h.agent, id, "").map_err(|e| e.kind());
                results.lock().push(r);
            });
            s.spawn(|| {
                let r = h.engine.refund(&h.agent, id, "").map_err(|e| e.kind());
                results.lock().push(r);
            });
        });
        let results = results.into_inner();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "{results:?}");
        for r in results.iter().filter_map(|r| r.err()) {
            assert!(matches!(r, ErrorKind::InvalidState | ErrorKind::Reentrancy));
        }
        h.assert_conserved();
    }
    let settled = h
        .ledger
        .balance_of(&h.seller)
        .checked_add(h.ledger.balance_of(&h.buyer));
    assert_eq!(settled, Some(units(1_000_000)));
    assert_eq!(h.ledger.balance_of(&h.custody), Amount::ZERO);
}

#[test]
fn events_reach_sinks_in_commit_order() {
    let ledger = Arc::new(InMemoryLedger::usdc());
    let clock = ManualClock::new(Timestamp::parse("2026-05-04T00:00:00Z").unwrap());
    let (agent, custody) = (addr("agent"), addr("custody"));
    let (buyer, seller) = (addr("buyer"), addr("seller"));
    let (open_gate, gate) = mpsc::channel();
    let sink = Arc::new(GatedSink {
        delivered: Mutex::new(Vec::new()),
        gate: Mutex::new(Some(gate)),
    });
    let engine = EscrowEngine::new(
        EngineConfig::new(agent.clone(), custody.clone()),
        ledger.clone(),
        Arc::new(clock.clone()),
    )
    .unwrap()
    .with_event_sink(sink.clone());
    ledger.mint(&buyer, units(10)).unwrap();
    ledger.approve(&buyer, &custody, units(10));
    let id = engine
        .create_escrow(&buyer, &seller, units(10), after(&clock, DAY))
        .unwrap();

    std::thread::scope(|s| {
        s.spawn(|| {
            engine
                .link_shipment(&seller, id, ShipmentRef::new("SHIP-ORDER").unwrap())
                .unwrap();
        });
        // The link is committed while its event is still held by the sink.
        while engine.escrow(id).unwrap().status != EscrowStatus::Linked {
            std::thread::yield_now();
        }
        engine.release_funds(&agent, id, "delivered").unwrap();
        open_gate.send(()).unwrap();
    });

    assert_eq!(
        *sink.delivered.lock(),
        vec!["EscrowCreated", "ShipmentLinked", "FundsReleased"]
    );
    assert_eq!(ledger.balance_of(&seller), units(10));
}
