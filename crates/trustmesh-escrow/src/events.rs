//! # Escrow Events
//!
//! Notifications emitted after an operation commits. A rejected or
//! rolled-back operation emits nothing.
//!
//! Sinks are called with no engine lock held, so a sink may read from (or
//! act on) the engine it observes.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use trustmesh_core::{Address, Amount, EscrowId, ShipmentRef, Timestamp};

/// A committed escrow transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EscrowEvent {
    /// A buyer funded a new escrow.
    EscrowCreated {
        escrow_id: EscrowId,
        buyer: Address,
        seller: Address,
        amount: Amount,
        expected_by: Timestamp,
    },
    /// The seller bound a shipment.
    ShipmentLinked {
        escrow_id: EscrowId,
        shipment: ShipmentRef,
    },
    /// The agent moved the deadline.
    EscrowExtended {
        escrow_id: EscrowId,
        extra_secs: u64,
        expected_by: Timestamp,
        reason: String,
    },
    /// Funds paid to the seller.
    FundsReleased {
        escrow_id: EscrowId,
        seller: Address,
        amount: Amount,
        note: String,
    },
    /// Funds returned to the buyer by the agent.
    EscrowRefunded {
        escrow_id: EscrowId,
        buyer: Address,
        amount: Amount,
        reason: String,
    },
    /// Funds returned to the buyer after the deadline passed unlinked.
    EscrowCancelled {
        escrow_id: EscrowId,
        buyer: Address,
        amount: Amount,
        reason: String,
    },
}

impl EscrowEvent {
    /// The escrow this event concerns.
    pub fn escrow_id(&self) -> EscrowId {
        match self {
            Self::EscrowCreated { escrow_id, .. }
            | Self::ShipmentLinked { escrow_id, .. }
            | Self::EscrowExtended { escrow_id, .. }
            | Self::FundsReleased { escrow_id, .. }
            | Self::EscrowRefunded { escrow_id, .. }
            | Self::EscrowCancelled { escrow_id, .. } => *escrow_id,
        }
    }

    /// Event name as it appears in the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::EscrowCreated { .. } => "EscrowCreated",
            Self::ShipmentLinked { .. } => "ShipmentLinked",
            Self::EscrowExtended { .. } => "EscrowExtended",
            Self::FundsReleased { .. } => "FundsReleased",
            Self::EscrowRefunded { .. } => "EscrowRefunded",
            Self::EscrowCancelled { .. } => "EscrowCancelled",
        }
    }
}

/// Receiver of committed escrow events.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Must not fail; sinks that can fail log and drop.
    fn emit(&self, event: &EscrowEvent);
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn emit(&self, event: &EscrowEvent) {
        (**self).emit(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &EscrowEvent) {}
}

/// Logs every event at `info` level under the `trustmesh::events` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EscrowEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => tracing::info!(
                target: "trustmesh::events",
                event = event.name(),
                escrow_id = %event.escrow_id(),
                %payload,
                "escrow event"
            ),
            Err(e) => tracing::warn!(
                target: "trustmesh::events",
                event = event.name(),
                error = %e,
                "failed to serialize escrow event"
            ),
        }
    }
}

/// Retains every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<Vec<EscrowEvent>>,
}

impl EventLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event so far.
    pub fn events(&self) -> Vec<EscrowEvent> {
        self.events.read().clone()
    }

    /// Events concerning one escrow.
    pub fn for_escrow(&self, id: EscrowId) -> Vec<EscrowEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.escrow_id() == id)
            .cloned()
            .collect()
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether no event has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// The most recent event.
    pub fn last(&self) -> Option<EscrowEvent> {
        self.events.read().last().cloned()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: &EscrowEvent) {
        self.events.write().push(event.clone());
    }
}

/// Forwards each event to every inner sink, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// An empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: std::sync::Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &EscrowEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn linked(n: u64) -> EscrowEvent {
        EscrowEvent::ShipmentLinked {
            escrow_id: EscrowId::new(n).unwrap(),
            shipment: ShipmentRef::new(format!("SHIP-{n}")).unwrap(),
        }
    }

    #[test]
    fn log_filters_by_escrow() {
        let log = EventLog::new();
        log.emit(&linked(1));
        log.emit(&linked(2));
        log.emit(&linked(1));
        assert_eq!(log.len(), 3);
        assert_eq!(log.for_escrow(EscrowId::FIRST).len(), 2);
        assert_eq!(log.last(), Some(linked(1)));
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(EventLog::new());
        let b = Arc::new(EventLog::new());
        let fanout = FanoutSink::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(NullSink));
        fanout.emit(&linked(4));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn serialized_tag_matches_name() {
        let event = linked(7);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["escrow_id"], 7);
        assert_eq!(json["shipment"], "SHIP-7");
    }
}
