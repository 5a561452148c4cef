use crate::core::amount::{Amount, Epoch};
use crate::core::party::PartyId;
use crate::rail::model::RailId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// What happened to a rail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RailEventKind {
    Created {
        payer: PartyId,
        payee: PartyId,
        payment_rate: Amount,
        lockup_held: Amount,
    },
    PaymentModified {
        old_rate: Amount,
        new_rate: Amount,
        one_time_payment: Amount,
    },
    LockupModified {
        lockup_period: Epoch,
        lockup_fixed: Amount,
    },
    Terminated {
        end_epoch: Epoch,
    },
    Settled {
        settled_up_to: Epoch,
        net_amount_paid: Amount,
        commission_paid: Amount,
        note: String,
    },
    Closed,
    Frozen {
        reason: String,
    },
    Unfrozen,
}

/// A committed change to one rail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailEvent {
    pub id: Uuid,
    pub rail_id: RailId,
    /// Caller-supplied epoch of the operation.
    pub epoch: Epoch,
    pub recorded_at: DateTime<Utc>,
    pub kind: RailEventKind,
}

impl RailEvent {
    pub fn new(rail_id: RailId, epoch: Epoch, kind: RailEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            rail_id,
            epoch,
            recorded_at: Utc::now(),
            kind,
        }
    }
}

/// Bounded in-memory event log. The oldest events are dropped first.
#[derive(Debug)]
pub struct Journal {
    capacity: usize,
    events: Mutex<VecDeque<RailEvent>>,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, rail_id: RailId, epoch: Epoch, kind: RailEventKind) {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(RailEvent::new(rail_id, epoch, kind));
    }

    /// Retained events of `rail_id`, oldest first.
    pub fn events(&self, rail_id: RailId) -> Vec<RailEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.rail_id == rail_id)
            .cloned()
            .collect()
    }

    /// The `limit` most recent events across all rails, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<RailEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_filtered_by_rail_in_order() {
        let journal = Journal::new(10);
        journal.record(RailId::new(1), 0, RailEventKind::Closed);
        journal.record(RailId::new(2), 1, RailEventKind::Unfrozen);
        journal.record(RailId::new(1), 2, RailEventKind::Terminated { end_epoch: 12 });

        let events = journal.events(RailId::new(1));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].epoch, 0);
        assert_eq!(events[1].kind, RailEventKind::Terminated { end_epoch: 12 });
        assert_ne!(events[0].id, events[1].id);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let journal = Journal::new(2);
        for epoch in 0..5 {
            journal.record(RailId::new(1), epoch, RailEventKind::Unfrozen);
        }
        assert_eq!(journal.len(), 2);
        let epochs: Vec<_> = journal.recent(10).iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![3, 4]);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = RailEvent::new(RailId::new(4), 9, RailEventKind::Terminated { end_epoch: 19 });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "terminated");
        assert_eq!(json["kind"]["end_epoch"], 19);
        assert_eq!(json["rail_id"], 4);
    }
}
