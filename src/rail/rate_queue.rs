//! Pending rate changes of a single rail.
//!
//! When a rail's rate changes before the elapsed span has been settled, the
//! old rate is queued together with the epoch it stopped applying at. A
//! later settlement walks the queue to price each sub-span at the rate that
//! was actually in force, then drops the entries it fully consumed.

use crate::core::amount::{accrue, Amount, Epoch};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateQueueError {
    #[error("rate change until epoch {attempted} does not follow queued epoch {last}")]
    NonMonotonic { last: Epoch, attempted: Epoch },
}

/// `rate` applied to every epoch up to and including `until_epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateChange {
    pub until_epoch: Epoch,
    pub rate: Amount,
    /// Settled cursor of the rail when the change was queued.
    pub settled_up_to_before: Epoch,
}

/// A sub-span `(start, end]` priced at a single rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: Epoch,
    pub end: Epoch,
    pub rate: Amount,
}

impl Segment {
    pub fn epochs(&self) -> u64 {
        self.end - self.start
    }

    /// `rate × (end − start)`, or `None` on overflow.
    pub fn amount(&self) -> Option<Amount> {
        accrue(self.rate, self.epochs())
    }
}

/// Ordered queue of [`RateChange`]s, oldest first, strictly increasing in
/// `until_epoch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateChangeQueue {
    changes: VecDeque<RateChange>,
}

impl RateChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateChange> {
        self.changes.iter()
    }

    /// Epoch of the newest queued change, if any.
    pub fn last_until(&self) -> Option<Epoch> {
        self.changes.back().map(|change| change.until_epoch)
    }

    /// Append a change. Its `until_epoch` must exceed every queued one.
    pub fn enqueue(&mut self, change: RateChange) -> Result<(), RateQueueError> {
        if let Some(last) = self.last_until() {
            if change.until_epoch <= last {
                return Err(RateQueueError::NonMonotonic {
                    last,
                    attempted: change.until_epoch,
                });
            }
        }
        self.changes.push_back(change);
        Ok(())
    }

    /// Drop every change whose span ends at or before `settled_up_to`.
    /// Returns how many were removed.
    pub fn drain_settled(&mut self, settled_up_to: Epoch) -> usize {
        let mut drained = 0;
        while let Some(front) = self.changes.front() {
            if front.until_epoch > settled_up_to {
                break;
            }
            self.changes.pop_front();
            drained += 1;
        }
        drained
    }

    /// Highest rate among queued changes still covering epochs after `epoch`.
    pub fn max_rate_after(&self, epoch: Epoch) -> Option<Amount> {
        self.changes
            .iter()
            .filter(|change| change.until_epoch > epoch)
            .map(|change| change.rate)
            .max()
    }

    /// Partition `(from, to]` into sub-spans: one per queued change that ends
    /// inside the span, then a final one at `current_rate`.
    pub fn segments(&self, from: Epoch, to: Epoch, current_rate: Amount) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut cursor = from;
        for change in &self.changes {
            if cursor >= to {
                break;
            }
            if change.until_epoch <= cursor {
                continue;
            }
            let end = change.until_epoch.min(to);
            segments.push(Segment {
                start: cursor,
                end,
                rate: change.rate,
            });
            cursor = end;
        }
        if cursor < to {
            segments.push(Segment {
                start: cursor,
                end: to,
                rate: current_rate,
            });
        }
        segments
    }

    /// Unadjusted amount owed for `(from, to]`, or `None` on overflow.
    ///
    /// ```
    /// use rail_engine::rail::rate_queue::{RateChange, RateChangeQueue};
    /// use rust_decimal_macros::dec;
    ///
    /// let mut queue = RateChangeQueue::new();
    /// queue
    ///     .enqueue(RateChange { until_epoch: 5, rate: dec!(10), settled_up_to_before: 0 })
    ///     .unwrap();
    /// assert_eq!(queue.naive_amount(0, 10, dec!(20)), Some(dec!(150)));
    /// ```
    pub fn naive_amount(&self, from: Epoch, to: Epoch, current_rate: Amount) -> Option<Amount> {
        self.segments(from, to, current_rate)
            .iter()
            .try_fold(Decimal::ZERO, |total, segment| {
                total.checked_add(segment.amount()?)
            })
    }

    /// Furthest epoch in `(from, to]` whose accrual fits in `budget`.
    ///
    /// Returns the epoch reached and the amount it costs. Partial epochs are
    /// never bought, and zero-rate sub-spans are free.
    pub fn affordable_until(
        &self,
        from: Epoch,
        to: Epoch,
        current_rate: Amount,
        budget: Amount,
    ) -> (Epoch, Amount) {
        let mut reached = from;
        let mut spent = Decimal::ZERO;
        for segment in self.segments(from, to, current_rate) {
            if segment.rate.is_zero() {
                reached = segment.end;
                continue;
            }
            let remaining = budget - spent;
            match segment.amount() {
                Some(cost) if cost <= remaining => {
                    spent += cost;
                    reached = segment.end;
                }
                _ => {
                    let epochs = (remaining / segment.rate)
                        .floor()
                        .to_u64()
                        .unwrap_or(0)
                        .min(segment.epochs());
                    reached = segment.start + epochs;
                    spent += segment.rate * Decimal::from(epochs);
                    break;
                }
            }
        }
        (reached, spent)
    }
}
