use crate::accounts::approval::Commitment;
use crate::core::amount::{accrue, validate_amount, validate_bps, Amount, Epoch};
use crate::core::error::LedgerError;
use crate::core::party::PartyId;
use crate::core::token::TokenId;
use crate::rail::rate_queue::{RateChange, RateChangeQueue, RateQueueError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque rail identifier, assigned in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RailId(u64);

impl RailId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle stage of a rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RailState {
    /// Accruing at its payment rate with no end epoch.
    Active,
    /// End epoch set; only settlement (and rate decreases) remain.
    Terminating,
    /// Settled through its end epoch; all lockup released.
    Closed,
}

/// Terms a rail is opened with.
///
/// ```
/// use rail_engine::prelude::*;
/// use rust_decimal_macros::dec;
///
/// let terms = RailTerms::new(
///     TokenId::new("USDFC"),
///     PartyId::new("client"),
///     PartyId::new("provider"),
///     PartyId::new("operator"),
/// )
/// .with_rate(dec!(10))
/// .with_lockup(100, dec!(50))
/// .with_commission_bps(250);
///
/// assert_eq!(terms.base_lockup(), Some(dec!(1050)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailTerms {
    pub token: TokenId,
    pub payer: PartyId,
    pub payee: PartyId,
    pub operator: PartyId,
    pub arbiter: Option<String>,
    pub payment_rate: Amount,
    pub lockup_period: Epoch,
    pub lockup_fixed: Amount,
    pub commission_rate_bps: u32,
}

impl RailTerms {
    pub fn new(token: TokenId, payer: PartyId, payee: PartyId, operator: PartyId) -> Self {
        Self {
            token,
            payer,
            payee,
            operator,
            arbiter: None,
            payment_rate: Decimal::ZERO,
            lockup_period: 0,
            lockup_fixed: Decimal::ZERO,
            commission_rate_bps: 0,
        }
    }

    pub fn with_rate(mut self, payment_rate: Amount) -> Self {
        self.payment_rate = payment_rate;
        self
    }

    pub fn with_lockup(mut self, lockup_period: Epoch, lockup_fixed: Amount) -> Self {
        self.lockup_period = lockup_period;
        self.lockup_fixed = lockup_fixed;
        self
    }

    pub fn with_commission_bps(mut self, commission_rate_bps: u32) -> Self {
        self.commission_rate_bps = commission_rate_bps;
        self
    }

    pub fn with_arbiter(mut self, arbiter: impl Into<String>) -> Self {
        self.arbiter = Some(arbiter.into());
        self
    }

    /// `lockupFixed + paymentRate × lockupPeriod`.
    pub fn base_lockup(&self) -> Option<Amount> {
        accrue(self.payment_rate, self.lockup_period)?.checked_add(self.lockup_fixed)
    }

    /// Check the bounds that do not depend on ledger state.
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_amount("payment rate", self.payment_rate)?;
        validate_amount("fixed lockup", self.lockup_fixed)?;
        validate_bps(self.commission_rate_bps)?;
        if self.payer == self.payee {
            return Err(LedgerError::InvalidParameter(format!(
                "payer and payee must differ, both are {}",
                self.payer
            )));
        }
        if self.base_lockup().is_none() {
            return Err(LedgerError::InvalidParameter(
                "lockup overflows the amount range".to_string(),
            ));
        }
        Ok(())
    }
}

/// A continuous payment channel from `payer` to `payee`.
///
/// Fields are read through accessors; only the ledger mutates a rail, and
/// it does so on a clone that replaces the original once the accompanying
/// balance batch has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rail {
    pub(crate) id: RailId,
    pub(crate) token: TokenId,
    pub(crate) payer: PartyId,
    pub(crate) payee: PartyId,
    pub(crate) operator: PartyId,
    pub(crate) arbiter: Option<String>,
    pub(crate) payment_rate: Amount,
    pub(crate) lockup_period: Epoch,
    pub(crate) lockup_fixed: Amount,
    pub(crate) commission_rate_bps: u32,
    pub(crate) created_at: Epoch,
    pub(crate) settled_up_to: Epoch,
    pub(crate) end_epoch: Option<Epoch>,
    pub(crate) rate_changes: RateChangeQueue,
    /// Funds held in the payer's locked balance for this rail.
    pub(crate) lockup_held: Amount,
    /// Epoch through which elapsed accrual has been escrowed.
    pub(crate) lockup_synced_to: Epoch,
    pub(crate) state: RailState,
    pub(crate) frozen: Option<String>,
}

impl Rail {
    pub(crate) fn open(id: RailId, terms: RailTerms, now: Epoch, lockup_held: Amount) -> Self {
        Self {
            id,
            token: terms.token,
            payer: terms.payer,
            payee: terms.payee,
            operator: terms.operator,
            arbiter: terms.arbiter,
            payment_rate: terms.payment_rate,
            lockup_period: terms.lockup_period,
            lockup_fixed: terms.lockup_fixed,
            commission_rate_bps: terms.commission_rate_bps,
            created_at: now,
            settled_up_to: now,
            end_epoch: None,
            rate_changes: RateChangeQueue::new(),
            lockup_held,
            lockup_synced_to: now,
            state: RailState::Active,
            frozen: None,
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> RailId {
        self.id
    }

    pub fn token(&self) -> &TokenId {
        &self.token
    }

    pub fn payer(&self) -> &PartyId {
        &self.payer
    }

    pub fn payee(&self) -> &PartyId {
        &self.payee
    }

    pub fn operator(&self) -> &PartyId {
        &self.operator
    }

    pub fn arbiter(&self) -> Option<&str> {
        self.arbiter.as_deref()
    }

    pub fn payment_rate(&self) -> Amount {
        self.payment_rate
    }

    pub fn lockup_period(&self) -> Epoch {
        self.lockup_period
    }

    pub fn lockup_fixed(&self) -> Amount {
        self.lockup_fixed
    }

    pub fn commission_rate_bps(&self) -> u32 {
        self.commission_rate_bps
    }

    pub fn created_at(&self) -> Epoch {
        self.created_at
    }

    pub fn settled_up_to(&self) -> Epoch {
        self.settled_up_to
    }

    pub fn end_epoch(&self) -> Option<Epoch> {
        self.end_epoch
    }

    pub fn rate_changes(&self) -> &RateChangeQueue {
        &self.rate_changes
    }

    pub fn lockup_held(&self) -> Amount {
        self.lockup_held
    }

    pub fn lockup_synced_to(&self) -> Epoch {
        self.lockup_synced_to
    }

    pub fn state(&self) -> RailState {
        self.state
    }

    pub fn frozen_reason(&self) -> Option<&str> {
        self.frozen.as_deref()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    /// Rate and base lockup counted against the operator's approval.
    /// Closed rails commit nothing.
    pub fn commitment(&self) -> Commitment {
        if self.state == RailState::Closed {
            return Commitment::NONE;
        }
        Commitment {
            rate: self.payment_rate,
            lockup: accrue(self.payment_rate, self.lockup_period)
                .and_then(|variable| variable.checked_add(self.lockup_fixed))
                .unwrap_or(Decimal::MAX),
        }
    }

    /// Whether `party` is the payer, payee or operator of this rail.
    pub fn involves(&self, party: &PartyId) -> bool {
        &self.payer == party || &self.payee == party || &self.operator == party
    }

    /// Latest epoch whose rate is already fixed: the settled cursor or the
    /// newest queued change.
    pub(crate) fn rate_boundary(&self) -> Epoch {
        self.rate_changes
            .last_until()
            .map_or(self.settled_up_to, |last| last.max(self.settled_up_to))
    }

    /// Switch to `new_rate` from `now` on, queueing the old rate for the
    /// unsettled span that ends at `now`.
    pub(crate) fn change_rate(&mut self, new_rate: Amount, now: Epoch) -> Result<(), RateQueueError> {
        if new_rate == self.payment_rate {
            return Ok(());
        }
        if now > self.rate_boundary() {
            self.rate_changes.enqueue(RateChange {
                until_epoch: now,
                rate: self.payment_rate,
                settled_up_to_before: self.settled_up_to,
            })?;
        }
        self.payment_rate = new_rate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn terms() -> RailTerms {
        RailTerms::new(
            TokenId::new("USDFC"),
            PartyId::new("client"),
            PartyId::new("provider"),
            PartyId::new("operator"),
        )
        .with_rate(dec!(10))
        .with_lockup(10, dec!(5))
    }

    #[test]
    fn test_terms_validation() {
        assert!(terms().validate().is_ok());
        assert!(terms().with_commission_bps(10_001).validate().is_err());
        assert!(terms().with_rate(dec!(-1)).validate().is_err());
        assert!(terms().with_rate(dec!(0.5)).validate().is_err());

        let mut same_party = terms();
        same_party.payee = same_party.payer.clone();
        assert!(same_party.validate().is_err());
    }

    #[test]
    fn test_open_rail_is_active() {
        let rail = Rail::open(RailId::new(1), terms(), 42, dec!(105));
        assert_eq!(rail.state(), RailState::Active);
        assert_eq!(rail.settled_up_to(), 42);
        assert_eq!(rail.lockup_synced_to(), 42);
        assert!(rail.rate_changes().is_empty());
        assert_eq!(
            rail.commitment(),
            Commitment {
                rate: dec!(10),
                lockup: dec!(105)
            }
        );
    }

    #[test]
    fn test_change_rate_queues_old_rate() {
        let mut rail = Rail::open(RailId::new(1), terms(), 0, dec!(105));
        rail.change_rate(dec!(20), 5).unwrap();
        assert_eq!(rail.payment_rate(), dec!(20));
        let queued: Vec<_> = rail.rate_changes().iter().copied().collect();
        assert_eq!(
            queued,
            vec![RateChange {
                until_epoch: 5,
                rate: dec!(10),
                settled_up_to_before: 0
            }]
        );
    }

    #[test]
    fn test_change_rate_twice_in_one_epoch_keeps_single_entry() {
        let mut rail = Rail::open(RailId::new(1), terms(), 0, dec!(105));
        rail.change_rate(dec!(20), 5).unwrap();
        rail.change_rate(dec!(30), 5).unwrap();
        assert_eq!(rail.rate_changes().len(), 1);
        assert_eq!(rail.payment_rate(), dec!(30));
    }

    #[test]
    fn test_change_rate_at_settled_cursor_needs_no_entry() {
        let mut rail = Rail::open(RailId::new(1), terms(), 7, dec!(105));
        rail.change_rate(dec!(1), 7).unwrap();
        assert!(rail.rate_changes().is_empty());
    }

    #[test]
    fn test_involves() {
        let rail = Rail::open(RailId::new(1), terms(), 0, dec!(105));
        assert!(rail.involves(&PartyId::new("client")));
        assert!(rail.involves(&PartyId::new("operator")));
        assert!(!rail.involves(&PartyId::new("stranger")));
    }
}
