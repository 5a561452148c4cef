//! Lockup requirements of a rail.
//!
//! An active rail holds three things in the payer's locked balance:
//!
//! 1. the fixed lockup, which also funds one-time payments;
//! 2. the escrowed accrual of `(settledUpTo, lockupSyncedTo]`, i.e. elapsed
//!    epochs the payer has already paid into lockup but that are not yet
//!    settled to the payee;
//! 3. `rate × lockupPeriod`, the guarantee for epochs not yet elapsed, at
//!    the highest of the current rate and any queued rate whose span is not
//!    yet settled.
//!
//! Termination turns (2) and (3) into the naive amount of
//! `(settledUpTo, endEpoch]`, where `endEpoch = lockupSyncedTo +
//! lockupPeriod`. That never exceeds the active requirement, so terminating
//! only ever releases funds.

use crate::accounts::store::{AccountError, AccountStore, BalanceOp};
use crate::core::amount::{accrue, Amount, Epoch};
use crate::core::error::LedgerError;
use crate::core::party::PartyId;
use crate::rail::model::{Rail, RailState};
use log::trace;
use rust_decimal::Decimal;

/// Movement needed to bring a rail's held lockup to its requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockupAdjustment {
    Balanced,
    /// Pull this much more from the payer's available balance.
    Lock(Amount),
    /// Return this much to the payer's available balance.
    Release(Amount),
}

impl LockupAdjustment {
    pub fn between(held: Amount, required: Amount) -> Self {
        if required > held {
            LockupAdjustment::Lock(required - held)
        } else if required < held {
            LockupAdjustment::Release(held - required)
        } else {
            LockupAdjustment::Balanced
        }
    }

    /// Store operation for this adjustment, if any.
    pub fn to_op(self, payer: &PartyId) -> Option<BalanceOp> {
        match self {
            LockupAdjustment::Balanced => None,
            LockupAdjustment::Lock(amount) => Some(BalanceOp::Lock {
                owner: payer.clone(),
                amount,
            }),
            LockupAdjustment::Release(amount) => Some(BalanceOp::Unlock {
                owner: payer.clone(),
                amount,
            }),
        }
    }
}

/// How far a payer can currently fund an active rail's accrual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPlan {
    /// Epoch the accrual is escrowed through after the sync.
    pub synced_to: Epoch,
    /// Amount moved into lockup by the sync.
    pub amount: Amount,
}

impl SyncPlan {
    pub fn is_complete(&self, now: Epoch) -> bool {
        self.synced_to >= now
    }
}

pub struct LockupAccounter;

impl LockupAccounter {
    /// Minimum funds the rail must hold in the payer's locked balance.
    pub fn required_lockup(rail: &Rail) -> Result<Amount, LedgerError> {
        let overflow = || LedgerError::InvalidParameter(format!(
            "lockup requirement of rail {} overflows the amount range",
            rail.id
        ));
        match rail.state {
            RailState::Closed => Ok(Decimal::ZERO),
            RailState::Terminating => {
                let end = rail.end_epoch.unwrap_or(rail.settled_up_to);
                let remaining = rail
                    .rate_changes
                    .naive_amount(rail.settled_up_to, end, rail.payment_rate)
                    .ok_or_else(overflow)?;
                remaining.checked_add(rail.lockup_fixed).ok_or_else(overflow)
            }
            RailState::Active => {
                let escrowed = rail
                    .rate_changes
                    .naive_amount(rail.settled_up_to, rail.lockup_synced_to, rail.payment_rate)
                    .ok_or_else(overflow)?;
                let rate = rail
                    .rate_changes
                    .max_rate_after(rail.settled_up_to)
                    .map_or(rail.payment_rate, |queued| queued.max(rail.payment_rate));
                let guarantee = accrue(rate, rail.lockup_period).ok_or_else(overflow)?;
                escrowed
                    .checked_add(guarantee)
                    .and_then(|total| total.checked_add(rail.lockup_fixed))
                    .ok_or_else(overflow)
            }
        }
    }

    /// How far `available` funds can escrow the rail's accrual toward `now`.
    /// Terminating and closed rails need no sync.
    pub fn plan_sync(rail: &Rail, available: Amount, now: Epoch) -> SyncPlan {
        if rail.state != RailState::Active || now <= rail.lockup_synced_to {
            return SyncPlan {
                synced_to: rail.lockup_synced_to,
                amount: Decimal::ZERO,
            };
        }
        let (synced_to, amount) = rail.rate_changes.affordable_until(
            rail.lockup_synced_to,
            now,
            rail.payment_rate,
            available,
        );
        SyncPlan { synced_to, amount }
    }

    /// Bring the rail's held lockup to its requirement in one store batch,
    /// carrying `payouts` out of the payer's locked funds with it.
    ///
    /// A shortfall is locked before the payouts and a surplus released after
    /// them. On failure neither the store nor the rail changes. A payout the
    /// payer's locked balance cannot cover means the store disagrees with the
    /// rail and is reported as [`LedgerError::InvariantViolation`].
    pub fn reconcile(
        rail: &mut Rail,
        store: &dyn AccountStore,
        payouts: Vec<BalanceOp>,
    ) -> Result<LockupAdjustment, LedgerError> {
        let required = Self::required_lockup(rail)?;
        let adjustment = LockupAdjustment::between(rail.lockup_held, required);
        let mut batch = Vec::with_capacity(payouts.len() + 1);
        if let LockupAdjustment::Lock(_) = adjustment {
            batch.extend(adjustment.to_op(&rail.payer));
        }
        batch.extend(payouts);
        if let LockupAdjustment::Release(_) = adjustment {
            batch.extend(adjustment.to_op(&rail.payer));
        }

        store.apply(&rail.token, &batch).map_err(|err| match err {
            AccountError::InsufficientLocked { .. } => LedgerError::InvariantViolation {
                rail_id: rail.id,
                reason: err.to_string(),
            },
            other => other.into(),
        })?;
        trace!("rail {} lockup {:?}, held {}", rail.id, adjustment, required);
        rail.lockup_held = required;
        Ok(adjustment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::memory::InMemoryAccountStore;
    use crate::core::token::TokenId;
    use crate::rail::model::{RailId, RailTerms};
    use rust_decimal_macros::dec;

    fn rail(rate: Amount, period: Epoch, fixed: Amount) -> Rail {
        let terms = RailTerms::new(
            TokenId::new("USDFC"),
            PartyId::new("client"),
            PartyId::new("provider"),
            PartyId::new("operator"),
        )
        .with_rate(rate)
        .with_lockup(period, fixed);
        let base = terms.base_lockup().unwrap();
        Rail::open(RailId::new(1), terms, 0, base)
    }

    #[test]
    fn test_required_lockup_fresh_rail() {
        let rail = rail(dec!(1), 10, dec!(5));
        assert_eq!(LockupAccounter::required_lockup(&rail).unwrap(), dec!(15));
    }

    #[test]
    fn test_required_lockup_includes_escrowed_accrual() {
        let mut rail = rail(dec!(2), 10, dec!(5));
        rail.lockup_synced_to = 4;
        assert_eq!(LockupAccounter::required_lockup(&rail).unwrap(), dec!(33));
    }

    #[test]
    fn test_required_lockup_keeps_highest_unsettled_queued_rate() {
        let mut rail = rail(dec!(10), 10, dec!(0));
        rail.change_rate(dec!(2), 5).unwrap();
        assert_eq!(LockupAccounter::required_lockup(&rail).unwrap(), dec!(100));

        // Escrowing (0, 5] does not release the guarantee at rate 10.
        rail.lockup_synced_to = 5;
        assert_eq!(LockupAccounter::required_lockup(&rail).unwrap(), dec!(150));

        // Settling the queued span drains it; only the new rate remains.
        rail.settled_up_to = 5;
        rail.rate_changes.drain_settled(5);
        assert_eq!(LockupAccounter::required_lockup(&rail).unwrap(), dec!(20));
    }

    #[test]
    fn test_terminating_requirement_matches_active_at_termination() {
        let mut rail = rail(dec!(3), 10, dec!(5));
        rail.lockup_synced_to = 20;
        let active = LockupAccounter::required_lockup(&rail).unwrap();

        rail.state = RailState::Terminating;
        rail.end_epoch = Some(30);
        assert_eq!(LockupAccounter::required_lockup(&rail).unwrap(), active);
    }

    #[test]
    fn test_closed_requires_nothing() {
        let mut rail = rail(dec!(3), 10, dec!(5));
        rail.state = RailState::Closed;
        assert_eq!(LockupAccounter::required_lockup(&rail).unwrap(), dec!(0));
    }

    #[test]
    fn test_plan_sync_partial() {
        let rail = rail(dec!(10), 10, dec!(0));
        let plan = LockupAccounter::plan_sync(&rail, dec!(35), 8);
        assert_eq!(
            plan,
            SyncPlan {
                synced_to: 3,
                amount: dec!(30)
            }
        );
        assert!(!plan.is_complete(8));
        assert!(LockupAccounter::plan_sync(&rail, dec!(80), 8).is_complete(8));
    }

    #[test]
    fn test_adjustment_between() {
        assert_eq!(
            LockupAdjustment::between(dec!(10), dec!(15)),
            LockupAdjustment::Lock(dec!(5))
        );
        assert_eq!(
            LockupAdjustment::between(dec!(15), dec!(10)),
            LockupAdjustment::Release(dec!(5))
        );
        assert_eq!(
            LockupAdjustment::between(dec!(10), dec!(10)),
            LockupAdjustment::Balanced
        );
    }

    #[test]
    fn test_reconcile_pulls_shortfall() {
        let store = InMemoryAccountStore::new();
        let mut rail = rail(dec!(1), 10, dec!(5));
        store.deposit(&rail.token, &rail.payer, dec!(20)).unwrap();
        store.lock(&rail.token, &rail.payer, dec!(15)).unwrap();

        rail.lockup_period = 12;
        let adjustment = LockupAccounter::reconcile(&mut rail, &store, Vec::new()).unwrap();
        assert_eq!(adjustment, LockupAdjustment::Lock(dec!(2)));
        assert_eq!(rail.lockup_held, dec!(17));
        assert_eq!(store.locked_balance(&rail.token, &rail.payer), dec!(17));
    }

    #[test]
    fn test_reconcile_rejects_unfunded_shortfall() {
        let store = InMemoryAccountStore::new();
        let mut rail = rail(dec!(1), 10, dec!(5));
        store.deposit(&rail.token, &rail.payer, dec!(15)).unwrap();
        store.lock(&rail.token, &rail.payer, dec!(15)).unwrap();

        rail.lockup_fixed = dec!(50);
        let err = LockupAccounter::reconcile(&mut rail, &store, Vec::new()).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(rail.lockup_held, dec!(15));
    }

    #[test]
    fn test_reconcile_releases_after_payout() {
        let store = InMemoryAccountStore::new();
        let mut rail = rail(dec!(1), 10, dec!(5));
        store.deposit(&rail.token, &rail.payer, dec!(15)).unwrap();
        store.lock(&rail.token, &rail.payer, dec!(15)).unwrap();

        // Pay 4 of the held 15, then shrink the fixed lockup to 0.
        rail.lockup_held = dec!(11);
        rail.lockup_fixed = dec!(0);
        let payee = rail.payee.clone();
        let payout = vec![
            BalanceOp::TransferLocked {
                from: rail.payer.clone(),
                to: payee.clone(),
                amount: dec!(4),
            },
            BalanceOp::Unlock {
                owner: payee.clone(),
                amount: dec!(4),
            },
        ];
        let adjustment = LockupAccounter::reconcile(&mut rail, &store, payout).unwrap();
        assert_eq!(adjustment, LockupAdjustment::Release(dec!(1)));
        assert_eq!(store.locked_balance(&rail.token, &rail.payer), dec!(10));
        assert_eq!(store.available_balance(&rail.token, &rail.payer), dec!(1));
        assert_eq!(store.available_balance(&rail.token, &payee), dec!(4));
    }

    #[test]
    fn test_reconcile_reports_locked_shortfall_as_violation() {
        let store = InMemoryAccountStore::new();
        let mut rail = rail(dec!(1), 10, dec!(5));
        let payout = vec![BalanceOp::TransferLocked {
            from: rail.payer.clone(),
            to: rail.payee.clone(),
            amount: dec!(4),
        }];
        rail.lockup_held = dec!(11);
        rail.lockup_period = 6;
        let err = LockupAccounter::reconcile(&mut rail, &store, payout).unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation { .. }));
    }
}
