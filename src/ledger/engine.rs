//! The rail ledger.
//!
//! Every mutating operation follows the same shape: lock the rail, check
//! the caller and the rail's state, build a modified copy of the rail, then
//! hand the copy to [`RailLedger::commit`]. The commit computes the lockup
//! the copy requires, turns the difference into a single balance batch
//! together with any payouts, and applies that batch under the operator's
//! approval entry. Only when the batch succeeds does the copy replace the
//! stored rail, so a failed operation leaves balances, approvals and the rail
//! exactly as they were.
//!
//! Lock order is rail, then approval entry, then accounts (in owner order).
//! No operation holds two rail locks at once.

use crate::accounts::approval::{ApprovalBook, Commitment, OperatorApproval};
use crate::accounts::memory::InMemoryAccountStore;
use crate::accounts::store::{AccountStore, BalanceOp};
use crate::arbitration::arbiter::{Arbiter, ArbitrationRequest};
use crate::arbitration::gateway::ArbiterGateway;
use crate::core::amount::{validate_amount, Amount, Epoch};
use crate::core::config::EngineConfig;
use crate::core::error::LedgerError;
use crate::core::party::PartyId;
use crate::core::token::TokenId;
use crate::ledger::journal::{Journal, RailEvent, RailEventKind};
use crate::ledger::settlement::{clamp_response, join_notes, Payout, SettlementOutcome};
use crate::rail::lockup::{LockupAccounter, LockupAdjustment};
use crate::rail::model::{Rail, RailId, RailState, RailTerms};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn unauthorized(caller: &PartyId, action: &str) -> LedgerError {
    LedgerError::Unauthorized {
        caller: caller.clone(),
        action: action.to_string(),
    }
}

fn overflow(rail_id: RailId) -> LedgerError {
    LedgerError::InvalidParameter(format!("rail {rail_id} overflows the amount range"))
}

/// Continuous payment rails over an [`AccountStore`].
pub struct RailLedger {
    config: EngineConfig,
    accounts: Arc<dyn AccountStore>,
    approvals: ApprovalBook,
    arbiters: ArbiterGateway,
    rails: DashMap<RailId, Arc<Mutex<Rail>>>,
    next_rail_id: AtomicU64,
    journal: Journal,
}

impl RailLedger {
    pub fn new(config: EngineConfig, accounts: Arc<dyn AccountStore>) -> Self {
        let arbiters = ArbiterGateway::new(config.arbiter_timeout(), config.arbiter_retries);
        let journal = Journal::new(config.journal_capacity);
        Self {
            config,
            accounts,
            approvals: ApprovalBook::new(),
            arbiters,
            rails: DashMap::new(),
            next_rail_id: AtomicU64::new(1),
            journal,
        }
    }

    /// Ledger backed by a fresh [`InMemoryAccountStore`].
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(InMemoryAccountStore::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    // --- Funding ---

    pub fn deposit(&self, token: &TokenId, owner: &PartyId, amount: Amount) -> Result<(), LedgerError> {
        validate_amount("deposit", amount)?;
        self.accounts.deposit(token, owner, amount)?;
        debug!("deposited {} {} for {}", amount, token, owner);
        Ok(())
    }

    /// Withdraw available funds. Locked funds stay with their rails.
    pub fn withdraw(&self, token: &TokenId, owner: &PartyId, amount: Amount) -> Result<(), LedgerError> {
        validate_amount("withdrawal", amount)?;
        self.accounts.withdraw(token, owner, amount)?;
        debug!("withdrew {} {} for {}", amount, token, owner);
        Ok(())
    }

    // --- Operator approvals ---

    pub fn approve_operator(
        &self,
        token: &TokenId,
        payer: &PartyId,
        operator: &PartyId,
        rate_allowance: Amount,
        lockup_allowance: Amount,
        max_lockup_period: Epoch,
    ) -> Result<(), LedgerError> {
        validate_amount("rate allowance", rate_allowance)?;
        validate_amount("lockup allowance", lockup_allowance)?;
        self.approvals.approve(
            token,
            payer,
            operator,
            rate_allowance,
            lockup_allowance,
            max_lockup_period,
        );
        info!(
            "{} approved operator {} in {} (rate {}, lockup {}, period {})",
            payer, operator, token, rate_allowance, lockup_allowance, max_lockup_period
        );
        Ok(())
    }

    /// Stop `operator` from opening or growing rails for `payer`. Existing
    /// rails keep running and may still shrink.
    pub fn revoke_operator(&self, token: &TokenId, payer: &PartyId, operator: &PartyId) -> bool {
        let revoked = self.approvals.revoke(token, payer, operator);
        if revoked {
            info!("{} revoked operator {} in {}", payer, operator, token);
        }
        revoked
    }

    pub fn operator_approval(
        &self,
        token: &TokenId,
        payer: &PartyId,
        operator: &PartyId,
    ) -> Option<OperatorApproval> {
        self.approvals.get(token, payer, operator)
    }

    // --- Arbiters ---

    /// Register an arbiter and start the worker thread that serves it.
    pub fn register_arbiter(&self, arbiter: Arc<dyn Arbiter>) -> Result<(), LedgerError> {
        self.arbiters.register(arbiter)
    }

    /// Rails still naming this arbiter fail settlement with
    /// [`LedgerError::ArbiterUnavailable`] until it is registered again.
    pub fn unregister_arbiter(&self, arbiter_id: &str) -> bool {
        self.arbiters.unregister(arbiter_id)
    }

    // --- Rail lifecycle ---

    /// Open a rail and lock its base lockup from the payer's available funds.
    pub fn create_rail(&self, terms: RailTerms, now: Epoch) -> Result<RailId, LedgerError> {
        terms.validate()?;
        self.check_lockup_period(terms.lockup_period)?;
        if let Some(arbiter) = terms.arbiter.as_deref() {
            if !self.arbiters.is_registered(arbiter) {
                return Err(LedgerError::InvalidParameter(format!(
                    "arbiter {arbiter} is not registered"
                )));
            }
        }

        let base_lockup = terms.base_lockup().ok_or_else(|| {
            LedgerError::InvalidParameter("lockup overflows the amount range".to_string())
        })?;
        let commitment = Commitment {
            rate: terms.payment_rate,
            lockup: base_lockup,
        };
        let lock = BalanceOp::Lock {
            owner: terms.payer.clone(),
            amount: base_lockup,
        };

        let rail_id = self.approvals.transition(
            &terms.token,
            &terms.payer,
            &terms.operator,
            Commitment::NONE,
            commitment,
            Some(terms.lockup_period),
            true,
            || {
                self.accounts.apply(&terms.token, std::slice::from_ref(&lock))?;
                Ok(RailId::new(self.next_rail_id.fetch_add(1, Ordering::SeqCst)))
            },
        )?;

        let rail = Rail::open(rail_id, terms, now, base_lockup);
        info!(
            "rail {} opened: {} -> {} at {} {}/epoch, lockup {}",
            rail_id, rail.payer, rail.payee, rail.payment_rate, rail.token, base_lockup
        );
        self.journal.record(
            rail_id,
            now,
            RailEventKind::Created {
                payer: rail.payer.clone(),
                payee: rail.payee.clone(),
                payment_rate: rail.payment_rate,
                lockup_held: base_lockup,
            },
        );
        self.rails.insert(rail_id, Arc::new(Mutex::new(rail)));
        Ok(rail_id)
    }

    /// Change the rate from `now` on and optionally pay `one_time_payment`
    /// out of the fixed lockup. Operator only.
    pub fn modify_rail_payment(
        &self,
        rail_id: RailId,
        caller: &PartyId,
        new_rate: Amount,
        one_time_payment: Amount,
        now: Epoch,
    ) -> Result<(), LedgerError> {
        validate_amount("payment rate", new_rate)?;
        validate_amount("one-time payment", one_time_payment)?;

        let cell = self.rail_cell(rail_id)?;
        let mut rail = cell.lock();
        Self::ensure_not_frozen(&rail)?;
        if caller != &rail.operator {
            return Err(unauthorized(caller, "modify rail payments"));
        }
        match rail.state {
            RailState::Closed => return Err(LedgerError::RailClosed(rail_id)),
            RailState::Terminating => {
                let end_epoch = rail.end_epoch.unwrap_or(rail.settled_up_to);
                if now > end_epoch || new_rate > rail.payment_rate {
                    return Err(LedgerError::RailTerminated { rail_id, end_epoch });
                }
            }
            RailState::Active => {}
        }
        Self::ensure_current(&rail, now)?;

        let mut candidate = rail.clone();
        if candidate.state == RailState::Active {
            self.sync_fully(&mut candidate, now)?;
        }
        if one_time_payment > candidate.lockup_fixed {
            return Err(LedgerError::InvalidParameter(format!(
                "one-time payment {one_time_payment} exceeds fixed lockup {}",
                candidate.lockup_fixed
            )));
        }
        candidate.lockup_fixed -= one_time_payment;
        candidate.lockup_held -= one_time_payment;

        let old_rate = candidate.payment_rate;
        candidate
            .change_rate(new_rate, now)
            .map_err(|err| LedgerError::InvalidParameter(err.to_string()))?;

        let payout = Payout::split(one_time_payment, candidate.commission_rate_bps);
        let payout_ops = payout.to_ops(&candidate);
        self.commit(&mut rail, candidate, payout_ops, None, now)?;

        info!(
            "rail {} rate {} -> {} at epoch {} (one-time payment {})",
            rail_id, old_rate, new_rate, now, one_time_payment
        );
        self.journal.record(
            rail_id,
            now,
            RailEventKind::PaymentModified {
                old_rate,
                new_rate,
                one_time_payment,
            },
        );
        Ok(())
    }

    /// Replace the lockup terms of an active rail. Operator only.
    pub fn modify_rail_lockup(
        &self,
        rail_id: RailId,
        caller: &PartyId,
        lockup_period: Epoch,
        lockup_fixed: Amount,
        now: Epoch,
    ) -> Result<(), LedgerError> {
        validate_amount("fixed lockup", lockup_fixed)?;
        self.check_lockup_period(lockup_period)?;

        let cell = self.rail_cell(rail_id)?;
        let mut rail = cell.lock();
        Self::ensure_not_frozen(&rail)?;
        if caller != &rail.operator {
            return Err(unauthorized(caller, "modify rail lockup"));
        }
        match rail.state {
            RailState::Closed => return Err(LedgerError::RailClosed(rail_id)),
            RailState::Terminating => {
                return Err(LedgerError::RailTerminated {
                    rail_id,
                    end_epoch: rail.end_epoch.unwrap_or(rail.settled_up_to),
                })
            }
            RailState::Active => {}
        }
        Self::ensure_current(&rail, now)?;

        let mut candidate = rail.clone();
        self.sync_fully(&mut candidate, now)?;
        candidate.lockup_period = lockup_period;
        candidate.lockup_fixed = lockup_fixed;
        if candidate.commitment().lockup == Decimal::MAX {
            return Err(overflow(rail_id));
        }
        self.commit(&mut rail, candidate, Vec::new(), Some(lockup_period), now)?;

        info!(
            "rail {} lockup now {} epochs + {} fixed",
            rail_id, lockup_period, lockup_fixed
        );
        self.journal.record(
            rail_id,
            now,
            RailEventKind::LockupModified {
                lockup_period,
                lockup_fixed,
            },
        );
        Ok(())
    }

    /// Stop accrual one lockup period after the payer's funded epoch.
    /// Payer or operator. Returns the end epoch.
    pub fn terminate_rail(&self, rail_id: RailId, caller: &PartyId, now: Epoch) -> Result<Epoch, LedgerError> {
        let cell = self.rail_cell(rail_id)?;
        let mut rail = cell.lock();
        Self::ensure_not_frozen(&rail)?;
        if caller != &rail.payer && caller != &rail.operator {
            return Err(unauthorized(caller, "terminate rail"));
        }
        match rail.state {
            RailState::Closed => return Err(LedgerError::RailClosed(rail_id)),
            RailState::Terminating => {
                let end_epoch = rail.end_epoch.unwrap_or(rail.settled_up_to);
                let requested_end = now
                    .max(rail.lockup_synced_to)
                    .saturating_add(rail.lockup_period);
                if requested_end < end_epoch {
                    return Err(LedgerError::AlreadyTerminated { rail_id, end_epoch });
                }
                debug!("rail {} already terminating at {}", rail_id, end_epoch);
                return Ok(end_epoch);
            }
            RailState::Active => {}
        }
        Self::ensure_current(&rail, now)?;

        let mut candidate = rail.clone();
        let available = self.accounts.available_balance(&candidate.token, &candidate.payer);
        let plan = LockupAccounter::plan_sync(&candidate, available, now);
        if !plan.is_complete(now) {
            warn!(
                "rail {} terminated with payer funded only through epoch {}",
                rail_id, plan.synced_to
            );
        }
        candidate.lockup_synced_to = plan.synced_to;
        let end_epoch = plan
            .synced_to
            .checked_add(candidate.lockup_period)
            .ok_or_else(|| overflow(rail_id))?;
        candidate.end_epoch = Some(end_epoch);
        candidate.state = RailState::Terminating;
        let closes = candidate.settled_up_to == end_epoch;
        if closes {
            candidate.state = RailState::Closed;
        }
        self.commit(&mut rail, candidate, Vec::new(), None, now)?;

        info!("rail {} terminating, end epoch {}", rail_id, end_epoch);
        self.journal
            .record(rail_id, now, RailEventKind::Terminated { end_epoch });
        if closes {
            info!("rail {} closed", rail_id);
            self.journal.record(rail_id, now, RailEventKind::Closed);
        }
        Ok(end_epoch)
    }

    /// Pay the payee for `(settledUpTo, settle_upto]`, clamped to what has
    /// elapsed, what the payer has funded and the rail's end epoch.
    pub fn settle_rail(
        &self,
        rail_id: RailId,
        caller: &PartyId,
        settle_upto: Epoch,
        now: Epoch,
    ) -> Result<SettlementOutcome, LedgerError> {
        let cell = self.rail_cell(rail_id)?;
        let mut rail = cell.lock();
        Self::ensure_not_frozen(&rail)?;
        if !rail.involves(caller) {
            return Err(unauthorized(caller, "settle rail"));
        }
        if rail.state == RailState::Closed {
            return Err(LedgerError::RailClosed(rail_id));
        }
        if settle_upto == rail.settled_up_to {
            return Ok(SettlementOutcome::noop(
                rail_id,
                settle_upto,
                "already settled",
            ));
        }
        if settle_upto < rail.settled_up_to {
            return Err(LedgerError::InvalidEpoch {
                rail_id,
                requested: settle_upto,
                settled_up_to: rail.settled_up_to,
            });
        }

        let mut candidate = rail.clone();
        let mut target = settle_upto.min(now);
        let mut funding_limited = false;
        match candidate.state {
            RailState::Active => {
                let available = self.accounts.available_balance(&candidate.token, &candidate.payer);
                let plan = LockupAccounter::plan_sync(&candidate, available, now);
                candidate.lockup_synced_to = plan.synced_to;
                if plan.synced_to < target {
                    target = plan.synced_to;
                    funding_limited = true;
                }
            }
            RailState::Terminating => {
                if let Some(end_epoch) = candidate.end_epoch {
                    target = target.min(end_epoch);
                }
            }
            RailState::Closed => {}
        }

        if target <= candidate.settled_up_to {
            if funding_limited {
                let available = self.accounts.available_balance(&candidate.token, &candidate.payer);
                let required = candidate
                    .rate_changes
                    .naive_amount(
                        candidate.lockup_synced_to,
                        settle_upto.min(now),
                        candidate.payment_rate,
                    )
                    .ok_or_else(|| overflow(rail_id))?;
                return Err(LedgerError::InsufficientFunds {
                    token: candidate.token.clone(),
                    owner: candidate.payer.clone(),
                    available,
                    required,
                });
            }
            return Err(LedgerError::InvalidEpoch {
                rail_id,
                requested: settle_upto,
                settled_up_to: candidate.settled_up_to,
            });
        }

        let naive_amount = candidate
            .rate_changes
            .naive_amount(candidate.settled_up_to, target, candidate.payment_rate)
            .ok_or_else(|| overflow(rail_id))?;
        let binding = self.arbiters.resolve(candidate.arbiter.as_deref())?;
        let request = ArbitrationRequest {
            token: candidate.token.clone(),
            payer: candidate.payer.clone(),
            payee: candidate.payee.clone(),
            rail_id,
            from_epoch: candidate.settled_up_to,
            to_epoch: target,
            amount: naive_amount,
        };
        let response = self.arbiters.arbitrate(&binding, &request)?;
        let clamped = clamp_response(&candidate, target, &response)?;

        let mut notes = clamped.notes;
        if funding_limited {
            notes.push(format!("payer funded through epoch {target}"));
        }
        self.apply_settlement(
            &mut rail,
            candidate,
            clamped.settle_upto,
            clamped.naive_amount,
            clamped.amount,
            join_notes(&notes),
            now,
        )
    }

    /// Settle a terminated rail through its end epoch at the full naive
    /// amount without consulting the arbiter. Payer only, and only once the
    /// end epoch has passed.
    pub fn settle_terminated_rail_without_arbitration(
        &self,
        rail_id: RailId,
        caller: &PartyId,
        now: Epoch,
    ) -> Result<SettlementOutcome, LedgerError> {
        let cell = self.rail_cell(rail_id)?;
        let mut rail = cell.lock();
        Self::ensure_not_frozen(&rail)?;
        if caller != &rail.payer {
            return Err(unauthorized(caller, "settle without arbitration"));
        }
        let end_epoch = match (rail.state, rail.end_epoch) {
            (RailState::Closed, _) => return Err(LedgerError::RailClosed(rail_id)),
            (RailState::Terminating, Some(end_epoch)) => end_epoch,
            _ => {
                return Err(LedgerError::InvalidParameter(format!(
                    "rail {rail_id} is not terminated"
                )))
            }
        };
        if now <= end_epoch {
            return Err(LedgerError::InvalidEpoch {
                rail_id,
                requested: now,
                settled_up_to: rail.settled_up_to,
            });
        }

        let candidate = rail.clone();
        let naive_amount = candidate
            .rate_changes
            .naive_amount(candidate.settled_up_to, end_epoch, candidate.payment_rate)
            .ok_or_else(|| overflow(rail_id))?;
        warn!(
            "rail {} settled to {} without arbitration by payer {}",
            rail_id, end_epoch, caller
        );
        self.apply_settlement(
            &mut rail,
            candidate,
            end_epoch,
            naive_amount,
            naive_amount,
            "settled without arbitration".to_string(),
            now,
        )
    }

    /// Clear the frozen marker once balances have been reconciled by hand.
    pub fn unfreeze_rail(&self, rail_id: RailId) -> Result<(), LedgerError> {
        let cell = self.rail_cell(rail_id)?;
        let mut rail = cell.lock();
        match rail.frozen.take() {
            Some(reason) => {
                info!("rail {} unfrozen (was: {})", rail_id, reason);
                self.journal
                    .record(rail_id, rail.settled_up_to, RailEventKind::Unfrozen);
            }
            None => debug!("rail {} is not frozen", rail_id),
        }
        Ok(())
    }

    // --- Queries ---

    /// Snapshot of a rail.
    pub fn get_rail(&self, rail_id: RailId) -> Result<Rail, LedgerError> {
        let cell = self.rail_cell(rail_id)?;
        let rail = cell.lock().clone();
        Ok(rail)
    }

    pub fn rails_for_payer(&self, token: &TokenId, payer: &PartyId) -> Vec<RailId> {
        self.rails_matching(|rail| &rail.token == token && &rail.payer == payer)
    }

    pub fn rails_for_payee(&self, token: &TokenId, payee: &PartyId) -> Vec<RailId> {
        self.rails_matching(|rail| &rail.token == token && &rail.payee == payee)
    }

    pub fn rail_count(&self) -> usize {
        self.rails.len()
    }

    /// Journaled events of a rail, oldest first.
    pub fn events(&self, rail_id: RailId) -> Vec<RailEvent> {
        self.journal.events(rail_id)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    // --- Internals ---

    fn rail_cell(&self, rail_id: RailId) -> Result<Arc<Mutex<Rail>>, LedgerError> {
        self.rails
            .get(&rail_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::RailNotFound(rail_id))
    }

    fn rails_matching(&self, predicate: impl Fn(&Rail) -> bool) -> Vec<RailId> {
        let cells: Vec<Arc<Mutex<Rail>>> = self
            .rails
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut ids: Vec<RailId> = cells
            .iter()
            .filter_map(|cell| {
                let rail = cell.lock();
                predicate(&*rail).then_some(rail.id)
            })
            .collect();
        ids.sort();
        ids
    }

    fn check_lockup_period(&self, lockup_period: Epoch) -> Result<(), LedgerError> {
        if lockup_period > self.config.max_lockup_period {
            return Err(LedgerError::InvalidParameter(format!(
                "lockup period {lockup_period} exceeds maximum {}",
                self.config.max_lockup_period
            )));
        }
        Ok(())
    }

    fn ensure_not_frozen(rail: &Rail) -> Result<(), LedgerError> {
        match &rail.frozen {
            Some(reason) => Err(LedgerError::InvariantViolation {
                rail_id: rail.id,
                reason: format!("rail is frozen: {reason}"),
            }),
            None => Ok(()),
        }
    }

    /// Reject an epoch behind what the rail has already accounted for.
    fn ensure_current(rail: &Rail, now: Epoch) -> Result<(), LedgerError> {
        if now < rail.settled_up_to || (rail.state == RailState::Active && now < rail.lockup_synced_to) {
            return Err(LedgerError::InvalidEpoch {
                rail_id: rail.id,
                requested: now,
                settled_up_to: rail.settled_up_to,
            });
        }
        Ok(())
    }

    /// Escrow every elapsed epoch through `now`, or fail if the payer
    /// cannot fund them.
    fn sync_fully(&self, candidate: &mut Rail, now: Epoch) -> Result<(), LedgerError> {
        let available = self.accounts.available_balance(&candidate.token, &candidate.payer);
        let plan = LockupAccounter::plan_sync(candidate, available, now);
        if !plan.is_complete(now) {
            let required = candidate
                .rate_changes
                .naive_amount(candidate.lockup_synced_to, now, candidate.payment_rate)
                .ok_or_else(|| overflow(candidate.id))?;
            return Err(LedgerError::InsufficientFunds {
                token: candidate.token.clone(),
                owner: candidate.payer.clone(),
                available,
                required,
            });
        }
        candidate.lockup_synced_to = plan.synced_to;
        Ok(())
    }

    /// Pay `amount` for `(settledUpTo, settle_upto]` out of the rail's
    /// lockup and advance the cursor, closing a terminated rail that
    /// reaches its end epoch.
    #[allow(clippy::too_many_arguments)]
    fn apply_settlement(
        &self,
        rail: &mut Rail,
        mut candidate: Rail,
        settle_upto: Epoch,
        naive_amount: Amount,
        amount: Amount,
        note: String,
        now: Epoch,
    ) -> Result<SettlementOutcome, LedgerError> {
        let rail_id = candidate.id;
        let payout = Payout::split(amount, candidate.commission_rate_bps);
        let payout_ops = payout.to_ops(&candidate);
        candidate.lockup_held -= amount;
        candidate.settled_up_to = settle_upto;
        candidate.rate_changes.drain_settled(settle_upto);
        let closes = candidate.state == RailState::Terminating && candidate.end_epoch == Some(settle_upto);
        if closes {
            candidate.state = RailState::Closed;
        }
        self.commit(rail, candidate, payout_ops, None, now)?;

        let outcome = SettlementOutcome {
            rail_id,
            naive_amount,
            settled_amount: amount,
            net_amount_paid: payout.net,
            commission_paid: payout.commission,
            final_epoch: settle_upto,
            note,
        };
        debug!(
            "rail {} settled to {}: paid {} net, {} commission ({})",
            rail_id, settle_upto, payout.net, payout.commission, outcome.note
        );
        self.journal.record(
            rail_id,
            now,
            RailEventKind::Settled {
                settled_up_to: settle_upto,
                net_amount_paid: payout.net,
                commission_paid: payout.commission,
                note: outcome.note.clone(),
            },
        );
        if closes {
            info!("rail {} closed at epoch {}", rail_id, settle_upto);
            self.journal.record(rail_id, now, RailEventKind::Closed);
        }
        Ok(outcome)
    }

    /// Commit `candidate` in place of `current`.
    ///
    /// The lockup reconcile and `payouts` go to the store as one batch under
    /// the operator's approval entry, so usage moves with it. A shortfall in
    /// the payer's locked funds means the store disagrees with the rail; the
    /// rail is frozen.
    fn commit(
        &self,
        current: &mut Rail,
        candidate: Rail,
        payouts: Vec<BalanceOp>,
        lockup_period: Option<Epoch>,
        now: Epoch,
    ) -> Result<LockupAdjustment, LedgerError> {
        if candidate.lockup_held.is_sign_negative() && !candidate.lockup_held.is_zero() {
            let reason = format!(
                "payout exceeds held lockup by {}",
                -candidate.lockup_held
            );
            return Err(self.freeze(current, reason, now));
        }

        let from = current.commitment();
        let to = candidate.commitment();
        let (token, payer, operator) = (
            candidate.token.clone(),
            candidate.payer.clone(),
            candidate.operator.clone(),
        );
        let mut committed = candidate;
        let rail_id = committed.id;
        let result = self.approvals.transition(
            &token,
            &payer,
            &operator,
            from,
            to,
            lockup_period,
            false,
            || LockupAccounter::reconcile(&mut committed, self.accounts.as_ref(), payouts),
        );

        match result {
            Ok(adjustment) => {
                debug!("rail {} committed {:?}", rail_id, adjustment);
                *current = committed;
                Ok(adjustment)
            }
            Err(LedgerError::InvariantViolation { reason, .. }) => {
                Err(self.freeze(current, reason, now))
            }
            Err(err) => Err(err),
        }
    }

    fn freeze(&self, rail: &mut Rail, reason: String, now: Epoch) -> LedgerError {
        error!("freezing rail {}: {}", rail.id, reason);
        rail.frozen = Some(reason.clone());
        self.journal.record(
            rail.id,
            now,
            RailEventKind::Frozen {
                reason: reason.clone(),
            },
        );
        LedgerError::InvariantViolation {
            rail_id: rail.id,
            reason,
        }
    }
}
