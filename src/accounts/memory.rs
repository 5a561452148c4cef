use crate::accounts::store::{apply_op, AccountError, AccountStore, Balance, BalanceOp};
use crate::core::amount::Amount;
use crate::core::party::PartyId;
use crate::core::token::TokenId;
use dashmap::DashMap;
use log::trace;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

type AccountKey = (TokenId, PartyId);

/// In-memory [`AccountStore`] with per-account locking.
///
/// Each `(token, owner)` entry sits behind its own mutex. A batch locks
/// every account it touches in `PartyId` order, validates the whole batch
/// against copies, and only then writes back, so concurrent batches on
/// disjoint owners never contend and overlapping batches cannot deadlock.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    balances: DashMap<AccountKey, Arc<Mutex<Balance>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_cell(&self, token: &TokenId, owner: &PartyId) -> Option<Arc<Mutex<Balance>>> {
        self.balances
            .get(&(token.clone(), owner.clone()))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn cell(&self, token: &TokenId, owner: &PartyId) -> Arc<Mutex<Balance>> {
        Arc::clone(
            self.balances
                .entry((token.clone(), owner.clone()))
                .or_default()
                .value(),
        )
    }

    /// Every balance held in `token`, keyed by owner.
    pub fn balances_for_token(&self, token: &TokenId) -> HashMap<PartyId, Balance> {
        let cells: Vec<(PartyId, Arc<Mutex<Balance>>)> = self
            .balances
            .iter()
            .filter(|entry| &entry.key().0 == token)
            .map(|entry| (entry.key().1.clone(), Arc::clone(entry.value())))
            .collect();
        cells
            .into_iter()
            .map(|(owner, cell)| {
                let balance = *cell.lock();
                (owner, balance)
            })
            .collect()
    }

    /// Sum of available and locked funds across all owners of `token`.
    pub fn total_supply(&self, token: &TokenId) -> Amount {
        self.balances_for_token(token)
            .values()
            .map(Balance::total)
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }
}

impl AccountStore for InMemoryAccountStore {
    fn balance(&self, token: &TokenId, owner: &PartyId) -> Balance {
        match self.existing_cell(token, owner) {
            Some(cell) => {
                let balance = *cell.lock();
                balance
            }
            None => Balance::default(),
        }
    }

    fn apply(&self, token: &TokenId, batch: &[BalanceOp]) -> Result<(), AccountError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut owners: Vec<PartyId> = batch
            .iter()
            .flat_map(|op| op.owners())
            .cloned()
            .collect();
        owners.sort();
        owners.dedup();

        // Owners that only pay out stay unregistered until they hold funds;
        // a missing entry reads as zero and any positive debit fails.
        let receivers: Vec<&PartyId> = batch.iter().filter_map(BalanceOp::receiver).collect();
        let cells: Vec<Arc<Mutex<Balance>>> = owners
            .iter()
            .map(|owner| {
                if receivers.contains(&owner) {
                    self.cell(token, owner)
                } else {
                    self.existing_cell(token, owner).unwrap_or_default()
                }
            })
            .collect();
        let mut guards: Vec<_> = cells.iter().map(|cell| cell.lock()).collect();
        let mut staged: Vec<Balance> = guards.iter().map(|guard| **guard).collect();

        let lookup = |owner: &PartyId| {
            owners
                .binary_search(owner)
                .unwrap_or_else(|_| unreachable!("batch owner collected above"))
        };
        for op in batch {
            apply_op(token, op, &mut staged, lookup)?;
        }

        for (guard, balance) in guards.iter_mut().zip(staged) {
            **guard = balance;
        }
        trace!("applied {} balance ops in {}", batch.len(), token);
        Ok(())
    }
}
