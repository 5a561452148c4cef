use crate::core::amount::Amount;
use crate::core::party::PartyId;
use crate::core::token::TokenId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by an [`AccountStore`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccountError {
    #[error("{owner} has {available} {token} available, {required} required")]
    InsufficientAvailable {
        token: TokenId,
        owner: PartyId,
        available: Amount,
        required: Amount,
    },
    #[error("{owner} has {locked} {token} locked, {required} required")]
    InsufficientLocked {
        token: TokenId,
        owner: PartyId,
        locked: Amount,
        required: Amount,
    },
    #[error("balance operations require a non-negative amount, got {0}")]
    InvalidAmount(Amount),
    #[error("{owner}'s {token} balance would overflow adding {amount}")]
    Overflow {
        token: TokenId,
        owner: PartyId,
        amount: Amount,
    },
}

/// Available and locked funds of one owner in one token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: Amount,
    pub locked: Amount,
}

impl Balance {
    /// Available plus locked, saturating at [`Decimal::MAX`].
    pub fn total(&self) -> Amount {
        self.available.saturating_add(self.locked)
    }
}

/// A single balance movement inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BalanceOp {
    /// Add to available funds.
    Credit { owner: PartyId, amount: Amount },
    /// Remove from available funds.
    Debit { owner: PartyId, amount: Amount },
    /// Move available funds into the locked balance.
    Lock { owner: PartyId, amount: Amount },
    /// Move locked funds back to the available balance.
    Unlock { owner: PartyId, amount: Amount },
    /// Move locked funds between two owners' locked balances.
    TransferLocked {
        from: PartyId,
        to: PartyId,
        amount: Amount,
    },
}

impl BalanceOp {
    /// Owners whose balances this operation touches.
    pub fn owners(&self) -> Vec<&PartyId> {
        match self {
            BalanceOp::Credit { owner, .. }
            | BalanceOp::Debit { owner, .. }
            | BalanceOp::Lock { owner, .. }
            | BalanceOp::Unlock { owner, .. } => vec![owner],
            BalanceOp::TransferLocked { from, to, .. } => vec![from, to],
        }
    }

    /// Owner this operation can add funds to, if any.
    pub fn receiver(&self) -> Option<&PartyId> {
        match self {
            BalanceOp::Credit { owner, .. } => Some(owner),
            BalanceOp::TransferLocked { to, .. } => Some(to),
            _ => None,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            BalanceOp::Credit { amount, .. }
            | BalanceOp::Debit { amount, .. }
            | BalanceOp::Lock { amount, .. }
            | BalanceOp::Unlock { amount, .. }
            | BalanceOp::TransferLocked { amount, .. } => *amount,
        }
    }
}

/// Per-token, per-owner balance bookkeeping.
///
/// The rail ledger never writes balances directly: every movement goes
/// through [`AccountStore::apply`], which validates the whole batch and
/// commits all of it or none of it. Implementations must serialize batches
/// per `(token, owner)` key rather than globally.
pub trait AccountStore: Send + Sync {
    /// Current balance of `owner` in `token` (zero if unknown).
    fn balance(&self, token: &TokenId, owner: &PartyId) -> Balance;

    /// Apply `batch` atomically, in order.
    fn apply(&self, token: &TokenId, batch: &[BalanceOp]) -> Result<(), AccountError>;

    fn available_balance(&self, token: &TokenId, owner: &PartyId) -> Amount {
        self.balance(token, owner).available
    }

    fn locked_balance(&self, token: &TokenId, owner: &PartyId) -> Amount {
        self.balance(token, owner).locked
    }

    fn deposit(&self, token: &TokenId, owner: &PartyId, amount: Amount) -> Result<(), AccountError> {
        self.apply(
            token,
            &[BalanceOp::Credit {
                owner: owner.clone(),
                amount,
            }],
        )
    }

    fn withdraw(&self, token: &TokenId, owner: &PartyId, amount: Amount) -> Result<(), AccountError> {
        self.apply(
            token,
            &[BalanceOp::Debit {
                owner: owner.clone(),
                amount,
            }],
        )
    }

    fn lock(&self, token: &TokenId, owner: &PartyId, amount: Amount) -> Result<(), AccountError> {
        self.apply(
            token,
            &[BalanceOp::Lock {
                owner: owner.clone(),
                amount,
            }],
        )
    }

    fn unlock(&self, token: &TokenId, owner: &PartyId, amount: Amount) -> Result<(), AccountError> {
        self.apply(
            token,
            &[BalanceOp::Unlock {
                owner: owner.clone(),
                amount,
            }],
        )
    }

    fn transfer_locked(
        &self,
        token: &TokenId,
        from: &PartyId,
        to: &PartyId,
        amount: Amount,
    ) -> Result<(), AccountError> {
        self.apply(
            token,
            &[BalanceOp::TransferLocked {
                from: from.clone(),
                to: to.clone(),
                amount,
            }],
        )
    }
}

/// Apply one operation to in-flight balances.
///
/// `lookup` maps an owner to its slot in `balances`; shared by store
/// implementations so they agree on validation.
pub fn apply_op(
    token: &TokenId,
    op: &BalanceOp,
    balances: &mut [Balance],
    lookup: impl Fn(&PartyId) -> usize,
) -> Result<(), AccountError> {
    let amount = op.amount();
    if amount < Decimal::ZERO {
        return Err(AccountError::InvalidAmount(amount));
    }
    let grow = |value: Amount, owner: &PartyId| {
        value.checked_add(amount).ok_or_else(|| AccountError::Overflow {
            token: token.clone(),
            owner: owner.clone(),
            amount,
        })
    };
    match op {
        BalanceOp::Credit { owner, .. } => {
            let slot = &mut balances[lookup(owner)];
            slot.available = grow(slot.available, owner)?;
        }
        BalanceOp::Debit { owner, .. } | BalanceOp::Lock { owner, .. } => {
            let slot = &mut balances[lookup(owner)];
            if slot.available < amount {
                return Err(AccountError::InsufficientAvailable {
                    token: token.clone(),
                    owner: owner.clone(),
                    available: slot.available,
                    required: amount,
                });
            }
            if matches!(op, BalanceOp::Lock { .. }) {
                slot.locked = grow(slot.locked, owner)?;
            }
            slot.available -= amount;
        }
        BalanceOp::Unlock { owner, .. } => {
            let slot = &mut balances[lookup(owner)];
            if slot.locked < amount {
                return Err(AccountError::InsufficientLocked {
                    token: token.clone(),
                    owner: owner.clone(),
                    locked: slot.locked,
                    required: amount,
                });
            }
            slot.available = grow(slot.available, owner)?;
            slot.locked -= amount;
        }
        BalanceOp::TransferLocked { from, to, .. } => {
            let source = lookup(from);
            if balances[source].locked < amount {
                return Err(AccountError::InsufficientLocked {
                    token: token.clone(),
                    owner: from.clone(),
                    locked: balances[source].locked,
                    required: amount,
                });
            }
            let target = lookup(to);
            if source != target {
                balances[target].locked = grow(balances[target].locked, to)?;
                balances[source].locked -= amount;
            }
        }
    }
    Ok(())
}
