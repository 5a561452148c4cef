use crate::accounts::store::AccountError;
use crate::core::amount::{Amount, Epoch};
use crate::core::party::PartyId;
use crate::core::token::TokenId;
use crate::rail::model::RailId;
use thiserror::Error;

/// Errors returned by every caller-facing ledger operation.
///
/// No operation partially applies its effects: when one of these is
/// returned, balances, approvals and the rail are as they were before the
/// call. The exception is [`LedgerError::InvariantViolation`], which also
/// freezes the affected rail until it is explicitly unfrozen.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("insufficient funds for {owner} in {token}: available {available}, required {required}")]
    InsufficientFunds {
        token: TokenId,
        owner: PartyId,
        available: Amount,
        required: Amount,
    },

    #[error("rail {0} not found")]
    RailNotFound(RailId),

    #[error("rail {rail_id} is terminated (end epoch {end_epoch})")]
    RailTerminated { rail_id: RailId, end_epoch: Epoch },

    #[error("rail {0} is closed")]
    RailClosed(RailId),

    #[error("rail {rail_id} is already terminated with end epoch {end_epoch}")]
    AlreadyTerminated { rail_id: RailId, end_epoch: Epoch },

    #[error("invalid epoch {requested} for rail {rail_id} (settled up to {settled_up_to})")]
    InvalidEpoch {
        rail_id: RailId,
        requested: Epoch,
        settled_up_to: Epoch,
    },

    #[error("arbiter {arbiter} unavailable: {reason}")]
    ArbiterUnavailable { arbiter: String, reason: String },

    #[error("invariant violation on rail {rail_id}: {reason}")]
    InvariantViolation { rail_id: RailId, reason: String },

    #[error("{caller} is not permitted to {action}")]
    Unauthorized { caller: PartyId, action: String },

    #[error("operator allowance exceeded: {0}")]
    AllowanceExceeded(String),
}

impl From<AccountError> for LedgerError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InsufficientAvailable {
                token,
                owner,
                available,
                required,
            } => LedgerError::InsufficientFunds {
                token,
                owner,
                available,
                required,
            },
            AccountError::InsufficientLocked {
                token,
                owner,
                locked,
                required,
            } => LedgerError::InsufficientFunds {
                token,
                owner,
                available: locked,
                required,
            },
            AccountError::InvalidAmount(amount) => {
                LedgerError::InvalidParameter(format!("invalid balance amount {amount}"))
            }
            err @ AccountError::Overflow { .. } => LedgerError::InvalidParameter(err.to_string()),
        }
    }
}
