use crate::accounts::store::BalanceOp;
use crate::arbitration::arbiter::ArbitrationResponse;
use crate::core::amount::{commission, Amount, Epoch};
use crate::core::error::LedgerError;
use crate::rail::model::{Rail, RailId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result of a settlement call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub rail_id: RailId,
    /// Naive amount owed for the span that was settled.
    pub naive_amount: Amount,
    /// Amount taken from the payer's lockup after arbitration.
    pub settled_amount: Amount,
    /// Part of `settled_amount` received by the payee.
    pub net_amount_paid: Amount,
    /// Part of `settled_amount` received by the operator.
    pub commission_paid: Amount,
    /// Settled cursor after the call.
    pub final_epoch: Epoch,
    pub note: String,
}

impl SettlementOutcome {
    /// Zero-amount outcome that leaves the cursor at `epoch`.
    pub fn noop(rail_id: RailId, epoch: Epoch, note: impl Into<String>) -> Self {
        Self {
            rail_id,
            naive_amount: Decimal::ZERO,
            settled_amount: Decimal::ZERO,
            net_amount_paid: Decimal::ZERO,
            commission_paid: Decimal::ZERO,
            final_epoch: epoch,
            note: note.into(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.settled_amount.is_zero() && self.naive_amount.is_zero()
    }

    /// What the arbiter withheld from the naive amount.
    pub fn arbiter_reduction(&self) -> Amount {
        self.naive_amount - self.settled_amount
    }
}

impl std::fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Settlement of rail {} ===", self.rail_id)?;
        writeln!(f, "Settled to:     {}", self.final_epoch)?;
        writeln!(f, "Naive amount:   {}", self.naive_amount)?;
        writeln!(f, "Settled amount: {}", self.settled_amount)?;
        writeln!(f, "Paid to payee:  {}", self.net_amount_paid)?;
        writeln!(f, "Commission:     {}", self.commission_paid)?;
        writeln!(f, "Note:           {}", self.note)
    }
}

/// A payment out of the payer's lockup, split between payee and operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    pub net: Amount,
    pub commission: Amount,
}

impl Payout {
    pub fn split(amount: Amount, commission_rate_bps: u32) -> Self {
        let commission = commission(amount, commission_rate_bps);
        Self {
            net: amount - commission,
            commission,
        }
    }

    pub fn total(&self) -> Amount {
        self.net + self.commission
    }

    /// Balance operations moving this payout out of the payer's locked
    /// funds into the payee's and operator's available funds.
    pub fn to_ops(&self, rail: &Rail) -> Vec<BalanceOp> {
        let mut ops = Vec::with_capacity(4);
        for (recipient, amount) in [(&rail.payee, self.net), (&rail.operator, self.commission)] {
            if amount.is_zero() {
                continue;
            }
            ops.push(BalanceOp::TransferLocked {
                from: rail.payer.clone(),
                to: recipient.clone(),
                amount,
            });
            ops.push(BalanceOp::Unlock {
                owner: recipient.clone(),
                amount,
            });
        }
        ops
    }
}

/// Arbiter response after it has been forced into the settleable range.
#[derive(Debug, Clone, PartialEq)]
pub struct ClampedSettlement {
    pub settle_upto: Epoch,
    pub amount: Amount,
    /// Naive amount of `(settledUpTo, settle_upto]`.
    pub naive_amount: Amount,
    pub notes: Vec<String>,
}

/// Force an arbiter's answer into `(settledUpTo, requested]` and cap its
/// amount at the naive amount of the span it actually settles.
pub fn clamp_response(
    rail: &Rail,
    requested: Epoch,
    response: &ArbitrationResponse,
) -> Result<ClampedSettlement, LedgerError> {
    let mut notes = Vec::new();
    if !response.note.is_empty() {
        notes.push(response.note.clone());
    }

    let floor = rail.settled_up_to + 1;
    let settle_upto = if response.settle_upto > requested {
        notes.push(format!(
            "arbiter epoch {} clamped to requested {}",
            response.settle_upto, requested
        ));
        requested
    } else if response.settle_upto < floor {
        notes.push(format!(
            "arbiter epoch {} clamped to {}",
            response.settle_upto, floor
        ));
        floor
    } else {
        response.settle_upto
    };

    let naive_amount = rail
        .rate_changes
        .naive_amount(rail.settled_up_to, settle_upto, rail.payment_rate)
        .ok_or_else(|| {
            LedgerError::InvalidParameter(format!(
                "settlement of rail {} overflows the amount range",
                rail.id
            ))
        })?;

    let mut amount = response.modified_amount;
    if amount.is_sign_negative() && !amount.is_zero() {
        notes.push(format!("negative arbiter amount {amount} treated as 0"));
        amount = Decimal::ZERO;
    }
    if !amount.fract().is_zero() {
        let floored = amount.floor();
        notes.push(format!("arbiter amount {amount} floored to {floored}"));
        amount = floored;
    }
    if amount > naive_amount {
        notes.push(format!(
            "arbiter amount {amount} clamped to naive amount {naive_amount}"
        ));
        amount = naive_amount;
    }

    Ok(ClampedSettlement {
        settle_upto,
        amount,
        naive_amount,
        notes,
    })
}

pub fn join_notes(notes: &[String]) -> String {
    notes.join("; ")
}
