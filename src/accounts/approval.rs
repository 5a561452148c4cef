use crate::core::amount::{Amount, Epoch};
use crate::core::error::LedgerError;
use crate::core::party::PartyId;
use crate::core::token::TokenId;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What one rail commits its operator to: the payment rate and the
/// `lockupFixed + rate × lockupPeriod` reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Commitment {
    pub rate: Amount,
    pub lockup: Amount,
}

impl Commitment {
    pub const NONE: Commitment = Commitment {
        rate: Decimal::ZERO,
        lockup: Decimal::ZERO,
    };

    fn increases_over(&self, previous: &Commitment) -> bool {
        self.rate > previous.rate || self.lockup > previous.lockup
    }
}

/// A payer's standing permission for one operator in one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorApproval {
    pub approved: bool,
    pub rate_allowance: Amount,
    pub lockup_allowance: Amount,
    pub max_lockup_period: Epoch,
    /// Sum of current rates over the operator's open rails for this payer.
    pub rate_usage: Amount,
    /// Sum of base lockups over the operator's open rails for this payer.
    pub lockup_usage: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ApprovalKey {
    token: TokenId,
    payer: PartyId,
    operator: PartyId,
}

/// Operator approvals keyed by `(token, payer, operator)`.
///
/// Increases of rate or lockup are checked against the allowance and
/// recorded only once the accompanying balance commit succeeds; decreases
/// are always accepted, even after revocation.
#[derive(Debug, Default)]
pub struct ApprovalBook {
    approvals: DashMap<ApprovalKey, OperatorApproval>,
}

impl ApprovalBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant or update an approval. Existing usage is preserved.
    pub fn approve(
        &self,
        token: &TokenId,
        payer: &PartyId,
        operator: &PartyId,
        rate_allowance: Amount,
        lockup_allowance: Amount,
        max_lockup_period: Epoch,
    ) {
        let key = ApprovalKey {
            token: token.clone(),
            payer: payer.clone(),
            operator: operator.clone(),
        };
        self.approvals
            .entry(key)
            .and_modify(|approval| {
                approval.approved = true;
                approval.rate_allowance = rate_allowance;
                approval.lockup_allowance = lockup_allowance;
                approval.max_lockup_period = max_lockup_period;
            })
            .or_insert(OperatorApproval {
                approved: true,
                rate_allowance,
                lockup_allowance,
                max_lockup_period,
                rate_usage: Decimal::ZERO,
                lockup_usage: Decimal::ZERO,
            });
    }

    /// Revoke an approval. Returns `false` if none existed.
    pub fn revoke(&self, token: &TokenId, payer: &PartyId, operator: &PartyId) -> bool {
        let key = ApprovalKey {
            token: token.clone(),
            payer: payer.clone(),
            operator: operator.clone(),
        };
        match self.approvals.get_mut(&key) {
            Some(mut approval) => {
                approval.approved = false;
                true
            }
            None => false,
        }
    }

    pub fn get(
        &self,
        token: &TokenId,
        payer: &PartyId,
        operator: &PartyId,
    ) -> Option<OperatorApproval> {
        let key = ApprovalKey {
            token: token.clone(),
            payer: payer.clone(),
            operator: operator.clone(),
        };
        self.approvals.get(&key).map(|approval| approval.value().clone())
    }

    /// Move an operator's usage from `from` to `to`, running `commit` while
    /// the approval entry is held.
    ///
    /// `lockup_period`, when given, is checked against the approval's
    /// maximum. With `opening` set the approval must exist and be active
    /// even if nothing increases.
    #[allow(clippy::too_many_arguments)]
    pub fn transition<T>(
        &self,
        token: &TokenId,
        payer: &PartyId,
        operator: &PartyId,
        from: Commitment,
        to: Commitment,
        lockup_period: Option<Epoch>,
        opening: bool,
        commit: impl FnOnce() -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let key = ApprovalKey {
            token: token.clone(),
            payer: payer.clone(),
            operator: operator.clone(),
        };
        let unauthorized = || LedgerError::Unauthorized {
            caller: operator.clone(),
            action: format!("commit {payer}'s {token} funds"),
        };

        let Some(mut approval) = self.approvals.get_mut(&key) else {
            if opening || to.increases_over(&from) {
                return Err(unauthorized());
            }
            return commit();
        };

        if (opening || to.increases_over(&from)) && !approval.approved {
            return Err(unauthorized());
        }
        if let Some(period) = lockup_period {
            if period > approval.max_lockup_period {
                return Err(LedgerError::AllowanceExceeded(format!(
                    "lockup period {period} exceeds operator maximum {}",
                    approval.max_lockup_period
                )));
            }
        }

        let rate_usage = (approval.rate_usage - from.rate + to.rate).max(Decimal::ZERO);
        let lockup_usage = (approval.lockup_usage - from.lockup + to.lockup).max(Decimal::ZERO);
        if to.rate > from.rate && rate_usage > approval.rate_allowance {
            return Err(LedgerError::AllowanceExceeded(format!(
                "rate usage {rate_usage} exceeds allowance {}",
                approval.rate_allowance
            )));
        }
        if to.lockup > from.lockup && lockup_usage > approval.lockup_allowance {
            return Err(LedgerError::AllowanceExceeded(format!(
                "lockup usage {lockup_usage} exceeds allowance {}",
                approval.lockup_allowance
            )));
        }

        let value = commit()?;
        approval.rate_usage = rate_usage;
        approval.lockup_usage = lockup_usage;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parties() -> (TokenId, PartyId, PartyId) {
        (
            TokenId::new("USDFC"),
            PartyId::new("client"),
            PartyId::new("operator"),
        )
    }

    fn commitment(rate: Amount, lockup: Amount) -> Commitment {
        Commitment { rate, lockup }
    }

    #[test]
    fn test_opening_requires_approval() {
        let book = ApprovalBook::new();
        let (token, payer, operator) = parties();
        let result = book.transition(
            &token,
            &payer,
            &operator,
            Commitment::NONE,
            Commitment::NONE,
            None,
            true,
            || Ok(()),
        );
        assert!(matches!(result, Err(LedgerError::Unauthorized { .. })));
    }

    #[test]
    fn test_usage_tracked_after_commit() {
        let book = ApprovalBook::new();
        let (token, payer, operator) = parties();
        book.approve(&token, &payer, &operator, dec!(10), dec!(200), 100);

        book.transition(
            &token,
            &payer,
            &operator,
            Commitment::NONE,
            commitment(dec!(4), dec!(80)),
            Some(20),
            true,
            || Ok(()),
        )
        .unwrap();

        let approval = book.get(&token, &payer, &operator).unwrap();
        assert_eq!(approval.rate_usage, dec!(4));
        assert_eq!(approval.lockup_usage, dec!(80));
    }

    #[test]
    fn test_failed_commit_leaves_usage() {
        let book = ApprovalBook::new();
        let (token, payer, operator) = parties();
        book.approve(&token, &payer, &operator, dec!(10), dec!(200), 100);

        let result: Result<(), _> = book.transition(
            &token,
            &payer,
            &operator,
            Commitment::NONE,
            commitment(dec!(4), dec!(80)),
            None,
            true,
            || Err(LedgerError::InvalidParameter("boom".into())),
        );
        assert!(result.is_err());
        assert_eq!(
            book.get(&token, &payer, &operator).unwrap().rate_usage,
            dec!(0)
        );
    }

    #[test]
    fn test_allowance_exceeded() {
        let book = ApprovalBook::new();
        let (token, payer, operator) = parties();
        book.approve(&token, &payer, &operator, dec!(10), dec!(200), 100);

        let over_rate = book.transition(
            &token,
            &payer,
            &operator,
            Commitment::NONE,
            commitment(dec!(11), dec!(0)),
            None,
            true,
            || Ok(()),
        );
        assert!(matches!(over_rate, Err(LedgerError::AllowanceExceeded(_))));

        let over_period = book.transition(
            &token,
            &payer,
            &operator,
            Commitment::NONE,
            commitment(dec!(1), dec!(1)),
            Some(101),
            true,
            || Ok(()),
        );
        assert!(matches!(over_period, Err(LedgerError::AllowanceExceeded(_))));
    }

    #[test]
    fn test_decrease_allowed_after_revoke() {
        let book = ApprovalBook::new();
        let (token, payer, operator) = parties();
        book.approve(&token, &payer, &operator, dec!(10), dec!(200), 100);
        book.transition(
            &token,
            &payer,
            &operator,
            Commitment::NONE,
            commitment(dec!(5), dec!(50)),
            None,
            true,
            || Ok(()),
        )
        .unwrap();
        assert!(book.revoke(&token, &payer, &operator));

        let increase = book.transition(
            &token,
            &payer,
            &operator,
            commitment(dec!(5), dec!(50)),
            commitment(dec!(6), dec!(60)),
            None,
            false,
            || Ok(()),
        );
        assert!(matches!(increase, Err(LedgerError::Unauthorized { .. })));

        book.transition(
            &token,
            &payer,
            &operator,
            commitment(dec!(5), dec!(50)),
            Commitment::NONE,
            None,
            false,
            || Ok(()),
        )
        .unwrap();
        let approval = book.get(&token, &payer, &operator).unwrap();
        assert_eq!(approval.rate_usage, dec!(0));
        assert_eq!(approval.lockup_usage, dec!(0));
    }
}
