//! Random rail workloads.
//!
//! Drives a ledger through a seeded mix of rail creations, settlements,
//! rate changes, terminations and top-ups, then reports what happened and
//! whether token supply was conserved. Used by the CLI, the benchmarks and
//! soak tests.

use crate::accounts::memory::InMemoryAccountStore;
use crate::core::amount::{Amount, Epoch};
use crate::core::config::EngineConfig;
use crate::core::error::LedgerError;
use crate::core::party::PartyId;
use crate::core::token::TokenId;
use crate::ledger::engine::RailLedger;
use crate::rail::model::{RailId, RailState, RailTerms};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shape of a generated workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub token: TokenId,
    /// Parties acting as payers and payees.
    pub party_count: usize,
    pub rail_count: usize,
    /// Operations issued after the rails are opened.
    pub steps: usize,
    /// Upper bound on a rail's payment rate.
    pub max_rate: u64,
    pub max_lockup_period: Epoch,
    pub max_commission_bps: u32,
    /// Starting balance of every party.
    pub initial_deposit: Amount,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            token: TokenId::new("USDFC"),
            party_count: 10,
            rail_count: 20,
            steps: 500,
            max_rate: 50,
            max_lockup_period: 100,
            max_commission_bps: 500,
            initial_deposit: Decimal::from(1_000_000),
            seed: 42,
        }
    }
}

/// A single generated operation against rail `rail` (an index into the
/// opened rails).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadOp {
    Settle { rail: usize },
    ChangeRate { rail: usize, rate: u64 },
    Terminate { rail: usize },
    TopUp { party: usize, amount: u64 },
}

/// What a workload run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadReport {
    pub rails_created: usize,
    pub settlements: usize,
    pub rate_changes: usize,
    pub terminations: usize,
    pub closed_rails: usize,
    /// Operations the ledger refused (short funds, closed rails, ...).
    pub rejected: usize,
    pub total_paid: Amount,
    pub total_commission: Amount,
    pub deposited: Amount,
    pub supply_before: Amount,
    pub supply_after: Amount,
    pub final_epoch: Epoch,
}

impl WorkloadReport {
    /// Supply changed by exactly what was deposited after the start.
    pub fn is_conserved(&self) -> bool {
        self.supply_after == self.supply_before + self.deposited
    }
}

impl std::fmt::Display for WorkloadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Workload Report ===")?;
        writeln!(f, "Rails created:  {}", self.rails_created)?;
        writeln!(f, "Rails closed:   {}", self.closed_rails)?;
        writeln!(f, "Settlements:    {}", self.settlements)?;
        writeln!(f, "Rate changes:   {}", self.rate_changes)?;
        writeln!(f, "Terminations:   {}", self.terminations)?;
        writeln!(f, "Rejected:       {}", self.rejected)?;
        writeln!(f, "Paid to payees: {}", self.total_paid)?;
        writeln!(f, "Commission:     {}", self.total_commission)?;
        writeln!(f, "Final epoch:    {}", self.final_epoch)?;
        writeln!(f, "Conserved:      {}", self.is_conserved())
    }
}

/// Generate `config.steps` operations over `rail_count` rails.
pub fn generate_operations(config: &WorkloadConfig, rng: &mut impl Rng) -> Vec<WorkloadOp> {
    let rails = config.rail_count.max(1);
    let parties = config.party_count.max(1);
    (0..config.steps)
        .map(|_| match rng.gen_range(0..10) {
            0..=5 => WorkloadOp::Settle {
                rail: rng.gen_range(0..rails),
            },
            6 | 7 => WorkloadOp::ChangeRate {
                rail: rng.gen_range(0..rails),
                rate: rng.gen_range(0..=config.max_rate),
            },
            8 => WorkloadOp::Terminate {
                rail: rng.gen_range(0..rails),
            },
            _ => WorkloadOp::TopUp {
                party: rng.gen_range(0..parties),
                amount: rng.gen_range(1..=config.max_rate * 100 + 1),
            },
        })
        .collect()
}

fn is_expected_refusal(err: &LedgerError) -> bool {
    !matches!(err, LedgerError::InvariantViolation { .. })
}

/// Run a seeded workload against a fresh in-memory ledger.
///
/// Refusals are counted; an [`LedgerError::InvariantViolation`] aborts the
/// run and is returned.
pub fn run_workload(config: &WorkloadConfig) -> Result<WorkloadReport, LedgerError> {
    if config.party_count < 2 {
        return Err(LedgerError::InvalidParameter(
            "a workload needs at least two parties".to_string(),
        ));
    }
    let mut rng = StdRng::seed_from_u64(config.seed);
    let store = Arc::new(InMemoryAccountStore::new());
    let ledger = RailLedger::new(
        EngineConfig {
            max_lockup_period: config.max_lockup_period.max(1),
            ..EngineConfig::default()
        },
        store.clone(),
    );
    let token = &config.token;
    let operator = PartyId::new("OPERATOR");
    let parties: Vec<PartyId> = (0..config.party_count)
        .map(|i| PartyId::new(format!("PARTY-{:03}", i)))
        .collect();

    for party in &parties {
        ledger.deposit(token, party, config.initial_deposit)?;
        ledger.approve_operator(
            token,
            party,
            &operator,
            Decimal::MAX,
            Decimal::MAX,
            config.max_lockup_period,
        )?;
    }

    let mut report = WorkloadReport {
        supply_before: store.total_supply(token),
        ..WorkloadReport::default()
    };

    let mut rails: Vec<RailId> = Vec::with_capacity(config.rail_count);
    for _ in 0..config.rail_count {
        let payer = rng.gen_range(0..parties.len());
        let mut payee = rng.gen_range(0..parties.len());
        while payee == payer {
            payee = rng.gen_range(0..parties.len());
        }
        let terms = RailTerms::new(
            token.clone(),
            parties[payer].clone(),
            parties[payee].clone(),
            operator.clone(),
        )
        .with_rate(Decimal::from(rng.gen_range(1..=config.max_rate.max(1))))
        .with_lockup(
            rng.gen_range(0..=config.max_lockup_period),
            Decimal::from(rng.gen_range(0..=100u64)),
        )
        .with_commission_bps(rng.gen_range(0..=config.max_commission_bps));
        match ledger.create_rail(terms, 0) {
            Ok(id) => rails.push(id),
            Err(err) if is_expected_refusal(&err) => report.rejected += 1,
            Err(err) => return Err(err),
        }
    }
    report.rails_created = rails.len();
    if rails.is_empty() {
        return Ok(report);
    }

    let mut now: Epoch = 0;
    for op in generate_operations(config, &mut rng) {
        now += rng.gen_range(1..=5);
        let result = match op {
            WorkloadOp::Settle { rail } => {
                let id = rails[rail % rails.len()];
                ledger.settle_rail(id, &operator, now, now).map(|outcome| {
                    if !outcome.is_noop() {
                        report.settlements += 1;
                        report.total_paid += outcome.net_amount_paid;
                        report.total_commission += outcome.commission_paid;
                    }
                })
            }
            WorkloadOp::ChangeRate { rail, rate } => {
                let id = rails[rail % rails.len()];
                ledger
                    .modify_rail_payment(id, &operator, Decimal::from(rate), Decimal::ZERO, now)
                    .map(|()| report.rate_changes += 1)
            }
            WorkloadOp::Terminate { rail } => {
                let id = rails[rail % rails.len()];
                ledger
                    .terminate_rail(id, &operator, now)
                    .map(|_| report.terminations += 1)
            }
            WorkloadOp::TopUp { party, amount } => {
                let amount = Decimal::from(amount);
                ledger
                    .deposit(token, &parties[party % parties.len()], amount)
                    .map(|()| report.deposited += amount)
            }
        };
        match result {
            Ok(()) => {}
            Err(err) if is_expected_refusal(&err) => {
                debug!("workload op {:?} refused: {}", op, err);
                report.rejected += 1;
            }
            Err(err) => return Err(err),
        }
    }

    report.final_epoch = now;
    report.closed_rails = rails
        .iter()
        .filter_map(|id| ledger.get_rail(*id).ok())
        .filter(|rail| rail.state() == RailState::Closed)
        .count();
    report.supply_after = store.total_supply(token);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_operations_stay_in_range() {
        let config = WorkloadConfig {
            rail_count: 4,
            party_count: 3,
            steps: 200,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let ops = generate_operations(&config, &mut rng);
        assert_eq!(ops.len(), 200);
        for op in ops {
            match op {
                WorkloadOp::Settle { rail } | WorkloadOp::Terminate { rail } => assert!(rail < 4),
                WorkloadOp::ChangeRate { rail, rate } => {
                    assert!(rail < 4);
                    assert!(rate <= config.max_rate);
                }
                WorkloadOp::TopUp { party, .. } => assert!(party < 3),
            }
        }
    }

    #[test]
    fn test_workload_conserves_supply() {
        let config = WorkloadConfig {
            party_count: 5,
            rail_count: 8,
            steps: 300,
            ..Default::default()
        };
        let report = run_workload(&config).unwrap();
        assert_eq!(report.rails_created, 8);
        assert!(report.settlements > 0);
        assert!(report.is_conserved(), "{}", report);
    }

    #[test]
    fn test_same_seed_same_report() {
        let config = WorkloadConfig {
            steps: 100,
            ..Default::default()
        };
        let first = run_workload(&config).unwrap();
        let second = run_workload(&config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_party_rejected() {
        let config = WorkloadConfig {
            party_count: 1,
            ..Default::default()
        };
        assert!(run_workload(&config).is_err());
    }
}
