//! A storage deal paid over a rail.
//!
//! A client pays a storage provider per epoch through a rail managed by a
//! storage service, which takes a commission. A proof-checking arbiter cuts
//! payment for epochs where proofs were missed. The deal changes rate, is
//! terminated, and settles out to its end epoch.
//!
//! Run with `RUST_LOG=debug` to see the ledger's own logging.

use rail_engine::prelude::*;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Pays only for epochs in which the provider submitted a proof.
struct ProofLog {
    missed: BTreeSet<Epoch>,
}

impl Arbiter for ProofLog {
    fn arbiter_id(&self) -> &str {
        "proof-log"
    }

    fn arbitrate(&self, request: &ArbitrationRequest) -> Result<ArbitrationResponse, ArbiterError> {
        let epochs = request.to_epoch - request.from_epoch;
        let missed = self
            .missed
            .range(request.from_epoch + 1..=request.to_epoch)
            .count() as u64;
        let amount = if epochs == 0 {
            request.amount
        } else {
            (request.amount * Amount::from(epochs - missed) / Amount::from(epochs)).floor()
        };
        Ok(ArbitrationResponse {
            modified_amount: amount,
            settle_upto: request.to_epoch,
            note: format!("{missed} of {epochs} epochs without proof"),
        })
    }
}

fn main() -> Result<(), LedgerError> {
    env_logger::init();

    println!("╔══════════════════════════════════════════╗");
    println!("║  rail-engine: Storage Deal Rail Example  ║");
    println!("╚══════════════════════════════════════════╝\n");

    let ledger = RailLedger::in_memory(EngineConfig::default());
    let usdfc = TokenId::new("USDFC");
    let client = PartyId::new("client");
    let provider = PartyId::new("provider");
    let service = PartyId::new("storage-service");

    ledger.deposit(&usdfc, &client, dec!(10_000))?;
    ledger.approve_operator(&usdfc, &client, &service, dec!(100), dec!(5_000), 2_880)?;
    ledger.register_arbiter(Arc::new(ProofLog {
        missed: [12, 13, 14].into_iter().collect(),
    }))?;

    // --- Open ---
    println!("━━━ Opening the rail ━━━\n");
    let rail = ledger.create_rail(
        RailTerms::new(usdfc.clone(), client.clone(), provider.clone(), service.clone())
            .with_rate(dec!(10))
            .with_lockup(60, dec!(200))
            .with_commission_bps(250)
            .with_arbiter("proof-log"),
        0,
    )?;
    let snapshot = ledger.get_rail(rail)?;
    println!("Rail {} locked {} {}", rail, snapshot.lockup_held(), usdfc);
    print_balances(&ledger, &usdfc, &[&client, &provider, &service]);

    // --- Settle with arbitration ---
    println!("━━━ Settling epochs 1-20 ━━━\n");
    let outcome = ledger.settle_rail(rail, &provider, 20, 20)?;
    println!("{}", outcome);

    // --- Change rate, one-time payment ---
    println!("━━━ Raising the rate and paying a setup fee ━━━\n");
    ledger.modify_rail_payment(rail, &service, dec!(15), dec!(100), 25)?;
    let snapshot = ledger.get_rail(rail)?;
    println!(
        "Rate now {}, {} queued change(s), fixed lockup {}\n",
        snapshot.payment_rate(),
        snapshot.rate_changes().len(),
        snapshot.lockup_fixed()
    );

    // --- Terminate ---
    println!("━━━ Terminating at epoch 40 ━━━\n");
    let end = ledger.terminate_rail(rail, &client, 40)?;
    println!("End epoch: {}\n", end);

    let outcome = ledger.settle_rail(rail, &provider, end, end)?;
    println!("{}", outcome);
    println!("State: {:?}\n", ledger.get_rail(rail)?.state());

    print_balances(&ledger, &usdfc, &[&client, &provider, &service]);

    println!("━━━ Journal ━━━\n");
    for event in ledger.events(rail) {
        println!("  epoch {:>3}  {:?}", event.epoch, event.kind);
    }
    Ok(())
}

fn print_balances(ledger: &RailLedger, token: &TokenId, parties: &[&PartyId]) {
    for party in parties {
        let balance = ledger.accounts().balance(token, party);
        println!(
            "  {:<16} available {:>8}  locked {:>8}",
            party.to_string(),
            balance.available,
            balance.locked
        );
    }
    println!();
}
