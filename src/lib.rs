//! # rail-engine
//!
//! Continuous payment rail settlement engine.
//!
//! A rail streams tokens from a payer to a payee at a per-epoch rate. The
//! payer's funds are locked up front to guarantee a window of future
//! payments; settlement pays the elapsed span out of that lockup, optionally
//! reduced by an external arbiter, with a commission for the operator that
//! manages the rail.
//!
//! ## Architecture
//!
//! - **core** — Identifiers, amounts and epochs, errors, engine config
//! - **accounts** — Balance store, atomic balance batches, operator approvals
//! - **rail** — Rail model, rate-change queue, lockup accounting
//! - **arbitration** — Arbiter capability and the bounded call gateway
//! - **ledger** — The rail ledger, settlement outcomes, event journal
//! - **simulation** — Random workload generation

pub mod accounts;
pub mod arbitration;
pub mod core;
pub mod ledger;
pub mod rail;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::accounts::memory::InMemoryAccountStore;
    pub use crate::accounts::store::{AccountStore, Balance};
    pub use crate::arbitration::arbiter::{
        Arbiter, ArbiterError, ArbitrationRequest, ArbitrationResponse,
    };
    pub use crate::core::amount::{Amount, Epoch};
    pub use crate::core::config::EngineConfig;
    pub use crate::core::error::LedgerError;
    pub use crate::core::party::PartyId;
    pub use crate::core::token::TokenId;
    pub use crate::ledger::engine::RailLedger;
    pub use crate::ledger::journal::{RailEvent, RailEventKind};
    pub use crate::ledger::settlement::SettlementOutcome;
    pub use crate::rail::model::{Rail, RailId, RailState, RailTerms};
}
