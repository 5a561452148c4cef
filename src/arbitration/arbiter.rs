use crate::core::amount::{Amount, Epoch};
use crate::core::party::PartyId;
use crate::core::token::TokenId;
use crate::rail::model::RailId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// One settlement span submitted for arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationRequest {
    pub token: TokenId,
    pub payer: PartyId,
    pub payee: PartyId,
    pub rail_id: RailId,
    pub from_epoch: Epoch,
    pub to_epoch: Epoch,
    /// Naive amount owed for `(from_epoch, to_epoch]`.
    pub amount: Amount,
}

/// What an arbiter proposes to settle. Untrusted until clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationResponse {
    pub modified_amount: Amount,
    pub settle_upto: Epoch,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArbiterError {
    #[error("arbiter rejected the request: {0}")]
    Rejected(String),
    #[error("arbiter backend failed: {0}")]
    Backend(String),
}

/// External capability that may reduce a settlement based on service
/// quality.
///
/// Implementations may read their own state (a proof log, an SLA monitor)
/// but never touch the ledger. Calls may block; the gateway bounds them
/// with a timeout and runs them off the caller's thread.
pub trait Arbiter: Send + Sync + 'static {
    /// Name rails use to reference this arbiter.
    fn arbiter_id(&self) -> &str;

    fn arbitrate(&self, request: &ArbitrationRequest) -> Result<ArbitrationResponse, ArbiterError>;
}

/// How a rail's settlement is arbitrated.
#[derive(Clone)]
pub enum ArbiterBinding {
    /// No arbiter: the naive amount and requested span pass through.
    Identity,
    External(Arc<dyn Arbiter>),
}

impl ArbiterBinding {
    pub fn name(&self) -> &str {
        match self {
            ArbiterBinding::Identity => "identity",
            ArbiterBinding::External(arbiter) => arbiter.arbiter_id(),
        }
    }
}

impl std::fmt::Debug for ArbiterBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArbiterBinding::Identity => f.write_str("Identity"),
            ArbiterBinding::External(arbiter) => {
                f.debug_tuple("External").field(&arbiter.arbiter_id()).finish()
            }
        }
    }
}
