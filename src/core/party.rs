use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a party taking part in payment rails.
///
/// The same identifier space is used for payers, payees and operators:
/// a storage provider may be the payee of one rail and the operator of
/// another, and balances are always keyed by `(token, party)`.
///
/// # Examples
///
/// ```
/// use rail_engine::core::party::PartyId;
///
/// let client = PartyId::new("client-01");
/// let provider = PartyId::new("provider-07");
/// assert_ne!(client, provider);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartyId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
