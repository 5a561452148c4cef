use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the asset a rail is denominated in.
///
/// Tokens are opaque: the engine never converts between them, and every
/// balance, lockup and payout is scoped to exactly one token.
///
/// # Examples
///
/// ```
/// use rail_engine::core::token::TokenId;
///
/// let usdfc = TokenId::new("USDFC");
/// assert_eq!(usdfc.as_str(), "USDFC");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_equality() {
        assert_eq!(TokenId::new("FIL"), TokenId::from("FIL"));
        assert_ne!(TokenId::new("FIL"), TokenId::new("USDFC"));
    }

    #[test]
    fn test_token_serializes_transparently() {
        let json = serde_json::to_string(&TokenId::new("USDFC")).unwrap();
        assert_eq!(json, "\"USDFC\"");
    }
}
