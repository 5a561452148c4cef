//! Amount and epoch arithmetic shared by every rail computation.
//!
//! Amounts are [`Decimal`] values restricted to non-negative whole numbers:
//! they count the token's smallest unit, so fractional results are always
//! floored before they reach a balance.

use crate::core::error::LedgerError;
use rust_decimal::Decimal;

/// Discrete external time unit. Supplied by the caller on every entry point.
pub type Epoch = u64;

/// Token amount in the token's smallest unit.
pub type Amount = Decimal;

/// Basis-point denominator for commission rates.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Reject negative or fractional amounts.
pub fn validate_amount(name: &str, value: Amount) -> Result<(), LedgerError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(LedgerError::InvalidParameter(format!(
            "{name} must be non-negative, got {value}"
        )));
    }
    if !value.fract().is_zero() {
        return Err(LedgerError::InvalidParameter(format!(
            "{name} must be a whole number of token units, got {value}"
        )));
    }
    Ok(())
}

/// Reject commission rates above 100%.
pub fn validate_bps(bps: u32) -> Result<(), LedgerError> {
    if bps > BPS_DENOMINATOR {
        return Err(LedgerError::InvalidParameter(format!(
            "commission rate {bps} bps exceeds {BPS_DENOMINATOR}"
        )));
    }
    Ok(())
}

/// `rate × epochs`, or `None` on overflow.
pub fn accrue(rate: Amount, epochs: u64) -> Option<Amount> {
    rate.checked_mul(Decimal::from(epochs))
}

/// Operator commission on `amount`, floored to a whole unit.
///
/// `bps` must not exceed [`BPS_DENOMINATOR`]. The amount is split into whole
/// multiples of the denominator and a remainder so no intermediate product
/// exceeds `amount`.
///
/// # Examples
///
/// ```
/// use rail_engine::core::amount::commission;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(commission(dec!(1000), 250), dec!(25));
/// assert_eq!(commission(dec!(7), 1_000), dec!(0));
/// ```
pub fn commission(amount: Amount, bps: u32) -> Amount {
    let denominator = Decimal::from(BPS_DENOMINATOR);
    let bps = Decimal::from(bps);
    let whole = (amount / denominator).floor();
    let rest = amount - whole * denominator;
    whole * bps + (rest * bps / denominator).floor()
}
