//! Fixed-point money helpers
//!
//! Wallet amounts are single-currency decimals with exactly two fraction
//! digits. Anything finer than a centavo is rejected rather than rounded so a
//! gateway payload can never silently change the credited value.

use rust_decimal::Decimal;

/// Number of fraction digits carried by every wallet amount
pub const AMOUNT_SCALE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount must be positive, got {0}")]
    NotPositive(Decimal),

    #[error("amount {0} has more than {AMOUNT_SCALE} fraction digits")]
    TooPrecise(Decimal),
}

/// Validate a positive amount and normalize it to two fraction digits.
pub fn normalize_amount(amount: Decimal) -> Result<Decimal, AmountError> {
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive(amount));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(AmountError::TooPrecise(amount));
    }

    let mut normalized = amount;
    normalized.rescale(AMOUNT_SCALE);
    Ok(normalized)
}

/// Render an amount the way signatures and wire payloads expect it ("500.00").
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount)
}
