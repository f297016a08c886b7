//! Fixed-point policy shared by every balance, quantity and price in the ledger.
//!
//! All three are stored as `NUMERIC(20, 8)`, so every value that reaches the
//! store is rounded to [`LEDGER_SCALE`] places exactly once, at the point it is
//! produced. Intermediate products are kept at full precision.

use crate::error::CoreError;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::str::FromStr;

/// Number of fractional digits carried by every ledger column.
pub const LEDGER_SCALE: u32 = 8;

/// Exclusive upper bound of a `NUMERIC(20, 8)` column.
pub const LEDGER_LIMIT: Decimal = dec!(1000000000000);

/// Rounds a value to the ledger scale (banker's rounding) and pads it to exactly
/// eight fractional digits.
pub fn normalize(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(LEDGER_SCALE, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(LEDGER_SCALE);
    rounded
}

/// Parses an order quantity received as text.
///
/// The quantity must be a plain decimal (ASCII digits with at most one `.`; no
/// sign, exponent or digit separators), strictly positive, representable at the
/// ledger scale without rounding, and inside the column range.
pub fn parse_quantity(raw: &str) -> Result<Decimal, CoreError> {
    let text = raw.trim();
    let invalid = |reason: &str| CoreError::InvalidQuantity(raw.to_string(), reason.to_string());

    if text.is_empty() {
        return Err(invalid("quantity is empty"));
    }
    let plain = text.chars().all(|c| c.is_ascii_digit() || c == '.')
        && text.chars().filter(|&c| c == '.').count() <= 1
        && text.chars().any(|c| c.is_ascii_digit());
    if !plain {
        return Err(invalid("not a decimal number"));
    }
    let value = Decimal::from_str(text).map_err(|_| invalid("not a decimal number"))?;
    if value <= Decimal::ZERO {
        return Err(invalid("must be greater than zero"));
    }
    if value.normalize().scale() > LEDGER_SCALE {
        return Err(invalid("more than 8 fractional digits"));
    }
    if value >= LEDGER_LIMIT {
        return Err(invalid("exceeds the ledger range"));
    }
    Ok(normalize(value))
}

/// Trims and upper-cases a ticker, rejecting anything that is not a plain symbol.
pub fn normalize_symbol(raw: &str) -> Result<String, CoreError> {
    let symbol = raw.trim().to_ascii_uppercase();
    let well_formed = !symbol.is_empty()
        && symbol.len() <= 20
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !well_formed {
        return Err(CoreError::InvalidSymbol(raw.to_string()));
    }
    Ok(symbol)
}

/// `quantity × price`, rounded to the ledger scale.
pub fn notional(quantity: Decimal, price: Decimal) -> Result<Decimal, CoreError> {
    quantity
        .checked_mul(price)
        .map(normalize)
        .ok_or_else(|| CoreError::Calculation(format!("{quantity} x {price} overflows")))
}

/// The quantity-weighted blend of an existing cost basis and a new fill.
///
/// Computed at full precision and rounded once, so
/// `(q1·p1 + q2·p2) / (q1 + q2)` is exact to the ledger scale.
pub fn weighted_average(
    held_quantity: Decimal,
    held_average: Decimal,
    added_quantity: Decimal,
    added_price: Decimal,
) -> Result<Decimal, CoreError> {
    let overflow = || CoreError::Calculation("weighted average overflows".to_string());

    let total_quantity = held_quantity.checked_add(added_quantity).ok_or_else(overflow)?;
    if total_quantity.is_zero() {
        return Err(CoreError::Calculation(
            "weighted average over a zero quantity".to_string(),
        ));
    }
    let held_cost = held_quantity.checked_mul(held_average).ok_or_else(overflow)?;
    let added_cost = added_quantity.checked_mul(added_price).ok_or_else(overflow)?;
    let total_cost = held_cost.checked_add(added_cost).ok_or_else(overflow)?;

    total_cost
        .checked_div(total_quantity)
        .map(normalize)
        .ok_or_else(overflow)
}

/// `quantity × (price − average)`; negative when sold below cost.
pub fn realized_pnl(quantity: Decimal, price: Decimal, average: Decimal) -> Result<Decimal, CoreError> {
    price
        .checked_sub(average)
        .and_then(|per_unit| per_unit.checked_mul(quantity))
        .map(normalize)
        .ok_or_else(|| CoreError::Calculation("realized P&L overflows".to_string()))
}
