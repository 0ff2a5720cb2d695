//! Fixed-point decimal rules for quantities and costs.
//!
//! Column shapes (digits, scale):
//! - quantity: (18, 6)
//! - unit cost, reference price, weighted average cost: (12, 4)
//! - transaction value: (16, 4)
//!
//! Inputs are *checked* against these shapes and rejected when they carry more
//! precision than the column holds. Derived values are rounded half-up
//! (midpoint away from zero).

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

pub const QTY_SCALE: u32 = 6;
pub const QTY_MAX_DIGITS: u32 = 18;

pub const COST_SCALE: u32 = 4;
pub const COST_MAX_DIGITS: u32 = 12;

pub const VALUE_SCALE: u32 = 4;
pub const VALUE_MAX_DIGITS: u32 = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrecisionError {
    #[error("value has {found} decimal places, at most {max} allowed")]
    ScaleExceeded { found: u32, max: u32 },

    #[error("value exceeds {max_digits} total digits at scale {scale}")]
    DigitsExceeded { max_digits: u32, scale: u32 },

    #[error("arithmetic overflow")]
    Overflow,
}

/// Round half-up to `scale` and pin the representation to exactly that scale.
pub fn round_half_up(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

pub fn round_qty(value: Decimal) -> Decimal {
    round_half_up(value, QTY_SCALE)
}

pub fn round_cost(value: Decimal) -> Decimal {
    round_half_up(value, COST_SCALE)
}

/// Check that `value` fits a `(max_digits, scale)` column without rounding and
/// return it at the canonical scale.
pub fn fit(value: Decimal, max_digits: u32, scale: u32) -> Result<Decimal, PrecisionError> {
    let significant = value.normalize();
    if significant.scale() > scale {
        return Err(PrecisionError::ScaleExceeded {
            found: significant.scale(),
            max: scale,
        });
    }

    let integer_digits = max_digits - scale;
    let limit = Decimal::from_i128_with_scale(10i128.pow(integer_digits), 0);
    if value.abs() >= limit {
        return Err(PrecisionError::DigitsExceeded { max_digits, scale });
    }

    let mut canonical = value;
    canonical.rescale(scale);
    Ok(canonical)
}

pub fn fit_qty(value: Decimal) -> Result<Decimal, PrecisionError> {
    fit(value, QTY_MAX_DIGITS, QTY_SCALE)
}

pub fn fit_cost(value: Decimal) -> Result<Decimal, PrecisionError> {
    fit(value, COST_MAX_DIGITS, COST_SCALE)
}

/// `qty × unit_cost`, rounded to the transaction value column.
pub fn transaction_value(qty: Decimal, unit_cost: Decimal) -> Result<Decimal, PrecisionError> {
    let raw = qty.checked_mul(unit_cost).ok_or(PrecisionError::Overflow)?;
    let value = round_half_up(raw, VALUE_SCALE);
    fit(value, VALUE_MAX_DIGITS, VALUE_SCALE)
}

/// Moving weighted average after an inbound movement.
///
/// `(old_qty × old_cost + in_qty × in_cost) / new_qty`, rounded to cost scale.
/// A zero resulting quantity resets the average to zero.
pub fn weighted_average(
    old_qty: Decimal,
    old_cost: Decimal,
    in_qty: Decimal,
    in_cost: Decimal,
    new_qty: Decimal,
) -> Result<Decimal, PrecisionError> {
    if new_qty.is_zero() {
        return Ok(round_cost(Decimal::ZERO));
    }
    let held = old_qty.checked_mul(old_cost).ok_or(PrecisionError::Overflow)?;
    let incoming = in_qty.checked_mul(in_cost).ok_or(PrecisionError::Overflow)?;
    let total = held.checked_add(incoming).ok_or(PrecisionError::Overflow)?;
    let avg = total.checked_div(new_qty).ok_or(PrecisionError::Overflow)?;
    Ok(round_cost(avg))
}
