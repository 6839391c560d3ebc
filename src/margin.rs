//! Margin and leverage arithmetic.
//!
//! Required margin is notional divided by leverage. The liquidation price is
//! a closed-form function of entry price, leverage, and the maintenance
//! margin ratio, recomputed whenever the entry price or size changes.

use crate::types::{Leverage, Money, Price, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LeverageError {
    #[error("requested leverage {requested} exceeds account bound {bound}")]
    ExceedsBound { requested: Leverage, bound: Leverage },
}

pub fn notional(qty: Decimal, price: Price) -> Money {
    Money::new(qty.abs() * price.value())
}

/// Margin that must be reserved to carry `qty` at `price` under `leverage`.
pub fn required_margin(qty: Decimal, price: Price, leverage: Leverage) -> Money {
    notional(qty, price).mul(leverage.margin_fraction())
}

pub fn validate_leverage(requested: Leverage, bound: Leverage) -> Result<(), LeverageError> {
    if requested > bound {
        return Err(LeverageError::ExceedsBound { requested, bound });
    }
    Ok(())
}

/// Price at which a position's equity hits the maintenance floor.
///
/// long:  entry * (1 - 1/L + m)
/// short: entry * (1 + 1/L - m)
///
/// With leverage >= 1 and 0 < m < 1 the long price sits strictly between
/// zero and entry, and the short price strictly above entry.
pub fn liquidation_price(
    entry: Price,
    leverage: Leverage,
    side: Side,
    maintenance_margin_ratio: Decimal,
) -> Price {
    let imf = leverage.margin_fraction();
    let liq = match side {
        Side::Long => entry.value() * (Decimal::ONE - imf + maintenance_margin_ratio),
        Side::Short => entry.value() * (Decimal::ONE + imf - maintenance_margin_ratio),
    };
    Price::new_unchecked(liq.max(dec!(0.0001)))
}

/// True when the mark has crossed the liquidation price in the adverse
/// direction. The boundary itself liquidates.
pub fn maintenance_breached(side: Side, liquidation_price: Price, mark: Price) -> bool {
    match side {
        Side::Long => mark <= liquidation_price,
        Side::Short => mark >= liquidation_price,
    }
}

/// Largest quantity an account can open with `cash`, covering both the
/// reserved margin and the entry fee: cash / (price * (1/L + fee_rate)).
pub fn max_open_qty(cash: Money, price: Price, leverage: Leverage, fee_rate: Decimal) -> Decimal {
    if cash.is_negative() || cash.is_zero() {
        return Decimal::ZERO;
    }
    let denom = price.value() * (leverage.margin_fraction() + fee_rate);
    if denom <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    cash.value() / denom
}

/// Truncate a quantity down to the nearest multiple of `step`. Sizing never
/// rounds up: an order can only shrink to fit the step grid.
pub fn truncate_to_step(qty: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return qty;
    }
    (qty / step).floor() * step
}
