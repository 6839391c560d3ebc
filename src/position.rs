// 2.0: open position tracking for margin and futures accounts.
// one position per account, pnl = size * (mark - entry).
// 2.1 has increase/reduce logic at the bottom.

use crate::margin;
use crate::types::{Leverage, Money, Price, Side, SignedSize, TickId};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub size: SignedSize,
    pub entry_price: Price,
    pub leverage: Leverage,
    /// Margin reserved out of ledger cash to carry this position.
    pub margin: Money,
    /// Recomputed on every size or entry-price change.
    pub liquidation_price: Price,
    pub opened_at: TickId,
    pub updated_at: TickId,
}

impl Position {
    pub fn new(
        size: SignedSize,
        entry_price: Price,
        leverage: Leverage,
        margin: Money,
        maintenance_margin_ratio: Decimal,
        tick: TickId,
    ) -> Self {
        debug_assert!(!size.is_zero(), "a position is never flat");
        let side = if size.is_long() { Side::Long } else { Side::Short };
        Self {
            size,
            entry_price,
            leverage,
            margin,
            liquidation_price: margin::liquidation_price(
                entry_price,
                leverage,
                side,
                maintenance_margin_ratio,
            ),
            opened_at: tick,
            updated_at: tick,
        }
    }

    pub fn side(&self) -> Side {
        if self.size.is_long() {
            Side::Long
        } else {
            Side::Short
        }
    }

    // 2.1: paper gains/losses against the current mark
    pub fn unrealized_pnl(&self, mark: Price) -> Money {
        Money::new(self.size.value() * (mark.value() - self.entry_price.value()))
    }

    pub fn notional(&self, mark: Price) -> Money {
        Money::new(self.size.abs() * mark.value())
    }

    pub fn entry_notional(&self) -> Money {
        Money::new(self.size.abs() * self.entry_price.value())
    }

    /// Add size in the same direction. Entry price becomes the size-weighted
    /// average of old and new, which shifts the liquidation price too.
    pub fn increase(
        &self,
        delta_qty: Decimal,
        fill_price: Price,
        added_margin: Money,
        maintenance_margin_ratio: Decimal,
        tick: TickId,
    ) -> Position {
        debug_assert!(delta_qty > Decimal::ZERO, "increase takes an absolute quantity");

        let old_abs = self.size.abs();
        let new_abs = old_abs + delta_qty;
        let weighted =
            old_abs * self.entry_price.value() + delta_qty * fill_price.value();
        let new_entry = Price::new_unchecked(weighted / new_abs);
        let new_size = SignedSize::new(self.size.value().signum() * new_abs);

        Position {
            size: new_size,
            entry_price: new_entry,
            leverage: self.leverage,
            margin: self.margin.add(added_margin),
            liquidation_price: margin::liquidation_price(
                new_entry,
                self.leverage,
                self.side(),
                maintenance_margin_ratio,
            ),
            opened_at: self.opened_at,
            updated_at: tick,
        }
    }

    /// Close part or all of the position at `fill_price`. Margin is released
    /// proportionally; the entry price of the remainder is unchanged.
    pub fn reduce(&self, qty: Decimal, fill_price: Price, tick: TickId) -> PositionUpdate {
        debug_assert!(qty > Decimal::ZERO, "reduce takes a positive quantity");
        let abs = self.size.abs();
        let qty = qty.min(abs);

        let closed = SignedSize::new(self.size.value().signum() * qty);
        let realized_pnl =
            Money::new(closed.value() * (fill_price.value() - self.entry_price.value()));

        let fraction = qty / abs;
        let margin_released = self.margin.mul(fraction);
        let remaining_abs = abs - qty;

        if remaining_abs.is_zero() {
            return PositionUpdate {
                remaining: None,
                realized_pnl,
                margin_released: self.margin,
            };
        }

        let remaining = Position {
            size: SignedSize::new(self.size.value().signum() * remaining_abs),
            entry_price: self.entry_price,
            leverage: self.leverage,
            margin: self.margin.sub(margin_released),
            liquidation_price: self.liquidation_price,
            opened_at: self.opened_at,
            updated_at: tick,
        };

        PositionUpdate {
            remaining: Some(remaining),
            realized_pnl,
            margin_released,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PositionUpdate {
    pub remaining: Option<Position>,
    pub realized_pnl: Money,
    pub margin_released: Money,
}
