// 3.0: trading and liquidation fees. flat rate per account kind applied to
// trade notional, with a steeper rate for forced closures.

use crate::types::{AccountKind, Money};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub spot_rate: Decimal,
    pub margin_rate: Decimal,
    pub futures_rate: Decimal,
    pub liquidation_rate: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            spot_rate: dec!(0.001),       // 0.1%
            margin_rate: dec!(0.001),     // 0.1%
            futures_rate: dec!(0.0004),   // 0.04%
            liquidation_rate: dec!(0.005), // 0.5%
        }
    }
}

impl FeeSchedule {
    pub fn rate(&self, kind: AccountKind) -> Decimal {
        match kind {
            AccountKind::Spot => self.spot_rate,
            AccountKind::Margin => self.margin_rate,
            AccountKind::Futures => self.futures_rate,
        }
    }

    pub fn max_trading_rate(&self) -> Decimal {
        self.spot_rate.max(self.margin_rate).max(self.futures_rate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeCalculator {
    schedule: FeeSchedule,
}

impl FeeCalculator {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    pub fn trade_fee(&self, kind: AccountKind, notional: Money) -> Money {
        notional.abs().mul(self.schedule.rate(kind))
    }

    pub fn liquidation_fee(&self, notional: Money) -> Money {
        notional.abs().mul(self.schedule.liquidation_rate)
    }
}
