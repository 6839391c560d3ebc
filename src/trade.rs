// 7.0: immutable fill history. one record per executed fill, including the
// forced closures the liquidation sweep produces. never mutated after append.

use crate::types::{AccountKind, Money, Price, Side, TickId, Timestamp, TradeId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub user: UserId,
    pub account: AccountKind,
    pub side: Side,
    pub size: Decimal,
    pub price: Price,
    pub fee: Money,
    pub tick: TickId,
    pub timestamp: Timestamp,
    /// Set when the fill was forced by the liquidation sweep.
    pub liquidation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trade_serializes() {
        let trade = Trade {
            id: TradeId(1),
            user: UserId(7),
            account: AccountKind::Futures,
            side: Side::Long,
            size: dec!(0.5),
            price: Price::new_unchecked(dec!(50000)),
            fee: Money::new(dec!(10)),
            tick: TickId(3),
            timestamp: Timestamp::from_millis(3_600_000),
            liquidation: false,
        };

        let json = serde_json::to_string(&trade).unwrap();
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, trade.id);
        assert_eq!(back.size, dec!(0.5));
    }
}
