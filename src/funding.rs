// 4.0: periodic funding between futures longs and shorts. every N ticks the
// holders exchange size * mark * rate; longs pay shorts when the rate is
// positive. the engine settles bilaterally against each holder's ledger, so
// the sum over all positions is exactly zero.

use crate::types::{AccountKind, Money, Price, SignedSize, TickId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payment owed by the holder of `size` for one settlement. Positive means
/// the holder pays, negative means the holder receives.
pub fn funding_payment(size: SignedSize, mark: Price, rate: Decimal) -> Money {
    Money::new(size.value() * mark.value() * rate)
}

/// Settlement boundaries land every `interval_ticks` ticks, starting after
/// the first full interval has elapsed.
pub fn is_settlement_tick(tick: TickId, interval_ticks: u64) -> bool {
    interval_ticks > 0 && tick.0 > 0 && tick.0 % interval_ticks == 0
}

/// One settled position at a funding boundary. Accrual restarts from zero
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRecord {
    pub user: UserId,
    pub account: AccountKind,
    pub position_size: SignedSize,
    pub payment: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FundingError {
    #[error("funding rate missing at settlement tick {0:?}")]
    FundingDataMissing(TickId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn long_pays_positive_rate() {
        let payment = funding_payment(
            SignedSize::new(dec!(1)),
            Price::new_unchecked(dec!(50000)),
            dec!(0.001),
        );
        assert_eq!(payment.value(), dec!(50.000));
    }

    #[test]
    fn short_receives_positive_rate() {
        let payment = funding_payment(
            SignedSize::new(dec!(-1)),
            Price::new_unchecked(dec!(50000)),
            dec!(0.001),
        );
        assert_eq!(payment.value(), dec!(-50.000));
    }

    #[test]
    fn opposite_positions_net_to_zero() {
        let mark = Price::new_unchecked(dec!(50000));
        let rate = dec!(0.0001);
        let long = funding_payment(SignedSize::new(dec!(3)), mark, rate);
        let short = funding_payment(SignedSize::new(dec!(-3)), mark, rate);
        assert!(long.add(short).is_zero());
    }

    #[test]
    fn settlement_boundaries() {
        assert!(!is_settlement_tick(TickId(0), 8));
        assert!(!is_settlement_tick(TickId(7), 8));
        assert!(is_settlement_tick(TickId(8), 8));
        assert!(!is_settlement_tick(TickId(9), 8));
        assert!(is_settlement_tick(TickId(16), 8));
        assert!(!is_settlement_tick(TickId(16), 0));
    }
}
