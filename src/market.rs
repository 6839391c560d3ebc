// 5.0: the market feed. an ordered series of OHLCV ticks consumed one at a
// time; the mark price used for every valuation and liquidation check within
// a tick is that tick's close. timestamps must be strictly increasing, which
// is checked once at construction: a disordered feed breaks the determinism
// contract and is the one condition the engine refuses to run under.

use crate::types::{Price, TickId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTick {
    pub timestamp: Timestamp,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Decimal,
    /// Funding rate published with this tick, if the data source carries one.
    pub funding_rate: Option<Decimal>,
}

impl MarketTick {
    /// Flat bar at `price`, handy for tests and synthetic series.
    pub fn flat(timestamp: Timestamp, price: Price) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            funding_rate: None,
        }
    }

    pub fn mark_price(&self) -> Price {
        self.close
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    #[error("market feed is empty")]
    Empty,

    #[error("non-monotonic timestamps at index {index}: {prev:?} then {next:?}")]
    NonMonotonicTimestamp {
        index: usize,
        prev: Timestamp,
        next: Timestamp,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketFeed {
    ticks: Vec<MarketTick>,
    cursor: usize,
}

impl MarketFeed {
    pub fn new(ticks: Vec<MarketTick>) -> Result<Self, FeedError> {
        if ticks.is_empty() {
            return Err(FeedError::Empty);
        }
        for (i, pair) in ticks.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(FeedError::NonMonotonicTimestamp {
                    index: i + 1,
                    prev: pair[0].timestamp,
                    next: pair[1].timestamp,
                });
            }
        }
        Ok(Self { ticks, cursor: 0 })
    }

    pub fn current(&self) -> &MarketTick {
        &self.ticks[self.cursor]
    }

    pub fn previous(&self) -> Option<&MarketTick> {
        self.cursor.checked_sub(1).map(|i| &self.ticks[i])
    }

    pub fn tick_id(&self) -> TickId {
        TickId(self.cursor as u64)
    }

    pub fn mark_price(&self) -> Price {
        self.current().mark_price()
    }

    /// True once the cursor sits on the final tick.
    pub fn is_last(&self) -> bool {
        self.cursor + 1 >= self.ticks.len()
    }

    /// Move to the next tick. Returns false when already on the last one.
    pub fn advance(&mut self) -> bool {
        if self.is_last() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(ms: i64, close: Decimal) -> MarketTick {
        MarketTick::flat(Timestamp::from_millis(ms), Price::new_unchecked(close))
    }

    #[test]
    fn rejects_empty_feed() {
        assert!(matches!(MarketFeed::new(vec![]), Err(FeedError::Empty)));
    }

    #[test]
    fn rejects_non_monotonic_timestamps() {
        let err = MarketFeed::new(vec![tick(1000, dec!(100)), tick(1000, dec!(101))]);
        assert!(matches!(err, Err(FeedError::NonMonotonicTimestamp { index: 1, .. })));

        let err = MarketFeed::new(vec![tick(2000, dec!(100)), tick(1000, dec!(101))]);
        assert!(matches!(err, Err(FeedError::NonMonotonicTimestamp { .. })));
    }

    #[test]
    fn cursor_walks_the_series() {
        let mut feed =
            MarketFeed::new(vec![tick(0, dec!(100)), tick(1000, dec!(101)), tick(2000, dec!(99))])
                .unwrap();

        assert_eq!(feed.tick_id(), TickId(0));
        assert_eq!(feed.mark_price().value(), dec!(100));
        assert!(!feed.is_last());

        assert!(feed.advance());
        assert_eq!(feed.mark_price().value(), dec!(101));
        assert_eq!(feed.previous().unwrap().close.value(), dec!(100));

        assert!(feed.advance());
        assert!(feed.is_last());
        assert!(!feed.advance());
        assert_eq!(feed.tick_id(), TickId(2));

        feed.reset();
        assert_eq!(feed.tick_id(), TickId(0));
    }
}
