// 9.0.2: result types, per-order rejections, and fatal errors for the engine.

use crate::config::ConfigError;
use crate::funding::{FundingError, FundingRecord};
use crate::market::FeedError;
use crate::types::{
    AccountKind, Leverage, Money, Price, Side, SignedSize, TickId, Timestamp, TradeId, UserId,
};
use crate::valuation::EquitySnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why a single order was turned away. A rejection leaves every ledger
/// untouched for that order; it is an answer, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum OrderRejection {
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },

    #[error("leverage {requested} outside account bound {bound}")]
    LeverageExceeded { requested: Leverage, bound: Leverage },

    #[error("order size {size} is not positive after step truncation")]
    InvalidOrderSize { size: Decimal },

    #[error("a second order for the same account in one tick")]
    DuplicateOrderInTick,

    #[error("user never opened a {kind} account")]
    AccountNotOpen { kind: AccountKind },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillReport {
    pub trade_id: TradeId,
    pub side: Side,
    pub size: Decimal,
    pub price: Price,
    pub fee: Money,
    /// PnL realized by this fill before fees; zero for opens and spot fills.
    pub realized_pnl: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderOutcome {
    Filled(FillReport),
    Rejected(OrderRejection),
}

impl OrderOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderOutcome::Filled(_))
    }

    pub fn rejection(&self) -> Option<&OrderRejection> {
        match self {
            OrderOutcome::Rejected(r) => Some(r),
            OrderOutcome::Filled(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReport {
    pub user: UserId,
    pub account: AccountKind,
    pub outcome: OrderOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationReport {
    pub user: UserId,
    pub account: AccountKind,
    pub position_size: SignedSize,
    pub liquidation_price: Price,
    pub fee: Money,
    pub realized_pnl: Money,
    pub bad_debt: Money,
}

/// What happened to funding this tick. A missed settlement is reported, never
/// silently skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FundingOutcome {
    NotDue,
    Settled {
        rate: Decimal,
        records: Vec<FundingRecord>,
    },
    Failed(FundingError),
}

/// Everything one tick produced, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub tick: TickId,
    pub timestamp: Timestamp,
    pub mark_price: Price,
    /// Per-order outcomes in deterministic processing order; duplicate
    /// rejections follow at the end.
    pub orders: Vec<OrderReport>,
    pub liquidations: Vec<LiquidationReport>,
    pub funding: FundingOutcome,
    pub equities: EquitySnapshot,
    /// Equity of the designated base account after this tick.
    pub base_equity: Money,
    /// Tick-over-tick simple return of the base account's equity.
    pub base_return: Decimal,
    /// True when the tick series is exhausted; further steps error.
    pub done: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("market feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error("tick series exhausted; reset to run again")]
    FeedExhausted,
}
