// 8.0: every state change produces an event. used for audit trails and for
// notifying external collaborators. the EventPayload enum lists all event
// types the engine emits.

use crate::engine::OrderRejection;
use crate::types::{
    AccountKind, Money, Price, Side, SignedSize, TickId, Timestamp, TradeId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub tick: TickId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // order events
    Fill(FillEvent),
    OrderRejected(OrderRejectedEvent),

    // position events
    PositionOpened(PositionOpenedEvent),
    PositionUpdated(PositionUpdatedEvent),
    PositionClosed(PositionClosedEvent),

    // risk events
    Liquidation(LiquidationEvent),
    InterestAccrued(InterestAccruedEvent),

    // settlement events
    FundingSettled(FundingSettledEvent),
    FundingSkipped(FundingSkippedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub trade_id: TradeId,
    pub user: UserId,
    pub account: AccountKind,
    pub side: Side,
    pub size: Decimal,
    pub price: Price,
    pub fee: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRejectedEvent {
    pub user: UserId,
    pub account: AccountKind,
    pub reason: OrderRejection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub user: UserId,
    pub account: AccountKind,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Price,
    pub leverage: Decimal,
    pub margin: Money,
    pub liquidation_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdatedEvent {
    pub user: UserId,
    pub account: AccountKind,
    pub old_size: SignedSize,
    pub new_size: SignedSize,
    pub old_entry_price: Price,
    pub new_entry_price: Price,
    pub liquidation_price: Price,
    pub realized_pnl: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub user: UserId,
    pub account: AccountKind,
    pub exit_price: Price,
    pub realized_pnl: Money,
    pub margin_returned: Money,
    pub reason: CloseReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Trader,
    Flip,
    Liquidation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub user: UserId,
    pub account: AccountKind,
    pub liquidated_size: SignedSize,
    pub liquidation_price: Price,
    pub fee: Money,
    pub bad_debt: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestAccruedEvent {
    pub user: UserId,
    pub account: AccountKind,
    pub amount: Money,
    pub borrowed: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSettledEvent {
    pub user: UserId,
    pub account: AccountKind,
    pub funding_rate: Decimal,
    pub payment: Money,
    pub position_size: SignedSize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSkippedEvent {
    pub reason: String,
}
