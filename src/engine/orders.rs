//! Order intake and execution.
//!
//! Every order is validated against a snapshot of the account before any
//! ledger field moves: size truncation, leverage bound, then the full cash
//! requirement. Only when every check passes does the fill commit, so a
//! rejected order leaves equity bit-identical.

use super::core::ExchangeEngine;
use super::results::{FillReport, OrderOutcome, OrderRejection};
use crate::events::{
    CloseReason, EventPayload, FillEvent, PositionClosedEvent, PositionOpenedEvent,
    PositionUpdatedEvent,
};
use crate::ledger::LedgerEntryKind;
use crate::margin;
use crate::position::Position;
use crate::types::{
    AccountKind, Leverage, Money, Price, Side, SignedSize, TickId, Timestamp, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How much to trade: a fixed quantity, or everything the account can carry
/// (free cash for opens and buys, full holdings or position for exits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeSpec {
    Exact(Decimal),
    AllIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderIntent {
    Open {
        side: Side,
        size: SizeSpec,
        leverage: Leverage,
    },
    Close {
        /// None closes the whole position (or sells all spot holdings).
        size: Option<Decimal>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user: UserId,
    pub account: AccountKind,
    pub intent: OrderIntent,
}

impl OrderRequest {
    pub fn open(user: UserId, account: AccountKind, side: Side, size: Decimal, leverage: Leverage) -> Self {
        Self {
            user,
            account,
            intent: OrderIntent::Open {
                side,
                size: SizeSpec::Exact(size),
                leverage,
            },
        }
    }

    pub fn open_all_in(user: UserId, account: AccountKind, side: Side, leverage: Leverage) -> Self {
        Self {
            user,
            account,
            intent: OrderIntent::Open {
                side,
                size: SizeSpec::AllIn,
                leverage,
            },
        }
    }

    pub fn close(user: UserId, account: AccountKind) -> Self {
        Self {
            user,
            account,
            intent: OrderIntent::Close { size: None },
        }
    }

    pub fn close_partial(user: UserId, account: AccountKind, size: Decimal) -> Self {
        Self {
            user,
            account,
            intent: OrderIntent::Close { size: Some(size) },
        }
    }
}

impl ExchangeEngine {
    pub(super) fn execute_order(
        &mut self,
        req: &OrderRequest,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> OrderOutcome {
        let opened = self
            .users
            .get(&req.user)
            .map(|u| u.account(req.account).is_some())
            .unwrap_or(false);
        if !opened {
            return OrderOutcome::Rejected(OrderRejection::AccountNotOpen { kind: req.account });
        }

        let outcome = match req.account {
            AccountKind::Spot => self.execute_spot(req, tick, ts, mark),
            AccountKind::Margin | AccountKind::Futures => {
                self.execute_leveraged(req, tick, ts, mark)
            }
        };

        if let OrderOutcome::Rejected(reason) = &outcome {
            tracing::debug!(user = req.user.0, account = %req.account, %reason, "order rejected");
            self.emit_rejection(req.user, req.account, reason.clone(), tick, ts);
        }
        outcome
    }

    // spot: physically settled, long only, 1x. a buy spends cash for
    // holdings, a sell turns holdings back into cash. both settle instantly.
    fn execute_spot(
        &mut self,
        req: &OrderRequest,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> OrderOutcome {
        match &req.intent {
            OrderIntent::Open { side, size, leverage } => {
                if *leverage != Leverage::ONE {
                    return OrderOutcome::Rejected(OrderRejection::LeverageExceeded {
                        requested: *leverage,
                        bound: Leverage::ONE,
                    });
                }
                match side {
                    Side::Long => self.spot_buy(req.user, *size, tick, ts, mark),
                    Side::Short => self.spot_sell(req.user, Some(*size), tick, ts, mark),
                }
            }
            OrderIntent::Close { size } => {
                let sell_size = size.map(SizeSpec::Exact);
                self.spot_sell(req.user, sell_size, tick, ts, mark)
            }
        }
    }

    fn spot_buy(
        &mut self,
        user: UserId,
        size: SizeSpec,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> OrderOutcome {
        let step = self.config.settings.qty_step;
        let rate = self.fees.schedule().spot_rate;

        let fee;
        let qty;
        {
            let Some(account) = self.account_mut(user, AccountKind::Spot) else {
                return OrderOutcome::Rejected(OrderRejection::AccountNotOpen {
                    kind: AccountKind::Spot,
                });
            };

            let raw_qty = match size {
                SizeSpec::Exact(d) => d,
                SizeSpec::AllIn => {
                    account.ledger.cash().value() / (mark.value() * (Decimal::ONE + rate))
                }
            };
            qty = margin::truncate_to_step(raw_qty, step);
            if qty <= Decimal::ZERO {
                return OrderOutcome::Rejected(OrderRejection::InvalidOrderSize { size: qty });
            }

            let cost = Money::new(qty * mark.value());
            fee = cost.mul(rate);
            let required = cost.add(fee);
            if account.ledger.cash() < required {
                return OrderOutcome::Rejected(OrderRejection::InsufficientFunds {
                    required,
                    available: account.ledger.cash(),
                });
            }

            if account
                .ledger
                .debit(cost, LedgerEntryKind::Fill, tick)
                .is_err()
                || account
                    .ledger
                    .charge_fee(fee, LedgerEntryKind::TradeFee, tick)
                    .is_err()
            {
                return OrderOutcome::Rejected(OrderRejection::InsufficientFunds {
                    required,
                    available: account.ledger.cash(),
                });
            }
            account.holdings += qty;
        }

        self.fill(user, AccountKind::Spot, Side::Long, qty, mark, fee, Money::zero(), tick, ts, false)
    }

    fn spot_sell(
        &mut self,
        user: UserId,
        size: Option<SizeSpec>,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> OrderOutcome {
        let step = self.config.settings.qty_step;
        let rate = self.fees.schedule().spot_rate;

        let fee;
        let qty;
        {
            let Some(account) = self.account_mut(user, AccountKind::Spot) else {
                return OrderOutcome::Rejected(OrderRejection::AccountNotOpen {
                    kind: AccountKind::Spot,
                });
            };

            let raw_qty = match size {
                Some(SizeSpec::Exact(d)) => d,
                Some(SizeSpec::AllIn) | None => account.holdings,
            };
            qty = margin::truncate_to_step(raw_qty, step);
            if qty <= Decimal::ZERO {
                return OrderOutcome::Rejected(OrderRejection::InvalidOrderSize { size: qty });
            }

            if account.holdings < qty {
                return OrderOutcome::Rejected(OrderRejection::InsufficientFunds {
                    required: Money::new(qty * mark.value()),
                    available: Money::new(account.holdings * mark.value()),
                });
            }

            let proceeds = Money::new(qty * mark.value());
            fee = proceeds.mul(rate);
            account.ledger.credit(proceeds, LedgerEntryKind::Fill, tick);
            // proceeds always cover the fee since the rate is below one
            if account
                .ledger
                .charge_fee(fee, LedgerEntryKind::TradeFee, tick)
                .is_err()
            {
                return OrderOutcome::Rejected(OrderRejection::InsufficientFunds {
                    required: fee,
                    available: account.ledger.cash(),
                });
            }
            account.holdings -= qty;
        }

        self.fill(user, AccountKind::Spot, Side::Short, qty, mark, fee, Money::zero(), tick, ts, false)
    }

    // margin/futures: a single position per account. same-direction opens
    // average in, opposite-direction orders reduce, close, or flip.
    fn execute_leveraged(
        &mut self,
        req: &OrderRequest,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> OrderOutcome {
        let kind = req.account;
        match &req.intent {
            OrderIntent::Open { side, size, leverage } => {
                let bound = match self.account_ref(req.user, kind) {
                    Some(account) => account.leverage_bound,
                    None => {
                        return OrderOutcome::Rejected(OrderRejection::AccountNotOpen { kind })
                    }
                };
                if margin::validate_leverage(*leverage, bound).is_err() {
                    return OrderOutcome::Rejected(OrderRejection::LeverageExceeded {
                        requested: *leverage,
                        bound,
                    });
                }

                let existing = self
                    .account_ref(req.user, kind)
                    .and_then(|a| a.position.clone());
                match existing {
                    None => self.open_position(req.user, kind, *side, *size, *leverage, tick, ts, mark),
                    Some(pos) if pos.side() == *side => {
                        self.increase_position(req.user, kind, pos, *size, tick, ts, mark)
                    }
                    Some(pos) => {
                        self.offset_position(req.user, kind, pos, *side, *size, *leverage, tick, ts, mark)
                    }
                }
            }
            OrderIntent::Close { size } => {
                let Some(pos) = self
                    .account_ref(req.user, kind)
                    .and_then(|a| a.position.clone())
                else {
                    return OrderOutcome::Rejected(OrderRejection::InvalidOrderSize {
                        size: Decimal::ZERO,
                    });
                };
                let qty = size.unwrap_or_else(|| pos.size.abs());
                self.reduce_position(req.user, kind, pos, qty, CloseReason::Trader, tick, ts, mark)
            }
        }
    }

    fn open_position(
        &mut self,
        user: UserId,
        kind: AccountKind,
        side: Side,
        size: SizeSpec,
        leverage: Leverage,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> OrderOutcome {
        let step = self.config.settings.qty_step;
        let mm_ratio = self.config.settings.maintenance_margin_ratio;
        let rate = self.fees.schedule().rate(kind);

        let qty;
        let fee;
        let event;
        {
            let Some(account) = self.account_mut(user, kind) else {
                return OrderOutcome::Rejected(OrderRejection::AccountNotOpen { kind });
            };

            let raw_qty = match size {
                SizeSpec::Exact(d) => d,
                SizeSpec::AllIn => {
                    margin::max_open_qty(account.ledger.cash(), mark, leverage, rate)
                }
            };
            qty = margin::truncate_to_step(raw_qty, step);
            if qty <= Decimal::ZERO {
                return OrderOutcome::Rejected(OrderRejection::InvalidOrderSize { size: qty });
            }

            let notional = margin::notional(qty, mark);
            let margin_req = margin::required_margin(qty, mark, leverage);
            fee = notional.mul(rate);
            let required = margin_req.add(fee);
            if account.ledger.cash() < required {
                return OrderOutcome::Rejected(OrderRejection::InsufficientFunds {
                    required,
                    available: account.ledger.cash(),
                });
            }

            if account
                .ledger
                .debit(margin_req, LedgerEntryKind::MarginReserved, tick)
                .is_err()
                || account
                    .ledger
                    .charge_fee(fee, LedgerEntryKind::TradeFee, tick)
                    .is_err()
            {
                return OrderOutcome::Rejected(OrderRejection::InsufficientFunds {
                    required,
                    available: account.ledger.cash(),
                });
            }

            // margin accounts fund the rest of the notional with borrow;
            // futures exposure is synthetic and borrows nothing
            if kind == AccountKind::Margin {
                account.ledger.borrow(notional.sub(margin_req), tick);
            }

            let position = Position::new(
                SignedSize::from_side(side, qty),
                mark,
                leverage,
                margin_req,
                mm_ratio,
                tick,
            );
            event = EventPayload::PositionOpened(PositionOpenedEvent {
                user,
                account: kind,
                side,
                size: qty,
                entry_price: mark,
                leverage: leverage.as_decimal(),
                margin: margin_req,
                liquidation_price: position.liquidation_price,
            });
            account.position = Some(position);
        }

        self.emit(tick, ts, event);
        self.fill(user, kind, side, qty, mark, fee, Money::zero(), tick, ts, false)
    }

    fn increase_position(
        &mut self,
        user: UserId,
        kind: AccountKind,
        pos: Position,
        size: SizeSpec,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> OrderOutcome {
        let step = self.config.settings.qty_step;
        let mm_ratio = self.config.settings.maintenance_margin_ratio;
        let rate = self.fees.schedule().rate(kind);
        let side = pos.side();

        let qty;
        let fee;
        let event;
        {
            let Some(account) = self.account_mut(user, kind) else {
                return OrderOutcome::Rejected(OrderRejection::AccountNotOpen { kind });
            };

            let raw_qty = match size {
                SizeSpec::Exact(d) => d,
                SizeSpec::AllIn => {
                    margin::max_open_qty(account.ledger.cash(), mark, pos.leverage, rate)
                }
            };
            qty = margin::truncate_to_step(raw_qty, step);
            if qty <= Decimal::ZERO {
                return OrderOutcome::Rejected(OrderRejection::InvalidOrderSize { size: qty });
            }

            // additions are margined at the leverage the position opened with
            let notional = margin::notional(qty, mark);
            let margin_req = margin::required_margin(qty, mark, pos.leverage);
            fee = notional.mul(rate);
            let required = margin_req.add(fee);
            if account.ledger.cash() < required {
                return OrderOutcome::Rejected(OrderRejection::InsufficientFunds {
                    required,
                    available: account.ledger.cash(),
                });
            }

            if account
                .ledger
                .debit(margin_req, LedgerEntryKind::MarginReserved, tick)
                .is_err()
                || account
                    .ledger
                    .charge_fee(fee, LedgerEntryKind::TradeFee, tick)
                    .is_err()
            {
                return OrderOutcome::Rejected(OrderRejection::InsufficientFunds {
                    required,
                    available: account.ledger.cash(),
                });
            }

            if kind == AccountKind::Margin {
                account.ledger.borrow(notional.sub(margin_req), tick);
            }

            let updated = pos.increase(qty, mark, margin_req, mm_ratio, tick);
            event = EventPayload::PositionUpdated(PositionUpdatedEvent {
                user,
                account: kind,
                old_size: pos.size,
                new_size: updated.size,
                old_entry_price: pos.entry_price,
                new_entry_price: updated.entry_price,
                liquidation_price: updated.liquidation_price,
                realized_pnl: Money::zero(),
            });
            account.position = Some(updated);
        }

        self.emit(tick, ts, event);
        self.fill(user, kind, side, qty, mark, fee, Money::zero(), tick, ts, false)
    }

    /// Opposite-side order against an open position: reduce up to the
    /// position size, and re-open any remainder on the new side.
    fn offset_position(
        &mut self,
        user: UserId,
        kind: AccountKind,
        pos: Position,
        side: Side,
        size: SizeSpec,
        leverage: Leverage,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> OrderOutcome {
        let step = self.config.settings.qty_step;
        let raw_qty = match size {
            SizeSpec::Exact(d) => d,
            // all-in against an open position means get flat
            SizeSpec::AllIn => pos.size.abs(),
        };
        let qty = margin::truncate_to_step(raw_qty, step);
        if qty <= Decimal::ZERO {
            return OrderOutcome::Rejected(OrderRejection::InvalidOrderSize { size: qty });
        }

        if qty <= pos.size.abs() {
            return self.reduce_position(user, kind, pos, qty, CloseReason::Trader, tick, ts, mark);
        }
        self.flip_position(user, kind, pos, side, qty, leverage, tick, ts, mark)
    }

    fn reduce_position(
        &mut self,
        user: UserId,
        kind: AccountKind,
        pos: Position,
        qty: Decimal,
        reason: CloseReason,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> OrderOutcome {
        let step = self.config.settings.qty_step;
        let rate = self.fees.schedule().rate(kind);
        let qty = margin::truncate_to_step(qty, step).min(pos.size.abs());
        if qty <= Decimal::ZERO {
            return OrderOutcome::Rejected(OrderRejection::InvalidOrderSize { size: qty });
        }

        let update = pos.reduce(qty, mark, tick);
        let fee = margin::notional(qty, mark).mul(rate);
        let fraction = qty / pos.size.abs();

        let event;
        {
            let Some(account) = self.account_mut(user, kind) else {
                return OrderOutcome::Rejected(OrderRejection::AccountNotOpen { kind });
            };

            let repay = account.ledger.borrowed().mul(fraction);
            account.ledger.settle_close(
                update.margin_released,
                update.realized_pnl,
                fee,
                LedgerEntryKind::TradeFee,
                tick,
            );
            let _ = account.ledger.repay(repay, tick);

            event = match &update.remaining {
                Some(remaining) => EventPayload::PositionUpdated(PositionUpdatedEvent {
                    user,
                    account: kind,
                    old_size: pos.size,
                    new_size: remaining.size,
                    old_entry_price: pos.entry_price,
                    new_entry_price: remaining.entry_price,
                    liquidation_price: remaining.liquidation_price,
                    realized_pnl: update.realized_pnl,
                }),
                None => EventPayload::PositionClosed(PositionClosedEvent {
                    user,
                    account: kind,
                    exit_price: mark,
                    realized_pnl: update.realized_pnl,
                    margin_returned: update.margin_released,
                    reason,
                }),
            };
            account.position = update.remaining.clone();
        }

        self.emit(tick, ts, event);
        self.fill(
            user,
            kind,
            pos.side().opposite(),
            qty,
            mark,
            fee,
            update.realized_pnl,
            tick,
            ts,
            false,
        )
    }

    fn flip_position(
        &mut self,
        user: UserId,
        kind: AccountKind,
        pos: Position,
        side: Side,
        qty: Decimal,
        leverage: Leverage,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> OrderOutcome {
        let mm_ratio = self.config.settings.maintenance_margin_ratio;
        let rate = self.fees.schedule().rate(kind);

        let close_qty = pos.size.abs();
        let open_qty = qty - close_qty;

        // both legs are checked against the post-close balance before either
        // commits; an unaffordable flip rejects the whole order
        let exit_fee = margin::notional(close_qty, mark).mul(rate);
        let realized_pnl = pos.unrealized_pnl(mark);
        let open_notional = margin::notional(open_qty, mark);
        let open_margin = margin::required_margin(open_qty, mark, leverage);
        let open_fee = open_notional.mul(rate);

        let events;
        {
            let Some(account) = self.account_mut(user, kind) else {
                return OrderOutcome::Rejected(OrderRejection::AccountNotOpen { kind });
            };

            let close_net = pos
                .margin
                .add(realized_pnl)
                .sub(exit_fee)
                .sub(account.ledger.interest_owed())
                .max(Money::zero());
            let cash_after_close = account.ledger.cash().add(close_net);
            let required = open_margin.add(open_fee);
            if cash_after_close < required {
                return OrderOutcome::Rejected(OrderRejection::InsufficientFunds {
                    required,
                    available: cash_after_close,
                });
            }

            account.ledger.settle_close(
                pos.margin,
                realized_pnl,
                exit_fee,
                LedgerEntryKind::TradeFee,
                tick,
            );
            let borrowed = account.ledger.borrowed();
            let _ = account.ledger.repay(borrowed, tick);

            if account
                .ledger
                .debit(open_margin, LedgerEntryKind::MarginReserved, tick)
                .is_err()
                || account
                    .ledger
                    .charge_fee(open_fee, LedgerEntryKind::TradeFee, tick)
                    .is_err()
            {
                return OrderOutcome::Rejected(OrderRejection::InsufficientFunds {
                    required,
                    available: account.ledger.cash(),
                });
            }
            if kind == AccountKind::Margin {
                account.ledger.borrow(open_notional.sub(open_margin), tick);
            }

            let new_position = Position::new(
                SignedSize::from_side(side, open_qty),
                mark,
                leverage,
                open_margin,
                mm_ratio,
                tick,
            );
            events = [
                EventPayload::PositionClosed(PositionClosedEvent {
                    user,
                    account: kind,
                    exit_price: mark,
                    realized_pnl,
                    margin_returned: pos.margin,
                    reason: CloseReason::Flip,
                }),
                EventPayload::PositionOpened(PositionOpenedEvent {
                    user,
                    account: kind,
                    side,
                    size: open_qty,
                    entry_price: mark,
                    leverage: leverage.as_decimal(),
                    margin: open_margin,
                    liquidation_price: new_position.liquidation_price,
                }),
            ];
            account.position = Some(new_position);
        }

        for event in events {
            self.emit(tick, ts, event);
        }
        self.fill(
            user,
            kind,
            side,
            qty,
            mark,
            exit_fee.add(open_fee),
            realized_pnl,
            tick,
            ts,
            false,
        )
    }

    /// Append the trade record, emit the fill event, build the report.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn fill(
        &mut self,
        user: UserId,
        account: AccountKind,
        side: Side,
        size: Decimal,
        price: Price,
        fee: Money,
        realized_pnl: Money,
        tick: TickId,
        ts: Timestamp,
        liquidation: bool,
    ) -> OrderOutcome {
        let trade_id = self.record_trade(user, account, side, size, price, fee, tick, ts, liquidation);
        self.emit(
            tick,
            ts,
            EventPayload::Fill(FillEvent {
                trade_id,
                user,
                account,
                side,
                size,
                price,
                fee,
            }),
        );
        tracing::debug!(
            user = user.0,
            account = %account,
            %side,
            %size,
            price = %price,
            "order filled"
        );
        OrderOutcome::Filled(FillReport {
            trade_id,
            side,
            size,
            price,
            fee,
            realized_pnl,
        })
    }
}
