// 9.1: the orchestrator. holds every user's accounts, the market feed, the
// trade history and the audit log, and advances the whole world one tick at
// a time.
//
// one step is one atomic unit of work: interest accrual, then the tick's
// orders in ascending (user, account) order, then funding if the tick is a
// settlement boundary, then the liquidation sweep, then valuation. nothing
// inside a tick blocks or suspends, and identical inputs always produce
// identical outputs.

use super::orders::OrderRequest;
use super::results::{
    EngineError, OrderOutcome, OrderRejection, OrderReport, StepResult,
};
use crate::account::{Account, UserState};
use crate::config::SimulationConfig;
use crate::events::{
    Event, EventId, EventPayload, InterestAccruedEvent, OrderRejectedEvent,
};
use crate::fees::FeeCalculator;
use crate::market::MarketFeed;
use crate::trade::Trade;
use crate::types::{
    AccountKind, Money, Price, Side, TickId, Timestamp, TradeId, UserId,
};
use crate::valuation::{self, EquitySnapshot};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub struct ExchangeEngine {
    pub(super) config: SimulationConfig,
    pub(super) fees: FeeCalculator,
    pub(super) users: BTreeMap<UserId, UserState>,
    pub(super) feed: MarketFeed,
    pub(super) trades: Vec<Trade>,
    pub(super) events: Vec<Event>,
    pub(super) next_trade_id: u64,
    pub(super) next_event_id: u64,
    pub(super) prev_base_equity: Money,
    pub(super) finished: bool,
}

impl ExchangeEngine {
    pub fn new(config: SimulationConfig, feed: MarketFeed) -> Result<Self, EngineError> {
        config.validate()?;

        let users = config
            .users
            .iter()
            .map(|(id, user_config)| {
                let accounts = user_config
                    .accounts
                    .iter()
                    .map(|(kind, account_config)| (*kind, Account::new(*kind, account_config)))
                    .collect();
                (*id, UserState::new(*id, accounts))
            })
            .collect();

        let fees = FeeCalculator::new(config.settings.fees.clone());
        let mut engine = Self {
            config,
            fees,
            users,
            feed,
            trades: Vec::new(),
            events: Vec::new(),
            next_trade_id: 1,
            next_event_id: 1,
            prev_base_equity: Money::zero(),
            finished: false,
        };
        engine.prev_base_equity = engine.base_equity();
        Ok(engine)
    }

    /// Reinitialize every ledger and position to the configured state and
    /// rewind the feed. Returns the initial equities.
    pub fn reset(&mut self) -> EquitySnapshot {
        for user in self.users.values_mut() {
            user.reset();
        }
        self.feed.reset();
        self.trades.clear();
        self.events.clear();
        self.next_trade_id = 1;
        self.next_event_id = 1;
        self.finished = false;
        self.prev_base_equity = self.base_equity();
        self.snapshot()
    }

    /// Advance one tick: apply this batch of orders at the current mark,
    /// settle funding and liquidations, and report everything that happened.
    /// At most one order per (user, account) is accepted per tick.
    pub fn step(&mut self, orders: &[OrderRequest]) -> Result<StepResult, EngineError> {
        if self.finished {
            return Err(EngineError::FeedExhausted);
        }

        let tick = self.feed.tick_id();
        let ts = self.feed.current().timestamp;
        let mark = self.feed.mark_price();

        // interest on borrow carried since the previous tick, before any of
        // this tick's activity changes the balance
        self.accrue_interest(tick, ts);

        // first order per (user, account) wins; the rest are duplicates
        let mut seen: BTreeSet<(UserId, AccountKind)> = BTreeSet::new();
        let mut accepted: Vec<&OrderRequest> = Vec::new();
        let mut duplicates: Vec<&OrderRequest> = Vec::new();
        for request in orders {
            if seen.insert((request.user, request.account)) {
                accepted.push(request);
            } else {
                duplicates.push(request);
            }
        }
        accepted.sort_by_key(|r| (r.user, r.account));

        let mut reports = Vec::with_capacity(orders.len());
        for request in accepted {
            let outcome = self.execute_order(request, tick, ts, mark);
            reports.push(OrderReport {
                user: request.user,
                account: request.account,
                outcome,
            });
        }
        for request in duplicates {
            let reason = OrderRejection::DuplicateOrderInTick;
            self.emit_rejection(request.user, request.account, reason.clone(), tick, ts);
            reports.push(OrderReport {
                user: request.user,
                account: request.account,
                outcome: OrderOutcome::Rejected(reason),
            });
        }

        let funding = self.settle_funding(tick, ts, mark);
        let liquidations = self.sweep_liquidations(tick, ts, mark);

        let equities = EquitySnapshot::capture(self.users.values(), mark);
        let base_equity = equities
            .account(self.config.base.user, self.config.base.kind)
            .unwrap_or_else(Money::zero);
        let base_return = valuation::tick_return(self.prev_base_equity, base_equity);
        self.prev_base_equity = base_equity;

        let done = !self.feed.advance();
        if done {
            self.finished = true;
        }

        Ok(StepResult {
            tick,
            timestamp: ts,
            mark_price: mark,
            orders: reports,
            liquidations,
            funding,
            equities,
            base_equity,
            base_return,
            done,
        })
    }

    /// Read-only equities at the current mark. Never mutates state.
    pub fn snapshot(&self) -> EquitySnapshot {
        EquitySnapshot::capture(self.users.values(), self.feed.mark_price())
    }

    pub fn base_equity(&self) -> Money {
        self.account_ref(self.config.base.user, self.config.base.kind)
            .map(|account| valuation::account_equity(account, self.feed.mark_price()))
            .unwrap_or_else(Money::zero)
    }

    fn accrue_interest(&mut self, tick: TickId, ts: Timestamp) {
        let Some(previous) = self.feed.previous().map(|t| t.timestamp) else {
            return;
        };
        let hours = previous.elapsed_hours(&ts);
        let rate = self.config.settings.borrow_rate_hourly;
        if hours.is_zero() || rate.is_zero() {
            return;
        }

        let mut events = Vec::new();
        for user in self.users.values_mut() {
            let Some(account) = user.accounts.get_mut(&AccountKind::Margin) else {
                continue;
            };
            if account.ledger.borrowed().is_zero() {
                continue;
            }
            let accrued = account.ledger.accrue_interest(rate, hours, tick);
            if !accrued.is_zero() {
                events.push(EventPayload::InterestAccrued(InterestAccruedEvent {
                    user: user.id,
                    account: AccountKind::Margin,
                    amount: accrued,
                    borrowed: account.ledger.borrowed(),
                }));
            }
        }
        for event in events {
            self.emit(tick, ts, event);
        }
    }

    pub fn user(&self, id: UserId) -> Result<&UserState, EngineError> {
        self.users.get(&id).ok_or(EngineError::UnknownUser(id))
    }

    pub fn users_iter(&self) -> impl Iterator<Item = &UserState> {
        self.users.values()
    }

    pub(super) fn account_ref(&self, user: UserId, kind: AccountKind) -> Option<&Account> {
        self.users.get(&user).and_then(|u| u.account(kind))
    }

    pub(super) fn account_mut(&mut self, user: UserId, kind: AccountKind) -> Option<&mut Account> {
        self.users.get_mut(&user).and_then(|u| u.account_mut(kind))
    }

    /// Full fill history, liquidations included. Append-only.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn mark_price(&self) -> Price {
        self.feed.mark_price()
    }

    pub fn tick_id(&self) -> TickId {
        self.feed.tick_id()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn record_trade(
        &mut self,
        user: UserId,
        account: AccountKind,
        side: Side,
        size: Decimal,
        price: Price,
        fee: Money,
        tick: TickId,
        timestamp: Timestamp,
        liquidation: bool,
    ) -> TradeId {
        let id = TradeId(self.next_trade_id);
        self.next_trade_id += 1;
        self.trades.push(Trade {
            id,
            user,
            account,
            side,
            size,
            price,
            fee,
            tick,
            timestamp,
            liquidation,
        });
        id
    }

    pub(super) fn emit_rejection(
        &mut self,
        user: UserId,
        account: AccountKind,
        reason: OrderRejection,
        tick: TickId,
        ts: Timestamp,
    ) {
        self.emit(
            tick,
            ts,
            EventPayload::OrderRejected(OrderRejectedEvent {
                user,
                account,
                reason,
            }),
        );
    }

    pub(super) fn emit(&mut self, tick: TickId, timestamp: Timestamp, payload: EventPayload) {
        let event = Event {
            id: EventId(self.next_event_id),
            tick,
            timestamp,
            payload,
        };
        self.next_event_id += 1;
        self.events.push(event);

        let cap = self.config.settings.max_events;
        if self.events.len() > cap {
            let drain = self.events.len() - cap;
            self.events.drain(0..drain);
        }
    }
}
