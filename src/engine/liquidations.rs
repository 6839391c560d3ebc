//! The per-tick liquidation sweep.
//!
//! After orders and funding, every open margin and futures position is
//! checked against the tick's mark price in a fixed order: ascending user
//! id, then account kind. A breached position is closed in full at the mark
//! — unconditionally and without retry. The mark price is authoritative, so
//! closure always succeeds; the only question is how much of the margin
//! survives.

use super::core::ExchangeEngine;
use super::results::LiquidationReport;
use crate::events::{
    CloseReason, EventPayload, LiquidationEvent, PositionClosedEvent,
};
use crate::ledger::LedgerEntryKind;
use crate::margin;
use crate::types::{AccountKind, Price, TickId, Timestamp, UserId};

impl ExchangeEngine {
    pub(super) fn sweep_liquidations(
        &mut self,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> Vec<LiquidationReport> {
        // detection pass over an immutable snapshot, in sweep order
        let mut breached: Vec<(UserId, AccountKind)> = Vec::new();
        for user in self.users.values() {
            for kind in [AccountKind::Margin, AccountKind::Futures] {
                let Some(account) = user.account(kind) else { continue };
                let Some(position) = &account.position else { continue };
                if margin::maintenance_breached(position.side(), position.liquidation_price, mark)
                {
                    breached.push((user.id, kind));
                }
            }
        }

        let mut reports = Vec::with_capacity(breached.len());
        for (user_id, kind) in breached {
            if let Some(report) = self.liquidate(user_id, kind, tick, ts, mark) {
                reports.push(report);
            }
        }
        reports
    }

    fn liquidate(
        &mut self,
        user: UserId,
        kind: AccountKind,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> Option<LiquidationReport> {
        let fee_calc = self.fees.clone();

        let position;
        let realized_pnl;
        let fee;
        let bad_debt;
        {
            let account = self.account_mut(user, kind)?;
            position = account.position.take()?;

            realized_pnl = position.unrealized_pnl(mark);
            fee = fee_calc.liquidation_fee(position.notional(mark));

            let settlement = account.ledger.settle_close(
                position.margin,
                realized_pnl,
                fee,
                LedgerEntryKind::LiquidationFee,
                tick,
            );
            bad_debt = settlement.shortfall;

            let borrowed = account.ledger.borrowed();
            let _ = account.ledger.repay(borrowed, tick);
        }

        tracing::info!(
            user = user.0,
            account = %kind,
            size = %position.size,
            price = %mark,
            %bad_debt,
            "position liquidated"
        );

        self.emit(
            tick,
            ts,
            EventPayload::PositionClosed(PositionClosedEvent {
                user,
                account: kind,
                exit_price: mark,
                realized_pnl,
                margin_returned: position.margin,
                reason: CloseReason::Liquidation,
            }),
        );
        self.emit(
            tick,
            ts,
            EventPayload::Liquidation(LiquidationEvent {
                user,
                account: kind,
                liquidated_size: position.size,
                liquidation_price: mark,
                fee,
                bad_debt,
            }),
        );
        self.fill(
            user,
            kind,
            position.side().opposite(),
            position.size.abs(),
            mark,
            fee,
            realized_pnl,
            tick,
            ts,
            true,
        );

        Some(LiquidationReport {
            user,
            account: kind,
            position_size: position.size,
            liquidation_price: mark,
            fee,
            realized_pnl,
            bad_debt,
        })
    }
}
