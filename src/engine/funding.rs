//! Funding settlement at interval boundaries.

use super::core::ExchangeEngine;
use super::results::FundingOutcome;
use crate::events::{EventPayload, FundingSettledEvent, FundingSkippedEvent};
use crate::funding::{self, FundingError, FundingRecord};
use crate::types::{AccountKind, Price, TickId, Timestamp, UserId};
use rust_decimal::Decimal;

impl ExchangeEngine {
    /// Exchange funding between futures longs and shorts if this tick is a
    /// settlement boundary. The whole step is atomic: the plan is computed
    /// for every open position first and applied only when the rate is
    /// resolvable, so a missing rate mutates nothing.
    pub(super) fn settle_funding(
        &mut self,
        tick: TickId,
        ts: Timestamp,
        mark: Price,
    ) -> FundingOutcome {
        let interval = self.config.settings.funding_interval_ticks;
        if !funding::is_settlement_tick(tick, interval) {
            return FundingOutcome::NotDue;
        }

        let rate = match self.feed.current().funding_rate {
            Some(rate) => rate,
            None if self.config.settings.funding_rate_required => {
                let error = FundingError::FundingDataMissing(tick);
                tracing::warn!(tick = tick.0, "funding settlement aborted: no rate published");
                self.emit(
                    tick,
                    ts,
                    EventPayload::FundingSkipped(FundingSkippedEvent {
                        reason: error.to_string(),
                    }),
                );
                return FundingOutcome::Failed(error);
            }
            None => Decimal::ZERO,
        };

        let plan: Vec<(UserId, FundingRecord)> = self
            .users
            .values()
            .filter_map(|user| {
                let account = user.account(AccountKind::Futures)?;
                let position = account.position.as_ref()?;
                let payment = funding::funding_payment(position.size, mark, rate);
                Some((
                    user.id,
                    FundingRecord {
                        user: user.id,
                        account: AccountKind::Futures,
                        position_size: position.size,
                        payment,
                    },
                ))
            })
            .collect();

        for (user_id, record) in &plan {
            if let Some(account) = self.account_mut(*user_id, AccountKind::Futures) {
                account.ledger.apply_funding(record.payment, tick);
            }
            self.emit(
                tick,
                ts,
                EventPayload::FundingSettled(FundingSettledEvent {
                    user: *user_id,
                    account: AccountKind::Futures,
                    funding_rate: rate,
                    payment: record.payment,
                    position_size: record.position_size,
                }),
            );
        }

        tracing::debug!(
            tick = tick.0,
            %rate,
            positions = plan.len(),
            "funding settled"
        );

        FundingOutcome::Settled {
            rate,
            records: plan.into_iter().map(|(_, record)| record).collect(),
        }
    }
}
