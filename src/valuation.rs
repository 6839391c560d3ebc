//! Equity (net asset value) per account and per user.
//!
//! Spot equity is cash plus holdings at the mark. Leveraged equity is cash
//! plus the margin parked in the position plus unrealized PnL, minus any
//! interest accrued on the borrow. The base account's equity trajectory is
//! tracked separately so callers get the tick-over-tick return directly.

use crate::account::{Account, UserState};
use crate::types::{AccountKind, Money, Price, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub fn account_equity(account: &Account, mark: Price) -> Money {
    let mut equity = account.ledger.cash();

    if account.kind == AccountKind::Spot {
        return equity.add(Money::new(account.holdings * mark.value()));
    }

    if let Some(position) = &account.position {
        equity = equity
            .add(position.margin)
            .add(position.unrealized_pnl(mark));
    }
    equity.sub(account.ledger.interest_owed())
}

pub fn user_equity(user: &UserState, mark: Price) -> Money {
    user.accounts
        .values()
        .map(|account| account_equity(account, mark))
        .sum()
}

/// Read-only per-account equity map, keyed (user, kind). Safe to hand to
/// logging collaborators; it borrows nothing from the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    accounts: BTreeMap<(UserId, AccountKind), Money>,
}

impl EquitySnapshot {
    pub fn capture<'a>(users: impl Iterator<Item = &'a UserState>, mark: Price) -> Self {
        let mut accounts = BTreeMap::new();
        for user in users {
            for (kind, account) in &user.accounts {
                accounts.insert((user.id, *kind), account_equity(account, mark));
            }
        }
        Self { accounts }
    }

    pub fn account(&self, user: UserId, kind: AccountKind) -> Option<Money> {
        self.accounts.get(&(user, kind)).copied()
    }

    pub fn user_total(&self, user: UserId) -> Money {
        self.accounts
            .iter()
            .filter(|((id, _), _)| *id == user)
            .map(|(_, equity)| equity)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(UserId, AccountKind), &Money)> {
        self.accounts.iter()
    }

    pub fn total(&self) -> Money {
        self.accounts.values().sum()
    }
}

/// Simple tick-over-tick return of an equity series.
pub fn tick_return(previous: Money, current: Money) -> Decimal {
    if previous.value().is_zero() {
        return Decimal::ZERO;
    }
    (current.value() - previous.value()) / previous.value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use crate::position::Position;
    use crate::types::{Leverage, SignedSize, TickId};
    use rust_decimal_macros::dec;

    fn account(kind: AccountKind, cash: Decimal, leverage: u32) -> Account {
        Account::new(
            kind,
            &AccountConfig {
                initial_cash: Money::new(cash),
                leverage: Leverage::new(leverage).unwrap(),
            },
        )
    }

    #[test]
    fn spot_equity_includes_holdings() {
        let mut acc = account(AccountKind::Spot, dec!(1000), 1);
        acc.holdings = dec!(2);
        let equity = account_equity(&acc, Price::new_unchecked(dec!(150)));
        assert_eq!(equity.value(), dec!(1300));
    }

    #[test]
    fn leveraged_equity_includes_margin_and_pnl() {
        let mut acc = account(AccountKind::Futures, dec!(800), 5);
        acc.position = Some(Position::new(
            SignedSize::new(dec!(1)),
            Price::new_unchecked(dec!(100)),
            Leverage::new(5).unwrap(),
            Money::new(dec!(20)),
            dec!(0.05),
            TickId(0),
        ));

        // cash 800 + margin 20 + pnl 10
        let equity = account_equity(&acc, Price::new_unchecked(dec!(110)));
        assert_eq!(equity.value(), dec!(830));
    }

    #[test]
    fn flat_account_equity_is_cash() {
        let acc = account(AccountKind::Margin, dec!(5000), 10);
        let equity = account_equity(&acc, Price::new_unchecked(dec!(123)));
        assert_eq!(equity.value(), dec!(5000));
    }

    #[test]
    fn tick_return_basics() {
        assert_eq!(
            tick_return(Money::new(dec!(100)), Money::new(dec!(110))),
            dec!(0.1)
        );
        assert_eq!(tick_return(Money::zero(), Money::new(dec!(10))), dec!(0));
    }
}
