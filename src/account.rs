//! Accounts and the users who own them.
//!
//! A user holds at most one account per kind. Spot accounts carry a raw
//! asset quantity and never a leveraged position; margin and futures
//! accounts carry at most one open position each. Accounts exist for the
//! whole life of the engine and are only re-initialized by `reset`.

use crate::config::AccountConfig;
use crate::ledger::AccountLedger;
use crate::position::Position;
use crate::types::{AccountKind, Leverage, Money, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub kind: AccountKind,
    pub ledger: AccountLedger,
    /// Open leveraged position, margin/futures only.
    pub position: Option<Position>,
    /// Asset quantity held outright, spot only.
    pub holdings: Decimal,
    pub leverage_bound: Leverage,
    pub initial_cash: Money,
}

impl Account {
    pub fn new(kind: AccountKind, config: &AccountConfig) -> Self {
        Self {
            kind,
            ledger: AccountLedger::new(config.initial_cash),
            position: None,
            holdings: Decimal::ZERO,
            leverage_bound: config.leverage,
            initial_cash: config.initial_cash,
        }
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn reset(&mut self) {
        self.ledger.reset(self.initial_cash);
        self.position = None;
        self.holdings = Decimal::ZERO;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserState {
    pub id: UserId,
    pub accounts: BTreeMap<AccountKind, Account>,
}

impl UserState {
    pub fn new(id: UserId, accounts: BTreeMap<AccountKind, Account>) -> Self {
        Self { id, accounts }
    }

    pub fn account(&self, kind: AccountKind) -> Option<&Account> {
        self.accounts.get(&kind)
    }

    pub fn account_mut(&mut self, kind: AccountKind) -> Option<&mut Account> {
        self.accounts.get_mut(&kind)
    }

    pub fn reset(&mut self) {
        for account in self.accounts.values_mut() {
            account.reset();
        }
    }
}
