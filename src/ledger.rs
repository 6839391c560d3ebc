//! Per-account cash bookkeeping.
//!
//! The ledger tracks free cash, the borrowed principal behind leveraged
//! margin positions, interest accrued on that principal, and lifetime fees.
//! Every mutation is appended to an internal delta log so the exact history
//! of a balance can be audited after the fact.
//!
//! All checks happen before any field is touched: a failed operation leaves
//! the ledger exactly as it was.

use crate::types::{Money, TickId};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Deposit,
    Fill,
    MarginReserved,
    MarginReturned,
    RealizedPnl,
    TradeFee,
    LiquidationFee,
    Borrow,
    Repay,
    InterestAccrued,
    InterestPaid,
    FundingPayment,
    /// Loss beyond the reserved margin that the account did not pay; the
    /// balancing entry that keeps the delta log summing to the cash change.
    ShortfallAbsorbed,
}

/// One signed cash/borrow movement. Positive amounts increase the field the
/// entry applies to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedgerDelta {
    pub tick: TickId,
    pub kind: LedgerEntryKind,
    pub amount: Money,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },

    #[error("repay {requested} exceeds borrowed balance {borrowed}")]
    RepayExceedsBorrowed { requested: Money, borrowed: Money },
}

/// Result of netting a close against the ledger.
#[derive(Debug, Clone, Copy)]
pub struct CloseSettlement {
    /// Cash actually credited (floored at zero).
    pub credited: Money,
    /// Loss the margin did not cover.
    pub shortfall: Money,
    /// Borrow interest settled as part of the close.
    pub interest: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLedger {
    cash: Money,
    borrowed: Money,
    interest_owed: Money,
    fees_paid: Money,
    deltas: Vec<LedgerDelta>,
}

impl AccountLedger {
    pub fn new(initial_cash: Money) -> Self {
        Self {
            cash: initial_cash,
            borrowed: Money::zero(),
            interest_owed: Money::zero(),
            fees_paid: Money::zero(),
            deltas: vec![LedgerDelta {
                tick: TickId(0),
                kind: LedgerEntryKind::Deposit,
                amount: initial_cash,
            }],
        }
    }

    pub fn cash(&self) -> Money {
        self.cash
    }

    pub fn borrowed(&self) -> Money {
        self.borrowed
    }

    pub fn interest_owed(&self) -> Money {
        self.interest_owed
    }

    pub fn fees_paid(&self) -> Money {
        self.fees_paid
    }

    pub fn deltas(&self) -> &[LedgerDelta] {
        &self.deltas
    }

    pub fn credit(&mut self, amount: Money, kind: LedgerEntryKind, tick: TickId) {
        debug_assert!(!amount.is_negative(), "credit amount must be non-negative");
        self.cash = self.cash.add(amount);
        self.log(tick, kind, amount);
    }

    pub fn debit(
        &mut self,
        amount: Money,
        kind: LedgerEntryKind,
        tick: TickId,
    ) -> Result<(), LedgerError> {
        debug_assert!(!amount.is_negative(), "debit amount must be non-negative");
        if amount > self.cash {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: self.cash,
            });
        }
        self.cash = self.cash.sub(amount);
        self.log(tick, kind, amount.negate());
        Ok(())
    }

    /// Record borrowed principal. The margin check against the account's
    /// leverage bound happens upstream, before the order commits.
    pub fn borrow(&mut self, amount: Money, tick: TickId) {
        debug_assert!(!amount.is_negative(), "borrow amount must be non-negative");
        self.borrowed = self.borrowed.add(amount);
        self.log(tick, LedgerEntryKind::Borrow, amount);
    }

    pub fn repay(&mut self, amount: Money, tick: TickId) -> Result<(), LedgerError> {
        if amount > self.borrowed {
            return Err(LedgerError::RepayExceedsBorrowed {
                requested: amount,
                borrowed: self.borrowed,
            });
        }
        self.borrowed = self.borrowed.sub(amount);
        self.log(tick, LedgerEntryKind::Repay, amount.negate());
        Ok(())
    }

    /// Compound interest on the borrowed balance over `elapsed_hours`:
    /// borrowed * ((1 + hourly_rate)^hours - 1). Accrues into `interest_owed`,
    /// returns the amount accrued this call.
    pub fn accrue_interest(
        &mut self,
        hourly_rate: Decimal,
        elapsed_hours: Decimal,
        tick: TickId,
    ) -> Money {
        if self.borrowed.is_zero() || hourly_rate.is_zero() || elapsed_hours.is_zero() {
            return Money::zero();
        }
        let growth = (Decimal::ONE + hourly_rate).powd(elapsed_hours) - Decimal::ONE;
        let accrued = self.borrowed.mul(growth);
        self.interest_owed = self.interest_owed.add(accrued);
        self.log(tick, LedgerEntryKind::InterestAccrued, accrued);
        accrued
    }

    /// Clear the outstanding interest. The caller settles it against close
    /// proceeds, so this only zeroes the liability and logs the payment.
    pub fn settle_interest(&mut self, tick: TickId) -> Money {
        let due = self.interest_owed;
        if due.is_zero() {
            return due;
        }
        self.interest_owed = Money::zero();
        self.log(tick, LedgerEntryKind::InterestPaid, due.negate());
        due
    }

    /// Fees come straight out of cash the moment a trade executes; they are
    /// never deferred or retried.
    pub fn charge_fee(
        &mut self,
        amount: Money,
        kind: LedgerEntryKind,
        tick: TickId,
    ) -> Result<(), LedgerError> {
        self.debit(amount, kind, tick)?;
        self.fees_paid = self.fees_paid.add(amount);
        Ok(())
    }

    /// Funding settlement: positive payment means this account pays. Cash is
    /// adjusted without a floor so settlement stays exactly zero-sum across
    /// all participants.
    pub fn apply_funding(&mut self, payment: Money, tick: TickId) {
        self.cash = self.cash.sub(payment);
        self.log(tick, LedgerEntryKind::FundingPayment, payment.negate());
    }

    /// Net out a position close: release margin, book the realized PnL,
    /// deduct the fee and any outstanding borrow interest. The account never
    /// pays more than the released margin covers; a loss past that point is
    /// returned as `shortfall` and absorbed rather than clawed from cash.
    /// Used by both voluntary closes and the liquidation sweep.
    pub fn settle_close(
        &mut self,
        margin_released: Money,
        realized_pnl: Money,
        fee: Money,
        fee_kind: LedgerEntryKind,
        tick: TickId,
    ) -> CloseSettlement {
        let interest = self.settle_interest(tick);

        self.log(tick, LedgerEntryKind::MarginReturned, margin_released);
        self.log(tick, LedgerEntryKind::RealizedPnl, realized_pnl);
        self.log(tick, fee_kind, fee.negate());
        self.fees_paid = self.fees_paid.add(fee);

        let net = margin_released.add(realized_pnl).sub(fee).sub(interest);
        let (credited, shortfall) = if net.is_negative() {
            (Money::zero(), net.negate())
        } else {
            (net, Money::zero())
        };

        if !shortfall.is_zero() {
            self.log(tick, LedgerEntryKind::ShortfallAbsorbed, shortfall);
        }
        self.cash = self.cash.add(credited);

        CloseSettlement {
            credited,
            shortfall,
            interest,
        }
    }

    pub fn reset(&mut self, initial_cash: Money) {
        *self = AccountLedger::new(initial_cash);
    }

    fn log(&mut self, tick: TickId, kind: LedgerEntryKind, amount: Money) {
        self.deltas.push(LedgerDelta { tick, kind, amount });
    }
}
