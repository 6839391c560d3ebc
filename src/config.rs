// 6.0 config.rs: all settings in one place. which users exist, which account
// kinds they open, fee rates, margin and funding parameters. everything is
// validated once at construction; nothing is inferred at first use.

use crate::fees::FeeSchedule;
use crate::types::{AccountKind, Leverage, Money, UserId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One opened (user, account-kind) pair. Presence in the user's map is what
/// "open_account" means; absent kinds were never opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub initial_cash: Money,
    /// Upper bound on requested order leverage. Spot must be 1.
    pub leverage: Leverage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    pub accounts: BTreeMap<AccountKind, AccountConfig>,
}

impl UserConfig {
    pub fn with_account(mut self, kind: AccountKind, initial_cash: Decimal, leverage: u32) -> Self {
        self.accounts.insert(
            kind,
            AccountConfig {
                initial_cash: Money::new(initial_cash),
                leverage: Leverage::new(leverage).unwrap_or(Leverage::ONE),
            },
        );
        self
    }
}

/// The single account whose equity curve is the externally consumed signal.
/// Resolved once at construction and never inferred afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseAccount {
    pub user: UserId,
    pub kind: AccountKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub fees: FeeSchedule,
    /// Maintenance margin ratio m, in (0, 1).
    pub maintenance_margin_ratio: Decimal,
    /// Hourly rate charged on margin borrow, compounded per tick.
    pub borrow_rate_hourly: Decimal,
    /// Funding settles every this many ticks.
    pub funding_interval_ticks: u64,
    /// When set, a settlement boundary without a published funding rate is a
    /// configuration error instead of defaulting to zero.
    pub funding_rate_required: bool,
    /// Order sizes are truncated down to this step before validation.
    pub qty_step: Decimal,
    /// Events retained in the engine's audit buffer.
    pub max_events: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fees: FeeSchedule::default(),
            maintenance_margin_ratio: dec!(0.05),
            borrow_rate_hourly: dec!(0.0000065938),
            funding_interval_ticks: 8,
            funding_rate_required: false,
            qty_step: dec!(0.00001),
            max_events: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub users: BTreeMap<UserId, UserConfig>,
    pub base: BaseAccount,
    pub settings: EngineSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no users configured")]
    NoUsers,

    #[error("user {user} has no accounts configured")]
    UserWithoutAccounts { user: UserId },

    #[error("user {user} spot account must use 1x leverage, got {leverage}")]
    SpotLeverage { user: UserId, leverage: Leverage },

    #[error("user {user} {kind} account has non-positive initial cash {cash}")]
    NonPositiveInitialCash {
        user: UserId,
        kind: AccountKind,
        cash: Money,
    },

    #[error("base account {user}/{kind} is not opened by any configured user")]
    BaseAccountNotOpen { user: UserId, kind: AccountKind },

    #[error("maintenance margin ratio {0} must be strictly between 0 and 1")]
    MaintenanceMarginRatio(Decimal),

    #[error("liquidation fee rate {liquidation} must exceed every trading rate (max {trading})")]
    LiquidationRateTooLow {
        liquidation: Decimal,
        trading: Decimal,
    },

    #[error("funding interval must be at least one tick")]
    ZeroFundingInterval,

    #[error("quantity step {0} must be positive and below 1")]
    InvalidQtyStep(Decimal),

    #[error("borrow rate {0} must be non-negative")]
    NegativeBorrowRate(Decimal),
}

impl SimulationConfig {
    pub fn new(
        users: BTreeMap<UserId, UserConfig>,
        base: BaseAccount,
        settings: EngineSettings,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            users,
            base,
            settings,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.users.is_empty() {
            return Err(ConfigError::NoUsers);
        }

        for (user_id, user) in &self.users {
            if user.accounts.is_empty() {
                return Err(ConfigError::UserWithoutAccounts { user: *user_id });
            }
            for (kind, account) in &user.accounts {
                if *kind == AccountKind::Spot && account.leverage != Leverage::ONE {
                    return Err(ConfigError::SpotLeverage {
                        user: *user_id,
                        leverage: account.leverage,
                    });
                }
                if account.initial_cash.value() <= Decimal::ZERO {
                    return Err(ConfigError::NonPositiveInitialCash {
                        user: *user_id,
                        kind: *kind,
                        cash: account.initial_cash,
                    });
                }
            }
        }

        let base_open = self
            .users
            .get(&self.base.user)
            .map(|u| u.accounts.contains_key(&self.base.kind))
            .unwrap_or(false);
        if !base_open {
            return Err(ConfigError::BaseAccountNotOpen {
                user: self.base.user,
                kind: self.base.kind,
            });
        }

        let m = self.settings.maintenance_margin_ratio;
        if m <= Decimal::ZERO || m >= Decimal::ONE {
            return Err(ConfigError::MaintenanceMarginRatio(m));
        }

        let fees = &self.settings.fees;
        if fees.liquidation_rate <= fees.max_trading_rate() {
            return Err(ConfigError::LiquidationRateTooLow {
                liquidation: fees.liquidation_rate,
                trading: fees.max_trading_rate(),
            });
        }

        if self.settings.funding_interval_ticks == 0 {
            return Err(ConfigError::ZeroFundingInterval);
        }

        let step = self.settings.qty_step;
        if step <= Decimal::ZERO || step >= Decimal::ONE {
            return Err(ConfigError::InvalidQtyStep(step));
        }

        if self.settings.borrow_rate_hourly < Decimal::ZERO {
            return Err(ConfigError::NegativeBorrowRate(self.settings.borrow_rate_hourly));
        }

        Ok(())
    }

    /// One user with a single account of the given kind, the base account.
    /// The usual starting point for tests and simulations.
    pub fn single_trader(kind: AccountKind, initial_cash: Decimal, leverage: u32) -> Self {
        let user = UserId(1);
        let mut users = BTreeMap::new();
        users.insert(
            user,
            UserConfig::default().with_account(kind, initial_cash, leverage),
        );
        Self {
            users,
            base: BaseAccount { user, kind },
            settings: EngineSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SimulationConfig {
        SimulationConfig::single_trader(AccountKind::Futures, dec!(10000), 10)
    }

    #[test]
    fn default_single_trader_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_empty_users() {
        let mut config = valid_config();
        config.users.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoUsers));
    }

    #[test]
    fn rejects_leveraged_spot() {
        let mut config = valid_config();
        config.users.insert(
            UserId(2),
            UserConfig::default().with_account(AccountKind::Spot, dec!(1000), 5),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SpotLeverage { user: UserId(2), .. })
        ));
    }

    #[test]
    fn rejects_unopened_base_account() {
        let mut config = valid_config();
        config.base = BaseAccount {
            user: UserId(1),
            kind: AccountKind::Spot,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BaseAccountNotOpen { .. })
        ));
    }

    #[test]
    fn rejects_bad_maintenance_ratio() {
        let mut config = valid_config();
        config.settings.maintenance_margin_ratio = dec!(1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MaintenanceMarginRatio(_))
        ));
    }

    #[test]
    fn rejects_cheap_liquidation_fee() {
        let mut config = valid_config();
        config.settings.fees.liquidation_rate = dec!(0.0001);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LiquidationRateTooLow { .. })
        ));
    }

    #[test]
    fn rejects_zero_funding_interval() {
        let mut config = valid_config();
        config.settings.funding_interval_ticks = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroFundingInterval));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = valid_config();
        let json = serde_json::to_string(&config).unwrap();
        let back: SimulationConfig = serde_json::from_str(&json).unwrap();
        assert!(back.validate().is_ok());
        assert_eq!(back.base, config.base);
    }
}
