//! End-to-end scenarios over small synthetic tapes.
//!
//! Each test drives the engine through the public step surface only, the way
//! the environment adapter does, and checks the externally observable
//! outcome: fills, rejections, equities, funding records, liquidations.

use exchange_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

const HOUR_MS: i64 = 3_600_000;

fn feed_from(closes: &[Decimal]) -> MarketFeed {
    let ticks = closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            MarketTick::flat(
                Timestamp::from_millis(i as i64 * HOUR_MS),
                Price::new_unchecked(*close),
            )
        })
        .collect();
    MarketFeed::new(ticks).unwrap()
}

fn feed_with_funding(closes: &[Decimal], rate: Option<Decimal>) -> MarketFeed {
    let ticks = closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            let mut tick = MarketTick::flat(
                Timestamp::from_millis(i as i64 * HOUR_MS),
                Price::new_unchecked(*close),
            );
            tick.funding_rate = rate;
            tick
        })
        .collect();
    MarketFeed::new(ticks).unwrap()
}

fn flat_feed(price: Decimal, len: usize) -> MarketFeed {
    feed_from(&vec![price; len])
}

fn two_futures_users(initial_cash: Decimal) -> SimulationConfig {
    let mut users = BTreeMap::new();
    users.insert(
        UserId(1),
        UserConfig::default().with_account(AccountKind::Futures, initial_cash, 20),
    );
    users.insert(
        UserId(2),
        UserConfig::default().with_account(AccountKind::Futures, initial_cash, 20),
    );
    SimulationConfig::new(
        users,
        BaseAccount {
            user: UserId(1),
            kind: AccountKind::Futures,
        },
        EngineSettings::default(),
    )
    .unwrap()
}

#[test]
fn liquidation_triggers_at_85_for_5x_long_from_100() {
    // entry 100, 5x, m = 0.05 → liquidation price 100 * (1 - 0.2 + 0.05) = 85
    let feed = feed_from(&[dec!(100), dec!(86), dec!(84)]);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(10000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let result = engine
        .step(&[OrderRequest::open(
            user,
            AccountKind::Futures,
            Side::Long,
            dec!(1),
            Leverage::new(5).unwrap(),
        )])
        .unwrap();
    assert!(result.orders[0].outcome.is_filled());

    let position = engine
        .user(user)
        .unwrap()
        .account(AccountKind::Futures)
        .unwrap()
        .position
        .clone()
        .unwrap();
    assert_eq!(position.liquidation_price.value(), dec!(85.00));

    // mark 86: above the liquidation price, position survives
    let result = engine.step(&[]).unwrap();
    assert!(result.liquidations.is_empty());
    assert!(engine
        .user(user)
        .unwrap()
        .account(AccountKind::Futures)
        .unwrap()
        .has_position());

    // mark 84: breached, forced closure
    let result = engine.step(&[]).unwrap();
    assert_eq!(result.liquidations.len(), 1);
    assert_eq!(result.liquidations[0].user, user);
    assert!(!engine
        .user(user)
        .unwrap()
        .account(AccountKind::Futures)
        .unwrap()
        .has_position());

    // the forced fill lands in the immutable history, tagged
    let last = engine.trades().last().unwrap();
    assert!(last.liquidation);
    assert_eq!(last.price.value(), dec!(84));
}

#[test]
fn round_trip_at_flat_price_costs_exactly_the_fees() {
    let feed = flat_feed(dec!(100), 3);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(10000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    engine
        .step(&[OrderRequest::open(
            user,
            AccountKind::Futures,
            Side::Long,
            dec!(1),
            Leverage::new(5).unwrap(),
        )])
        .unwrap();
    let result = engine
        .step(&[OrderRequest::close(user, AccountKind::Futures)])
        .unwrap();

    // futures fee 0.04% each way on a 100 notional
    let expected_fees = dec!(100) * dec!(0.0004) * dec!(2);
    let account = engine.user(user).unwrap().account(AccountKind::Futures).unwrap();
    assert_eq!(account.ledger.fees_paid().value(), expected_fees);
    assert_eq!(result.base_equity.value(), dec!(10000) - expected_fees);
}

#[test]
fn funding_transfers_cash_but_conserves_the_total() {
    let closes: Vec<Decimal> = vec![dec!(50000); 10];
    let feed = feed_with_funding(&closes, Some(dec!(0.001)));
    let mut engine = ExchangeEngine::new(two_futures_users(dec!(100000)), feed).unwrap();

    let lev = Leverage::new(10).unwrap();
    engine
        .step(&[
            OrderRequest::open(UserId(1), AccountKind::Futures, Side::Long, dec!(1), lev),
            OrderRequest::open(UserId(2), AccountKind::Futures, Side::Short, dec!(1), lev),
        ])
        .unwrap();

    let total_before = engine.snapshot().total();

    // walk to the settlement boundary at tick 8
    let mut settled = None;
    for _ in 0..8 {
        let result = engine.step(&[]).unwrap();
        if let FundingOutcome::Settled { rate, records } = &result.funding {
            settled = Some((*rate, records.clone()));
        }
    }

    let (rate, records) = settled.expect("funding must settle at the boundary");
    assert_eq!(rate, dec!(0.001));
    assert_eq!(records.len(), 2);

    // long pays 1 * 50000 * 0.001 = 50, short receives the same
    let long_payment = records.iter().find(|r| r.user == UserId(1)).unwrap().payment;
    let short_payment = records.iter().find(|r| r.user == UserId(2)).unwrap().payment;
    assert_eq!(long_payment.value(), dec!(50.000));
    assert_eq!(short_payment.value(), dec!(-50.000));

    let paid: Decimal = records.iter().map(|r| r.payment.value()).sum();
    assert_eq!(paid, Decimal::ZERO);

    // system cash is conserved: funding moved money, destroyed none
    assert_eq!(engine.snapshot().total(), total_before);
}

#[test]
fn missing_funding_rate_fails_settlement_when_required() {
    let closes: Vec<Decimal> = vec![dec!(50000); 10];
    let feed = feed_with_funding(&closes, None);
    let mut config = two_futures_users(dec!(100000));
    config.settings.funding_rate_required = true;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let lev = Leverage::new(10).unwrap();
    engine
        .step(&[
            OrderRequest::open(UserId(1), AccountKind::Futures, Side::Long, dec!(1), lev),
            OrderRequest::open(UserId(2), AccountKind::Futures, Side::Short, dec!(1), lev),
        ])
        .unwrap();

    let equity_before = engine.snapshot().total();
    let mut failed = false;
    for _ in 0..8 {
        let result = engine.step(&[]).unwrap();
        match &result.funding {
            FundingOutcome::Failed(FundingError::FundingDataMissing(tick)) => {
                failed = true;
                assert_eq!(*tick, TickId(8));
            }
            FundingOutcome::Settled { .. } => panic!("settlement must not proceed without a rate"),
            FundingOutcome::NotDue => {}
        }
    }
    assert!(failed);
    // the aborted settlement touched nothing
    assert_eq!(engine.snapshot().total(), equity_before);
}

#[test]
fn missing_rate_defaults_to_zero_when_not_required() {
    let closes: Vec<Decimal> = vec![dec!(50000); 10];
    let feed = feed_with_funding(&closes, None);
    let mut engine = ExchangeEngine::new(two_futures_users(dec!(100000)), feed).unwrap();

    let lev = Leverage::new(10).unwrap();
    engine
        .step(&[
            OrderRequest::open(UserId(1), AccountKind::Futures, Side::Long, dec!(1), lev),
            OrderRequest::open(UserId(2), AccountKind::Futures, Side::Short, dec!(1), lev),
        ])
        .unwrap();

    for _ in 0..8 {
        let result = engine.step(&[]).unwrap();
        if let FundingOutcome::Settled { rate, records } = &result.funding {
            assert_eq!(*rate, Decimal::ZERO);
            assert!(records.iter().all(|r| r.payment.is_zero()));
        }
    }
}

#[test]
fn rejected_order_leaves_equity_bit_identical() {
    let feed = flat_feed(dec!(100), 4);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(1000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let before = engine.snapshot();

    // 1000 cash cannot margin a 100-unit position even at 5x
    let result = engine
        .step(&[OrderRequest::open(
            user,
            AccountKind::Futures,
            Side::Long,
            dec!(100),
            Leverage::new(5).unwrap(),
        )])
        .unwrap();

    assert!(matches!(
        result.orders[0].outcome.rejection(),
        Some(OrderRejection::InsufficientFunds { .. })
    ));
    assert_eq!(
        result.equities.account(user, AccountKind::Futures),
        before.account(user, AccountKind::Futures)
    );

    let account = engine.user(user).unwrap().account(AccountKind::Futures).unwrap();
    assert!(!account.has_position());
    assert_eq!(account.ledger.cash().value(), dec!(1000));
    assert!(account.ledger.fees_paid().is_zero());
}

#[test]
fn flat_series_with_no_orders_preserves_initial_equity() {
    let mut users = BTreeMap::new();
    users.insert(
        UserId(1),
        UserConfig::default()
            .with_account(AccountKind::Spot, dec!(5000), 1)
            .with_account(AccountKind::Margin, dec!(7000), 10)
            .with_account(AccountKind::Futures, dec!(9000), 20),
    );
    let config = SimulationConfig::new(
        users,
        BaseAccount {
            user: UserId(1),
            kind: AccountKind::Futures,
        },
        EngineSettings::default(),
    )
    .unwrap();
    let mut engine = ExchangeEngine::new(config, flat_feed(dec!(250), 16)).unwrap();

    engine.reset();
    let result = loop {
        let result = engine.step(&[]).unwrap();
        assert_eq!(result.base_return, Decimal::ZERO);
        if result.done {
            break result;
        }
    };
    assert_eq!(
        result.equities.account(UserId(1), AccountKind::Spot).unwrap().value(),
        dec!(5000)
    );
    assert_eq!(
        result.equities.account(UserId(1), AccountKind::Margin).unwrap().value(),
        dec!(7000)
    );
    assert_eq!(
        result.equities.account(UserId(1), AccountKind::Futures).unwrap().value(),
        dec!(9000)
    );
}

#[test]
fn duplicate_order_in_tick_rejects_the_second() {
    let feed = flat_feed(dec!(100), 3);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(10000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let lev = Leverage::new(5).unwrap();
    let result = engine
        .step(&[
            OrderRequest::open(user, AccountKind::Futures, Side::Long, dec!(1), lev),
            OrderRequest::open(user, AccountKind::Futures, Side::Long, dec!(1), lev),
        ])
        .unwrap();

    assert_eq!(result.orders.len(), 2);
    assert!(result.orders[0].outcome.is_filled());
    assert!(matches!(
        result.orders[1].outcome.rejection(),
        Some(OrderRejection::DuplicateOrderInTick)
    ));

    // only the first order moved the position
    let position = engine
        .user(user)
        .unwrap()
        .account(AccountKind::Futures)
        .unwrap()
        .position
        .clone()
        .unwrap();
    assert_eq!(position.size.value(), dec!(1));
}

#[test]
fn order_for_unopened_account_is_rejected() {
    let feed = flat_feed(dec!(100), 3);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(10000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let result = engine
        .step(&[OrderRequest::open(
            user,
            AccountKind::Spot,
            Side::Long,
            dec!(1),
            Leverage::ONE,
        )])
        .unwrap();

    assert!(matches!(
        result.orders[0].outcome.rejection(),
        Some(OrderRejection::AccountNotOpen {
            kind: AccountKind::Spot
        })
    ));
}

#[test]
fn leverage_above_bound_is_rejected() {
    let feed = flat_feed(dec!(100), 3);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(10000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let result = engine
        .step(&[OrderRequest::open(
            user,
            AccountKind::Futures,
            Side::Long,
            dec!(1),
            Leverage::new(6).unwrap(),
        )])
        .unwrap();

    assert!(matches!(
        result.orders[0].outcome.rejection(),
        Some(OrderRejection::LeverageExceeded { .. })
    ));
}

#[test]
fn dust_size_truncates_to_zero_and_is_rejected() {
    let feed = flat_feed(dec!(100), 3);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(10000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let result = engine
        .step(&[OrderRequest::open(
            user,
            AccountKind::Futures,
            Side::Long,
            dec!(0.000001),
            Leverage::new(5).unwrap(),
        )])
        .unwrap();

    assert!(matches!(
        result.orders[0].outcome.rejection(),
        Some(OrderRejection::InvalidOrderSize { .. })
    ));
}

#[test]
fn averaging_in_shifts_entry_and_liquidation_price() {
    let feed = feed_from(&[dec!(100), dec!(120), dec!(121)]);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(100000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();
    let lev = Leverage::new(5).unwrap();

    engine
        .step(&[OrderRequest::open(user, AccountKind::Futures, Side::Long, dec!(1), lev)])
        .unwrap();
    engine
        .step(&[OrderRequest::open(user, AccountKind::Futures, Side::Long, dec!(1), lev)])
        .unwrap();

    let position = engine
        .user(user)
        .unwrap()
        .account(AccountKind::Futures)
        .unwrap()
        .position
        .clone()
        .unwrap();

    // (1*100 + 1*120) / 2 = 110, liquidation at 110 * 0.85 = 93.5
    assert_eq!(position.entry_price.value(), dec!(110));
    assert_eq!(position.liquidation_price.value(), dec!(93.500));

    // immediately post-fill the liquidation price sits strictly between
    // zero and the mark
    assert!(position.liquidation_price.value() > Decimal::ZERO);
    assert!(position.liquidation_price.value() < dec!(120));
}

#[test]
fn spot_sell_without_holdings_is_rejected() {
    let feed = flat_feed(dec!(100), 3);
    let config = SimulationConfig::single_trader(AccountKind::Spot, dec!(10000), 1);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let result = engine
        .step(&[OrderRequest::open(
            user,
            AccountKind::Spot,
            Side::Short,
            dec!(1),
            Leverage::ONE,
        )])
        .unwrap();

    assert!(matches!(
        result.orders[0].outcome.rejection(),
        Some(OrderRejection::InsufficientFunds { .. })
    ));
}

#[test]
fn spot_round_trip_is_physically_settled() {
    let feed = flat_feed(dec!(100), 3);
    let config = SimulationConfig::single_trader(AccountKind::Spot, dec!(10000), 1);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    engine
        .step(&[OrderRequest::open(user, AccountKind::Spot, Side::Long, dec!(10), Leverage::ONE)])
        .unwrap();
    let account = engine.user(user).unwrap().account(AccountKind::Spot).unwrap();
    assert_eq!(account.holdings, dec!(10));
    // cash went down by cost + fee: 1000 + 1
    assert_eq!(account.ledger.cash().value(), dec!(8999));

    let result = engine
        .step(&[OrderRequest::close(user, AccountKind::Spot)])
        .unwrap();
    let account = engine.user(user).unwrap().account(AccountKind::Spot).unwrap();
    assert_eq!(account.holdings, dec!(0));
    // both fees paid, nothing else lost at a flat price
    assert_eq!(result.base_equity.value(), dec!(10000) - dec!(2));
}

#[test]
fn margin_close_pays_borrow_interest() {
    let closes: Vec<Decimal> = vec![dec!(100); 12];
    let feed = feed_from(&closes);
    let mut config = SimulationConfig::single_trader(AccountKind::Margin, dec!(10000), 5);
    // a visible rate so ten hours of interest actually shows up
    config.settings.borrow_rate_hourly = dec!(0.001);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    engine
        .step(&[OrderRequest::open(
            user,
            AccountKind::Margin,
            Side::Long,
            dec!(10),
            Leverage::new(5).unwrap(),
        )])
        .unwrap();

    // notional 1000 at 5x: margin 200, borrowed 800
    let account = engine.user(user).unwrap().account(AccountKind::Margin).unwrap();
    assert_eq!(account.ledger.borrowed().value(), dec!(800));

    for _ in 0..10 {
        engine.step(&[]).unwrap();
    }
    let account = engine.user(user).unwrap().account(AccountKind::Margin).unwrap();
    // ten hourly accruals on an 800 borrow at 0.1%/h, roughly 0.8 each
    let owed = account.ledger.interest_owed().value();
    assert!(owed > dec!(7.9) && owed < dec!(8.1));

    let result = engine
        .step(&[OrderRequest::close(user, AccountKind::Margin)])
        .unwrap();
    let account = engine.user(user).unwrap().account(AccountKind::Margin).unwrap();
    assert!(account.ledger.interest_owed().is_zero());
    assert!(account.ledger.borrowed().is_zero());

    // equity lost exactly the fees plus every accrued interest charge
    let fees = account.ledger.fees_paid().value();
    let interest: Decimal = account
        .ledger
        .deltas()
        .iter()
        .filter(|d| matches!(d.kind, LedgerEntryKind::InterestAccrued))
        .map(|d| d.amount.value())
        .sum();
    assert_eq!(result.base_equity.value(), dec!(10000) - fees - interest);
}

#[test]
fn opposite_side_order_flips_the_position() {
    let feed = flat_feed(dec!(100), 4);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(10000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();
    let lev = Leverage::new(5).unwrap();

    engine
        .step(&[OrderRequest::open(user, AccountKind::Futures, Side::Long, dec!(1), lev)])
        .unwrap();
    engine
        .step(&[OrderRequest::open(user, AccountKind::Futures, Side::Short, dec!(3), lev)])
        .unwrap();

    let position = engine
        .user(user)
        .unwrap()
        .account(AccountKind::Futures)
        .unwrap()
        .position
        .clone()
        .unwrap();
    assert!(position.size.is_short());
    assert_eq!(position.size.abs(), dec!(2));
}

#[test]
fn partial_close_releases_proportional_margin() {
    let feed = flat_feed(dec!(100), 4);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(10000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    engine
        .step(&[OrderRequest::open(
            user,
            AccountKind::Futures,
            Side::Long,
            dec!(4),
            Leverage::new(5).unwrap(),
        )])
        .unwrap();
    engine
        .step(&[OrderRequest::close_partial(user, AccountKind::Futures, dec!(1))])
        .unwrap();

    let position = engine
        .user(user)
        .unwrap()
        .account(AccountKind::Futures)
        .unwrap()
        .position
        .clone()
        .unwrap();

    // 4 @ 100 at 5x reserved 80; a quarter of it comes back
    assert_eq!(position.size.value(), dec!(3));
    assert_eq!(position.margin.value(), dec!(60));
    assert_eq!(position.entry_price.value(), dec!(100));
}

#[test]
fn all_in_open_commits_the_whole_balance() {
    let feed = flat_feed(dec!(100), 3);
    let config = SimulationConfig::single_trader(AccountKind::Futures, dec!(10000), 5);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let result = engine
        .step(&[OrderRequest::open_all_in(
            user,
            AccountKind::Futures,
            Side::Long,
            Leverage::new(5).unwrap(),
        )])
        .unwrap();
    assert!(result.orders[0].outcome.is_filled());

    // margin plus entry fee consume the balance down to step-truncation dust
    let account = engine.user(user).unwrap().account(AccountKind::Futures).unwrap();
    assert!(account.has_position());
    assert!(account.ledger.cash().value() < dec!(0.01));
    assert!(!account.ledger.cash().is_negative());
}

#[test]
fn non_monotonic_feed_is_fatal_at_construction() {
    let ticks = vec![
        MarketTick::flat(Timestamp::from_millis(HOUR_MS), Price::new_unchecked(dec!(100))),
        MarketTick::flat(Timestamp::from_millis(0), Price::new_unchecked(dec!(101))),
    ];
    assert!(matches!(
        MarketFeed::new(ticks),
        Err(FeedError::NonMonotonicTimestamp { .. })
    ));
}

#[test]
fn stepping_past_the_end_errors_until_reset() {
    let feed = flat_feed(dec!(100), 2);
    let config = SimulationConfig::single_trader(AccountKind::Spot, dec!(1000), 1);
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    assert!(!engine.step(&[]).unwrap().done);
    assert!(engine.step(&[]).unwrap().done);
    assert!(matches!(engine.step(&[]), Err(EngineError::FeedExhausted)));

    let snapshot = engine.reset();
    assert_eq!(
        snapshot.account(UserId(1), AccountKind::Spot).unwrap().value(),
        dec!(1000)
    );
    assert!(engine.step(&[]).is_ok());
}

#[test]
fn base_return_tracks_the_designated_account_only() {
    let feed = feed_from(&[dec!(100), dec!(110)]);
    let mut users = BTreeMap::new();
    users.insert(
        UserId(1),
        UserConfig::default().with_account(AccountKind::Futures, dec!(10000), 10),
    );
    users.insert(
        UserId(2),
        UserConfig::default().with_account(AccountKind::Futures, dec!(10000), 10),
    );
    let config = SimulationConfig::new(
        users,
        BaseAccount {
            user: UserId(2),
            kind: AccountKind::Futures,
        },
        EngineSettings::default(),
    )
    .unwrap();
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    // only user 1 trades; the base account (user 2) stays flat
    engine
        .step(&[OrderRequest::open(
            UserId(1),
            AccountKind::Futures,
            Side::Long,
            dec!(1),
            Leverage::new(10).unwrap(),
        )])
        .unwrap();
    let result = engine.step(&[]).unwrap();

    assert_eq!(result.base_equity.value(), dec!(10000));
    assert_eq!(result.base_return, Decimal::ZERO);
}
