//! Exchange Core Simulation.
//!
//! Walks the full ledger lifecycle over synthetic price series: spot round
//! trips, margin borrow and interest, futures funding transfers, and a
//! liquidation cascade under a crash.

use exchange_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

fn main() {
    println!("Exchange Core Engine Simulation");
    println!("Spot, Margin, Futures. One Price Feed, Deterministic Ticks\n");

    scenario_1_spot_round_trip();
    scenario_2_margin_interest();
    scenario_3_funding_transfer();
    scenario_4_liquidation_cascade();
    scenario_5_many_users();

    println!("\nAll simulations completed successfully.");
}

const HOUR_MS: i64 = 3_600_000;

fn hourly_feed(closes: &[Decimal]) -> MarketFeed {
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
    MarketFeed::new(ticks).expect("synthetic feed is monotonic")
}

fn hourly_feed_with_funding(closes: &[Decimal], rate: Decimal) -> MarketFeed {
    let ticks = closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            let mut tick = MarketTick::flat(
                Timestamp::from_millis(i as i64 * HOUR_MS),
                Price::new_unchecked(*close),
            );
            tick.funding_rate = Some(rate);
            tick
        })
        .collect();
    MarketFeed::new(ticks).expect("synthetic feed is monotonic")
}

/// Buy spot, watch the price move, sell everything.
fn scenario_1_spot_round_trip() {
    println!("Scenario 1: Spot Round Trip\n");

    let feed = hourly_feed(&[dec!(100), dec!(110), dec!(120)]);
    let config = SimulationConfig::single_trader(AccountKind::Spot, dec!(10000), 1);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let result = engine
        .step(&[OrderRequest::open(user, AccountKind::Spot, Side::Long, dec!(50), Leverage::ONE)])
        .unwrap();
    println!("  Buy 50 @ $100, equity ${}", result.base_equity);

    let result = engine.step(&[]).unwrap();
    println!("  Price $110, equity ${}", result.base_equity);

    let result = engine
        .step(&[OrderRequest::close(user, AccountKind::Spot)])
        .unwrap();
    println!("  Sell all @ $120, equity ${}", result.base_equity);
    println!("  Trades recorded: {}\n", engine.trades().len());
}

/// Margin long: borrow finances the notional, interest accrues hourly.
fn scenario_2_margin_interest() {
    println!("Scenario 2: Margin Borrow and Interest\n");

    let closes: Vec<Decimal> = (0..48).map(|_| dec!(100)).collect();
    let feed = hourly_feed(&closes);
    let mut config = SimulationConfig::single_trader(AccountKind::Margin, dec!(10000), 5);
    config.settings.borrow_rate_hourly = dec!(0.0000065938);
    let user = config.base.user;
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    engine
        .step(&[OrderRequest::open(user, AccountKind::Margin, Side::Long, dec!(100), Leverage::new(5).unwrap())])
        .unwrap();
    let account = engine.user(user).unwrap().account(AccountKind::Margin).unwrap();
    println!(
        "  Open 100 @ $100 at 5x: margin ${}, borrowed ${}",
        account.position.as_ref().unwrap().margin,
        account.ledger.borrowed()
    );

    for _ in 0..46 {
        engine.step(&[]).unwrap();
    }
    let account = engine.user(user).unwrap().account(AccountKind::Margin).unwrap();
    println!("  After 46 flat hours, interest owed ${}", account.ledger.interest_owed());

    let result = engine
        .step(&[OrderRequest::close(user, AccountKind::Margin)])
        .unwrap();
    println!("  Close at $100, final equity ${}\n", result.base_equity);
}

/// Two futures traders on opposite sides; funding moves cash long → short.
fn scenario_3_funding_transfer() {
    println!("Scenario 3: Funding Transfer\n");

    let closes: Vec<Decimal> = (0..10).map(|_| dec!(50000)).collect();
    let feed = hourly_feed_with_funding(&closes, dec!(0.0001));

    let mut users = BTreeMap::new();
    users.insert(
        UserId(1),
        UserConfig::default().with_account(AccountKind::Futures, dec!(100000), 10),
    );
    users.insert(
        UserId(2),
        UserConfig::default().with_account(AccountKind::Futures, dec!(100000), 10),
    );
    let config = SimulationConfig::new(
        users,
        BaseAccount { user: UserId(1), kind: AccountKind::Futures },
        EngineSettings::default(),
    )
    .unwrap();
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let lev = Leverage::new(10).unwrap();
    engine
        .step(&[
            OrderRequest::open(UserId(1), AccountKind::Futures, Side::Long, dec!(1), lev),
            OrderRequest::open(UserId(2), AccountKind::Futures, Side::Short, dec!(1), lev),
        ])
        .unwrap();
    println!("  Long and short 1 BTC each @ $50,000");

    for _ in 0..8 {
        let result = engine.step(&[]).unwrap();
        if let FundingOutcome::Settled { rate, records } = &result.funding {
            println!("  Tick {}: funding settled at rate {}", result.tick.0, rate);
            for record in records {
                println!("    {} pays ${}", record.user, record.payment);
            }
        }
    }

    let snap = engine.snapshot();
    println!(
        "  Equities: long ${}, short ${}\n",
        snap.account(UserId(1), AccountKind::Futures).unwrap(),
        snap.account(UserId(2), AccountKind::Futures).unwrap()
    );
}

/// Three futures longs at different leverage; a crash picks them off one by
/// one in a fixed, reproducible order.
fn scenario_4_liquidation_cascade() {
    println!("Scenario 4: Liquidation Cascade\n");

    let closes = [
        dec!(50000),
        dec!(48000),
        dec!(45000),
        dec!(42000),
        dec!(40000),
        dec!(38000),
    ];
    let feed = hourly_feed(&closes);

    let mut users = BTreeMap::new();
    for (i, leverage) in [(1u64, 2u32), (2, 5), (3, 20)] {
        users.insert(
            UserId(i),
            UserConfig::default().with_account(AccountKind::Futures, dec!(100000), leverage),
        );
    }
    let config = SimulationConfig::new(
        users,
        BaseAccount { user: UserId(1), kind: AccountKind::Futures },
        EngineSettings::default(),
    )
    .unwrap();
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    engine
        .step(&[
            OrderRequest::open(UserId(1), AccountKind::Futures, Side::Long, dec!(1), Leverage::new(2).unwrap()),
            OrderRequest::open(UserId(2), AccountKind::Futures, Side::Long, dec!(1), Leverage::new(5).unwrap()),
            OrderRequest::open(UserId(3), AccountKind::Futures, Side::Long, dec!(1), Leverage::new(20).unwrap()),
        ])
        .unwrap();

    for user in engine.users_iter() {
        if let Some(pos) = user.account(AccountKind::Futures).and_then(|a| a.position.as_ref()) {
            println!(
                "  {} long 1 BTC at {}x, liquidation price ${}",
                user.id, pos.leverage, pos.liquidation_price
            );
        }
    }

    loop {
        let result = engine.step(&[]).unwrap();
        for liq in &result.liquidations {
            println!(
                "  ${}: {} liquidated, fee ${}, bad debt ${}",
                result.mark_price, liq.user, liq.fee, liq.bad_debt
            );
        }
        if result.done {
            break;
        }
    }

    let liquidation_trades = engine.trades().iter().filter(|t| t.liquidation).count();
    println!("  Liquidation trades recorded: {}\n", liquidation_trades);
}

/// Twenty users, mixed accounts, a choppy tape. The run is repeated from a
/// reset and must match itself exactly.
fn scenario_5_many_users() {
    println!("Scenario 5: Many Users, Reproducible Tape\n");

    let closes: Vec<Decimal> = (0..32)
        .map(|i| dec!(50000) + Decimal::from(((i * 7919) % 2000) as i64) - dec!(1000))
        .collect();
    let feed = hourly_feed_with_funding(&closes, dec!(0.0001));

    let mut users = BTreeMap::new();
    for i in 1..=20u64 {
        users.insert(
            UserId(i),
            UserConfig::default()
                .with_account(AccountKind::Spot, dec!(50000), 1)
                .with_account(AccountKind::Futures, dec!(50000), 10),
        );
    }
    let config = SimulationConfig::new(
        users,
        BaseAccount { user: UserId(1), kind: AccountKind::Futures },
        EngineSettings::default(),
    )
    .unwrap();
    let mut engine = ExchangeEngine::new(config, feed).unwrap();

    let run = |engine: &mut ExchangeEngine| -> Vec<Decimal> {
        let mut curve = Vec::new();
        loop {
            let tick = engine.tick_id().0;
            let orders: Vec<OrderRequest> = (1..=20u64)
                .filter(|i| (i + tick) % 5 == 0)
                .map(|i| {
                    let side = if (i + tick) % 2 == 0 { Side::Long } else { Side::Short };
                    OrderRequest::open(
                        UserId(i),
                        AccountKind::Futures,
                        side,
                        dec!(0.2),
                        Leverage::new(10).unwrap(),
                    )
                })
                .collect();
            let result = engine.step(&orders).unwrap();
            curve.push(result.base_equity.value());
            if result.done {
                break;
            }
        }
        curve
    };

    let first = run(&mut engine);
    engine.reset();
    let second = run(&mut engine);

    println!("  Ticks simulated: {}", first.len());
    println!("  Total trades: {}", engine.trades().len());
    println!("  Runs identical after reset: {}", first == second);
}
