// exchange-core: multi-account ledger and risk engine for a tick-stepped
// exchange simulation. risk-first: margin math and liquidation take priority.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: UserId, Side, Money, Price, Leverage
//   2.x  position.rs: position struct, pnl, increase/reduce
//   3.x  fees.rs: trading and liquidation fee schedule
//   4.x  funding.rs: N-tick funding cycle between longs and shorts
//   5.x  market.rs: OHLCV tick feed, mark price, monotonicity check
//   6.x  config.rs: users, accounts, risk params, validated at load
//   7.x  trade.rs: immutable fill history
//   8.x  events.rs: state transition events for audit
//   9.x  engine/: orchestrator: orders, funding, liquidations, results
//        ledger.rs: per-account cash/borrow/interest bookkeeping
//        margin.rs: required margin, leverage bounds, liquidation price
//        account.rs: account + user state
//        valuation.rs: equity per account/user, snapshots

// core ledger modules
pub mod account;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod margin;
pub mod position;
pub mod trade;
pub mod types;

// risk and settlement modules
pub mod fees;
pub mod funding;
pub mod valuation;

// market data and configuration
pub mod config;
pub mod market;

// re exports for convenience
pub use account::*;
pub use config::*;
pub use engine::*;
pub use events::*;
pub use fees::*;
pub use funding::*;
pub use ledger::*;
pub use margin::*;
pub use market::*;
pub use position::*;
pub use trade::*;
pub use types::*;
pub use valuation::*;
