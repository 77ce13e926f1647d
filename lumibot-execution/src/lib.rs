#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Lumibot-Execution
//! Lumibot-Execution is the simulated trading venue of the Lumibot backtesting engine:
//! * [`Order`](order::Order) model with tagged-union payloads (market, limit, stop,
//!   stop-limit, trailing stop) and composite classes (OCO, OTO, bracket, multileg).
//! * Arena [`OrderBook`](order::book::OrderBook) indexed by [`OrderId`](order::OrderId), with
//!   validated state transitions and cascade cancellation.
//! * The bar-based [`fill`] engine deciding which orders fill on each new bar and at what
//!   price, with gap-aware semantics.
//! * [`SimulatedBroker`](broker::SimulatedBroker) maintaining cash, positions, futures margin
//!   lots and option expiration settlement per strategy.

/// [`SimulatedBroker`](broker::SimulatedBroker) - order orchestration, cash and position
/// accounting, option expiration.
pub mod broker;

/// Defines all possible errors in Lumibot-Execution.
pub mod error;

/// Order lifecycle event records backing the strategy hooks and the orders artifact.
pub mod event;

/// Per-side trading fee schedules.
pub mod fees;

/// Bar-OHLC fill price rules for each order type.
pub mod fill;

/// Order data structures and the arena [`OrderBook`](order::book::OrderBook).
pub mod order;

/// Positions and futures FIFO lot ledgers.
pub mod position;
