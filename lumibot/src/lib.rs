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

//! # Lumibot
//! Lumibot core is a Rust framework for authoring algorithmic trading strategies once and
//! executing them deterministically against historical data.
//! * **Deterministic**: one virtual clock, mutated in exactly one place; identical inputs
//!   produce identical fills, cash and statistics.
//! * **Realistic**: bar-based fills with gap semantics, composite orders (OCO/OTO/bracket/
//!   multileg), option cash settlement, futures margin lot accounting.
//! * **Bounded**: the historical bar store trims to a sliding window and evicts under a hard
//!   memory cap regardless of backtest length.
//!
//! ## Overview
//! The [`StrategyExecutor`](engine::StrategyExecutor) drives one [`Strategy`](strategy::Strategy)
//! from `backtesting_start` to `backtesting_end`: it advances the clock session-aware (jumping
//! closed periods in one step), ticks the
//! [`SimulatedBroker`](lumibot_execution::broker::SimulatedBroker) fill engine, invokes the
//! lifecycle hooks in order, and checkpoints portfolio value into the run's equity curve.
//! Batches of strategy variants run concurrently via [`backtest::run_backtests`].

/// Single and batch backtest entry points.
pub mod backtest;

/// Backtest run configuration.
pub mod config;

/// The strategy executor and its virtual clock loop.
pub mod engine;

/// Defines all possible errors in Lumibot core.
pub mod error;

/// Provides default Lumibot Tracing logging initialisers.
pub mod logging;

/// Equity-curve statistics and persisted run artifacts.
pub mod statistic;

/// The [`Strategy`](strategy::Strategy) trait, its lifecycle hooks, and the capability
/// [`Context`](strategy::Context) exposed to user code.
pub mod strategy;
