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

//! # Lumibot-Data
//! Lumibot-Data owns everything a deterministic backtest reads from history:
//! * Columnar OHLCV [`BarSeries`](bar::BarSeries) storage keyed by `(Asset, Quote, Timestep)`.
//! * The [`BarStore`](store::BarStore) sliding-window cache with timestep aggregation, LRU
//!   tracking and a hard memory cap.
//! * Preloaded [`TradingCalendar`](calendar::TradingCalendar)s for the supported markets.
//! * The [`DataSource`](source::DataSource) trait consumed by the simulated broker and
//!   strategy executor, with an in-memory backtesting implementation.
//!
//! The cardinal invariant throughout is look-ahead prevention: no API ever returns a bar with
//! `ts > now` for the caller's virtual `now`.

/// Bar, columnar bar series and quote data structures.
pub mod bar;

/// On-disk bar cache files (CSV) under a configurable cache directory.
pub mod cache;

/// Preloaded market session calendars and session arithmetic.
pub mod calendar;

/// Defines all possible errors in Lumibot-Data.
pub mod error;

/// The [`DataSource`](source::DataSource) interface and its backtesting implementation.
pub mod source;

/// The sliding-window [`BarStore`](store::BarStore) and its aggregation cache.
pub mod store;

/// Bucket durations for bar data - `1m`, `5m`, `1h`, `1d`, etc.
pub mod timestep;
