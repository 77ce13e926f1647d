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

//! # Lumibot-Instrument
//! Lumibot-Instrument contains the core [`Asset`](asset::Asset) data structures shared by the
//! Lumibot data and execution crates: stocks, options, futures (dated and continuous), crypto,
//! forex pairs and indices, together with their contract specifications (multiplier, initial
//! margin) and trade [`Side`].

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// [`Asset`](asset::Asset) related data structures.
///
/// eg/ `Asset`, `AssetKind`, `Symbol`, etc.
pub mod asset;

/// Futures contract specifications - multiplier and initial margin per symbol, and the
/// continuous-contract roll buffer.
pub mod future;

/// [`OptionContract`](option::OptionContract) related data structures.
pub mod option;

/// [`Side`] of a trade or position - Buy or Sell.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub enum Side {
    #[serde(alias = "buy", alias = "BUY", alias = "b")]
    Buy,
    #[serde(alias = "sell", alias = "SELL", alias = "s")]
    Sell,
}

impl Side {
    /// Signed direction of the side: `+1` for buy, `-1` for sell.
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    /// The opposing side.
    pub fn inverse(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Side::Buy => "buy",
                Side::Sell => "sell",
            }
        )
    }
}
