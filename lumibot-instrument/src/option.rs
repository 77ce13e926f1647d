use crate::asset::Asset;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Configuration of an option contract attached to an
/// [`AssetKind::Option`](crate::asset::AssetKind::Option).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct OptionContract {
    pub expiration: NaiveDate,
    pub strike: Decimal,
    pub right: OptionRight,
    pub multiplier: u32,
    /// Explicit underlying asset. When absent the underlying is synthesized from the option
    /// symbol at settlement time.
    pub underlying: Option<Box<Asset>>,
}

impl OptionContract {
    /// Construct a contract with the standard equity-option multiplier of 100.
    pub fn new(expiration: NaiveDate, strike: Decimal, right: OptionRight) -> Self {
        Self {
            expiration,
            strike,
            right,
            multiplier: 100,
            underlying: None,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_underlying(mut self, underlying: Asset) -> Self {
        self.underlying = Some(Box::new(underlying));
        self
    }

    /// Intrinsic value of one unit of the contract against the provided underlying price.
    ///
    /// May be negative; clamping for settlement (long floors at zero, short caps at zero) is
    /// the fill engine's responsibility.
    pub fn intrinsic_value(&self, underlying_price: Decimal) -> Decimal {
        match self.right {
            OptionRight::Call => underlying_price - self.strike,
            OptionRight::Put => self.strike - underlying_price,
        }
    }
}

/// [`OptionContract`] right - Call or Put.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    #[serde(alias = "CALL", alias = "Call")]
    Call,
    #[serde(alias = "PUT", alias = "Put")]
    Put,
}

impl Display for OptionRight {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                OptionRight::Call => "call",
                OptionRight::Put => "put",
            }
        )
    }
}

/// Option chain snapshot served by a data source - expirations and the strikes listed for each.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct OptionChain {
    pub underlying: Option<Asset>,
    pub multiplier: u32,
    pub expirations: Vec<NaiveDate>,
    pub strikes: Vec<Decimal>,
}
