use crate::{future, option::OptionContract};
use chrono::NaiveDate;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt::{Display, Formatter};

/// Ticker symbol backed by a stack-allocated [`SmolStr`].
///
/// eg/ "SPY", "MES", "BTC"
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct Symbol(pub SmolStr);

impl Symbol {
    pub fn new<S: AsRef<str>>(symbol: S) -> Self {
        Self(SmolStr::new(symbol.as_ref().to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier for a tradable instrument.
///
/// Equality is structural across all identifying fields, so an `Asset` can be used directly as a
/// map key in the bar store and position trackers.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Asset {
    pub symbol: Symbol,
    pub kind: AssetKind,
}

/// Variant of an [`Asset`], carrying the contract fields that identify it.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum AssetKind {
    Stock,
    Option(OptionContract),
    /// Dated futures contract. `None` expiration models symbols quoted without a settlement
    /// date attached.
    Future { expiration: Option<NaiveDate> },
    /// Continuous futures series, auto-rolled through successive contract months.
    ContFuture,
    Crypto,
    Forex,
    Index,
}

impl Asset {
    pub fn new<S: Into<Symbol>>(symbol: S, kind: AssetKind) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
        }
    }

    pub fn stock<S: Into<Symbol>>(symbol: S) -> Self {
        Self::new(symbol, AssetKind::Stock)
    }

    pub fn option<S: Into<Symbol>>(symbol: S, contract: OptionContract) -> Self {
        Self::new(symbol, AssetKind::Option(contract))
    }

    pub fn future<S: Into<Symbol>>(symbol: S, expiration: Option<NaiveDate>) -> Self {
        Self::new(symbol, AssetKind::Future { expiration })
    }

    pub fn cont_future<S: Into<Symbol>>(symbol: S) -> Self {
        Self::new(symbol, AssetKind::ContFuture)
    }

    pub fn crypto<S: Into<Symbol>>(symbol: S) -> Self {
        Self::new(symbol, AssetKind::Crypto)
    }

    pub fn forex<S: Into<Symbol>>(symbol: S) -> Self {
        Self::new(symbol, AssetKind::Forex)
    }

    pub fn index<S: Into<Symbol>>(symbol: S) -> Self {
        Self::new(symbol, AssetKind::Index)
    }

    /// Default quote asset - USD quoted as forex.
    pub fn usd() -> Self {
        Self::forex("USD")
    }

    /// Contract size factor.
    ///
    /// Equities, crypto, forex and indices are 1. Options carry their own multiplier
    /// (typically 100). Futures resolve through the per-symbol
    /// [`ContractSpec`](future::ContractSpec) table.
    pub fn multiplier(&self) -> u32 {
        match &self.kind {
            AssetKind::Stock | AssetKind::Crypto | AssetKind::Forex | AssetKind::Index => 1,
            AssetKind::Option(contract) => contract.multiplier,
            AssetKind::Future { .. } | AssetKind::ContFuture => {
                future::contract_spec(self.symbol.as_str()).multiplier
            }
        }
    }

    /// Expiration date, for assets that have one.
    pub fn expiration(&self) -> Option<NaiveDate> {
        match &self.kind {
            AssetKind::Option(contract) => Some(contract.expiration),
            AssetKind::Future { expiration } => *expiration,
            _ => None,
        }
    }

    pub fn is_option(&self) -> bool {
        matches!(self.kind, AssetKind::Option(_))
    }

    pub fn is_futures(&self) -> bool {
        matches!(
            self.kind,
            AssetKind::Future { .. } | AssetKind::ContFuture
        )
    }

    pub fn is_crypto(&self) -> bool {
        matches!(self.kind, AssetKind::Crypto)
    }

    pub fn is_forex(&self) -> bool {
        matches!(self.kind, AssetKind::Forex)
    }

    /// Resolve the underlying for an option contract.
    ///
    /// Uses the contract's explicit underlying when present, otherwise synthesizes a stock
    /// asset from the option symbol. Callers that get no price for the stock should retry the
    /// lookup as an index.
    pub fn option_underlying(&self) -> Option<Asset> {
        match &self.kind {
            AssetKind::Option(contract) => Some(match &contract.underlying {
                Some(underlying) => (**underlying).clone(),
                None => Asset::stock(self.symbol.clone()),
            }),
            _ => None,
        }
    }
}

impl Display for Asset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            AssetKind::Stock => write!(f, "{}", self.symbol),
            AssetKind::Option(contract) => write!(
                f,
                "{} {} {} {}",
                self.symbol, contract.expiration, contract.strike, contract.right
            ),
            AssetKind::Future { expiration } => match expiration {
                Some(expiration) => write!(f, "{} {}", self.symbol, expiration),
                None => write!(f, "{}", self.symbol),
            },
            AssetKind::ContFuture => write!(f, "{} (cont)", self.symbol),
            AssetKind::Crypto | AssetKind::Forex | AssetKind::Index => {
                write!(f, "{}", self.symbol)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::OptionRight;
    use rust_decimal_macros::dec;

    #[test]
    fn test_asset_structural_equality() {
        struct TestCase {
            lhs: Asset,
            rhs: Asset,
            expected_eq: bool,
        }

        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();

        let cases = vec![
            // TC0: Same stock symbol
            TestCase {
                lhs: Asset::stock("SPY"),
                rhs: Asset::stock("spy"),
                expected_eq: true,
            },
            // TC1: Stock vs index with same symbol
            TestCase {
                lhs: Asset::stock("SPX"),
                rhs: Asset::index("SPX"),
                expected_eq: false,
            },
            // TC2: Options differing only in strike
            TestCase {
                lhs: Asset::option(
                    "SPY",
                    OptionContract::new(expiry, dec!(400), OptionRight::Call),
                ),
                rhs: Asset::option(
                    "SPY",
                    OptionContract::new(expiry, dec!(405), OptionRight::Call),
                ),
                expected_eq: false,
            },
            // TC3: Identical option contracts
            TestCase {
                lhs: Asset::option(
                    "SPY",
                    OptionContract::new(expiry, dec!(400), OptionRight::Put),
                ),
                rhs: Asset::option(
                    "SPY",
                    OptionContract::new(expiry, dec!(400), OptionRight::Put),
                ),
                expected_eq: true,
            },
        ];

        for (index, test) in cases.iter().enumerate() {
            assert_eq!(test.lhs == test.rhs, test.expected_eq, "TC{index} failed");
        }
    }

    #[test]
    fn test_asset_multiplier() {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();

        assert_eq!(Asset::stock("AAPL").multiplier(), 1);
        assert_eq!(
            Asset::option(
                "SPY",
                OptionContract::new(expiry, dec!(400), OptionRight::Call)
            )
            .multiplier(),
            100
        );
        assert_eq!(Asset::cont_future("MES").multiplier(), 5);
        assert_eq!(Asset::cont_future("ES").multiplier(), 50);
        assert_eq!(Asset::cont_future("GC").multiplier(), 100);
    }

    #[test]
    fn test_option_underlying_synthesized_from_symbol() {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let option = Asset::option(
            "SPY",
            OptionContract::new(expiry, dec!(400), OptionRight::Call),
        );

        assert_eq!(option.option_underlying(), Some(Asset::stock("SPY")));
        assert_eq!(Asset::stock("SPY").option_underlying(), None);
    }
}
