use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable controlling how many days before expiration a continuous futures
/// series rolls to the next contract month.
pub const FUTURES_ROLL_DAYS_ENV: &str = "LUMIBOT_FUTURES_ROLL_DAYS";

const DEFAULT_ROLL_DAYS: i64 = 7;

/// Contract specification for one futures symbol.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ContractSpec {
    pub multiplier: u32,
    /// Initial margin posted per contract. `None` means the symbol is not in the table and the
    /// broker falls back to a fraction of notional at entry.
    pub initial_margin: Option<Decimal>,
}

/// Look up the [`ContractSpec`] for a futures symbol.
///
/// Unknown symbols fall back to multiplier 1 with no margin figure and are logged once per
/// call site at warn level.
pub fn contract_spec(symbol: &str) -> ContractSpec {
    let spec = |multiplier: u32, margin: u32| ContractSpec {
        multiplier,
        initial_margin: Some(Decimal::from(margin)),
    };

    match symbol {
        "MES" => spec(5, 1_300),
        "ES" => spec(50, 13_000),
        "MNQ" => spec(2, 1_800),
        "NQ" => spec(20, 18_000),
        "GC" => spec(100, 10_000),
        "MGC" => spec(10, 1_000),
        "CL" => spec(1_000, 6_000),
        "MCL" => spec(100, 600),
        "MYM" => spec(1, 900),
        "YM" => spec(5, 9_000),
        other => {
            warn!(
                symbol = other,
                "no contract specification for futures symbol, using multiplier 1"
            );
            ContractSpec {
                multiplier: 1,
                initial_margin: None,
            }
        }
    }
}

/// Continuous-contract roll buffer in days, from `LUMIBOT_FUTURES_ROLL_DAYS` (default 7).
///
/// The active contract symbol switches this many days before expiration. Open positions on the
/// old contract are not force-closed; they simply stop receiving bars.
pub fn roll_days() -> i64 {
    std::env::var(FUTURES_ROLL_DAYS_ENV)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(DEFAULT_ROLL_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_days_defaults_to_seven() {
        if std::env::var(FUTURES_ROLL_DAYS_ENV).is_err() {
            assert_eq!(roll_days(), 7);
        }
    }

    #[test]
    fn test_contract_spec_table() {
        struct TestCase {
            symbol: &'static str,
            expected_multiplier: u32,
            expected_margin: Option<u32>,
        }

        let cases = vec![
            // TC0: Micro E-mini S&P
            TestCase {
                symbol: "MES",
                expected_multiplier: 5,
                expected_margin: Some(1_300),
            },
            // TC1: E-mini S&P
            TestCase {
                symbol: "ES",
                expected_multiplier: 50,
                expected_margin: Some(13_000),
            },
            // TC2: Gold
            TestCase {
                symbol: "GC",
                expected_multiplier: 100,
                expected_margin: Some(10_000),
            },
            // TC3: Unknown symbol falls back
            TestCase {
                symbol: "ZZZ",
                expected_multiplier: 1,
                expected_margin: None,
            },
        ];

        for (index, test) in cases.iter().enumerate() {
            let spec = contract_spec(test.symbol);
            assert_eq!(spec.multiplier, test.expected_multiplier, "TC{index} failed");
            assert_eq!(
                spec.initial_margin,
                test.expected_margin.map(Decimal::from),
                "TC{index} failed"
            );
        }
    }
}
