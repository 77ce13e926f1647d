use crate::error::LumibotError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One portfolio snapshot keyed by the virtual clock.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct EquityPoint {
    pub ts: DateTime<Utc>,
    pub cash: f64,
    pub portfolio_value: f64,
}

/// Peak-to-trough decline observed over the equity curve. Drawdown is a measure of downside
/// volatility.
#[derive(Debug, Copy, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Drawdown {
    /// Fractional decline from the peak, eg/ `0.25` is a 25% drawdown.
    pub value: f64,
    pub time_peak: Option<DateTime<Utc>>,
    pub time_trough: Option<DateTime<Utc>>,
}

/// Equity curve of one backtest run: portfolio-value checkpoints appended every executor
/// iteration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EquityCurve {
    points: Vec<EquityPoint>,
}

impl EquityCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint(&mut self, ts: DateTime<Utc>, cash: f64, portfolio_value: f64) {
        // One point per timestamp; re-checkpointing the same instant overwrites
        if let Some(last) = self.points.last_mut() {
            if last.ts == ts {
                last.cash = cash;
                last.portfolio_value = portfolio_value;
                return;
            }
        }
        self.points.push(EquityPoint {
            ts,
            cash,
            portfolio_value,
        });
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&EquityPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&EquityPoint> {
        self.points.last()
    }

    /// Fractional return from the first checkpoint to the last.
    pub fn total_return(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if first.portfolio_value != 0.0 => {
                last.portfolio_value / first.portfolio_value - 1.0
            }
            _ => 0.0,
        }
    }

    /// Sharpe ratio of per-checkpoint returns against a per-checkpoint risk-free return.
    ///
    /// Measures risk-adjusted return by comparing excess returns to their standard
    /// deviation. Zero dispersion yields infinity, mirroring a riskless curve.
    pub fn sharpe_ratio(&self, risk_free_return: f64) -> f64 {
        let returns: Vec<f64> = self
            .points
            .windows(2)
            .filter(|pair| pair[0].portfolio_value != 0.0)
            .map(|pair| pair[1].portfolio_value / pair[0].portfolio_value - 1.0)
            .collect();
        if returns.len() < 2 {
            return 0.0;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns
            .iter()
            .map(|ret| (ret - mean).powi(2))
            .sum::<f64>()
            / (returns.len() - 1) as f64;
        let std_dev = variance.sqrt();

        if std_dev == 0.0 {
            f64::INFINITY
        } else {
            (mean - risk_free_return) / std_dev
        }
    }

    /// Maximum drawdown over the curve, tracked against the running peak.
    pub fn max_drawdown(&self) -> Drawdown {
        let mut peak: Option<EquityPoint> = None;
        let mut max = Drawdown::default();

        for point in &self.points {
            match peak {
                Some(current_peak) if point.portfolio_value <= current_peak.portfolio_value => {
                    if current_peak.portfolio_value > 0.0 {
                        let decline =
                            1.0 - point.portfolio_value / current_peak.portfolio_value;
                        if decline > max.value {
                            max = Drawdown {
                                value: decline,
                                time_peak: Some(current_peak.ts),
                                time_trough: Some(point.ts),
                            };
                        }
                    }
                }
                _ => peak = Some(*point),
            }
        }

        max
    }

    /// Write the curve as the per-run stats CSV. Partial curves are written too, so an
    /// aborted backtest still leaves its completed ticks on disk.
    pub fn write_csv(&self, path: &Path) -> Result<(), LumibotError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer =
            csv::Writer::from_path(path).map_err(|error| LumibotError::ArtifactIo(error.to_string()))?;
        for point in &self.points {
            writer
                .serialize(point)
                .map_err(|error| LumibotError::ArtifactIo(error.to_string()))?;
        }
        writer
            .flush()
            .map_err(|error| LumibotError::ArtifactIo(error.to_string()))?;
        debug!(path = %path.display(), points = self.points.len(), "wrote stats csv");
        Ok(())
    }
}

/// Result of one completed (or aborted) backtest run.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestSummary {
    pub strategy: String,
    pub backtesting_start: DateTime<Utc>,
    pub backtesting_end: DateTime<Utc>,
    pub starting_cash: f64,
    pub ending_cash: f64,
    pub ending_portfolio_value: f64,
    pub total_return: f64,
    pub max_drawdown: Drawdown,
    pub equity: EquityCurve,
    /// Stats CSV location, when a logs directory was configured.
    pub stats_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn curve(values: &[f64]) -> EquityCurve {
        let mut curve = EquityCurve::new();
        let base = Utc.with_ymd_and_hms(2024, 1, 3, 14, 30, 0).unwrap();
        for (offset, value) in values.iter().enumerate() {
            curve.checkpoint(
                base + chrono::Duration::minutes(offset as i64),
                *value,
                *value,
            );
        }
        curve
    }

    #[test]
    fn test_total_return() {
        assert_eq!(curve(&[100_000.0, 110_000.0]).total_return(), 0.1);
        assert_eq!(curve(&[]).total_return(), 0.0);
    }

    #[test]
    fn test_max_drawdown_tracks_running_peak() {
        struct TestCase {
            name: &'static str,
            values: Vec<f64>,
            expected: f64,
        }

        let cases = vec![
            // TC0: Monotonic rise has no drawdown
            TestCase {
                name: "monotonic rise",
                values: vec![100.0, 110.0, 120.0],
                expected: 0.0,
            },
            // TC1: Single dip
            TestCase {
                name: "single dip",
                values: vec![100.0, 80.0, 120.0],
                expected: 0.2,
            },
            // TC2: Deeper second trough against a higher peak
            TestCase {
                name: "deeper second trough",
                values: vec![100.0, 90.0, 200.0, 100.0],
                expected: 0.5,
            },
        ];

        for (index, test) in cases.iter().enumerate() {
            let actual = curve(&test.values).max_drawdown().value;
            assert!(
                (actual - test.expected).abs() < 1e-9,
                "TC{index} ({}) expected {} got {}",
                test.name,
                test.expected,
                actual
            );
        }
    }

    #[test]
    fn test_sharpe_ratio() {
        // Riskless growth: zero dispersion
        assert_eq!(
            curve(&[100.0, 101.0, 102.01]).sharpe_ratio(0.0),
            f64::INFINITY
        );

        // Alternating +10% / -10% nets out to a zero mean excess return
        let mixed = curve(&[100.0, 110.0, 99.0, 108.9, 98.01]).sharpe_ratio(0.0);
        assert!(mixed.abs() < 1e-9);

        // Uneven growth: +10% then +5%, positive risk-adjusted return
        let uneven = curve(&[100.0, 110.0, 115.5]).sharpe_ratio(0.0);
        assert!(uneven > 1.0);

        // Too few points
        assert_eq!(curve(&[100.0]).sharpe_ratio(0.0), 0.0);
    }

    #[test]
    fn test_checkpoint_same_ts_overwrites() {
        let mut curve = EquityCurve::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 3, 14, 30, 0).unwrap();
        curve.checkpoint(ts, 1.0, 1.0);
        curve.checkpoint(ts, 2.0, 2.0);
        assert_eq!(curve.len(), 1);
        assert_eq!(curve.last().unwrap().cash, 2.0);
    }
}
