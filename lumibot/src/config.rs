use crate::error::LumibotError;
use chrono::{DateTime, Duration, Utc};
use lumibot_data::{calendar::Market, timestep::Timestep};
use lumibot_execution::{fees::TradingFee, order::StrategyId};
use std::{path::PathBuf, str::FromStr};

/// Environment variable suppressing per-iteration info logs during a backtest.
pub const BACKTESTING_QUIET_LOGS_ENV: &str = "BACKTESTING_QUIET_LOGS";

/// Cadence of `on_trading_iteration`, parsed once from strings like `"1S"`, `"30S"`, `"1M"`,
/// `"15M"`, `"1H"`, `"1D"`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SleepTime {
    timestep: Timestep,
}

impl SleepTime {
    pub fn duration(&self) -> Duration {
        self.timestep.duration()
    }
}

impl Default for SleepTime {
    fn default() -> Self {
        Self {
            timestep: lumibot_data::timestep::DAY,
        }
    }
}

impl FromStr for SleepTime {
    type Err = LumibotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let timestep = s
            .parse::<Timestep>()
            .map_err(|_| LumibotError::Config(format!("invalid sleeptime: {s}")))?;
        Ok(Self { timestep })
    }
}

/// Configuration of one backtest run.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub strategy_id: StrategyId,
    pub sleeptime: SleepTime,
    pub market: Market,
    pub minutes_before_closing: i64,
    pub backtesting_start: DateTime<Utc>,
    pub backtesting_end: DateTime<Utc>,
    /// Starting cash.
    pub budget: f64,
    pub buy_trading_fees: Vec<TradingFee>,
    pub sell_trading_fees: Vec<TradingFee>,
    /// Suppress per-iteration info logs; progress reporting still runs.
    pub quiet_logs: bool,
    /// Directory the per-run stats CSV (and optional orders JSON) is written to. `None`
    /// disables artifact output.
    pub logs_dir: Option<PathBuf>,
    /// Also write the orders/fills JSON artifact next to the stats CSV.
    pub write_orders_json: bool,
}

impl BacktestConfig {
    pub fn new<S: AsRef<str>>(
        strategy: S,
        backtesting_start: DateTime<Utc>,
        backtesting_end: DateTime<Utc>,
    ) -> Self {
        Self {
            strategy_id: StrategyId::new(strategy),
            sleeptime: SleepTime::default(),
            market: Market::Nyse,
            minutes_before_closing: 15,
            backtesting_start,
            backtesting_end,
            budget: 100_000.0,
            buy_trading_fees: Vec::new(),
            sell_trading_fees: Vec::new(),
            quiet_logs: quiet_logs_from_env(),
            logs_dir: None,
            write_orders_json: false,
        }
    }

    pub fn with_sleeptime(mut self, sleeptime: &str) -> Result<Self, LumibotError> {
        self.sleeptime = sleeptime.parse()?;
        Ok(self)
    }

    pub fn with_market(mut self, market: &str) -> Result<Self, LumibotError> {
        self.market = market
            .parse()
            .map_err(|error| LumibotError::Config(format!("{error}")))?;
        Ok(self)
    }

    pub fn with_minutes_before_closing(mut self, minutes: i64) -> Self {
        self.minutes_before_closing = minutes;
        self
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_fees(mut self, buy: Vec<TradingFee>, sell: Vec<TradingFee>) -> Self {
        self.buy_trading_fees = buy;
        self.sell_trading_fees = sell;
        self
    }

    pub fn with_logs_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.logs_dir = Some(dir.into());
        self
    }

    pub fn with_orders_json(mut self) -> Self {
        self.write_orders_json = true;
        self
    }

    pub fn validate(&self) -> Result<(), LumibotError> {
        if self.backtesting_end <= self.backtesting_start {
            return Err(LumibotError::Config(format!(
                "backtesting_end {} must be after backtesting_start {}",
                self.backtesting_end, self.backtesting_start
            )));
        }
        if !self.budget.is_finite() || self.budget < 0.0 {
            return Err(LumibotError::Config(format!(
                "budget must be a non-negative finite number, got {}",
                self.budget
            )));
        }
        Ok(())
    }
}

fn quiet_logs_from_env() -> bool {
    std::env::var(BACKTESTING_QUIET_LOGS_ENV)
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
