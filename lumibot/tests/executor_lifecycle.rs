mod common;

use common::{flat_minutes, nyse_broker, session_open};
use chrono::{DateTime, Duration, TimeZone, Utc};
use lumibot::{
    backtest::run_backtest,
    config::BacktestConfig,
    error::{LumibotError, StrategyError},
    strategy::{Context, Strategy},
};
use lumibot_instrument::asset::Asset;
use std::sync::{Arc, Mutex};

type HookLog = Arc<Mutex<Vec<(String, DateTime<Utc>)>>>;

/// Records every lifecycle hook invocation with its virtual timestamp.
struct HookRecorder {
    log: HookLog,
}

impl HookRecorder {
    fn record(&self, ctx: &Context<'_>, hook: &str) {
        self.log
            .lock()
            .unwrap()
            .push((hook.to_string(), ctx.get_datetime()));
    }
}

impl Strategy for HookRecorder {
    fn initialize(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        self.record(ctx, "initialize");
        Ok(())
    }

    fn on_trading_iteration(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        self.record(ctx, "on_trading_iteration");
        Ok(())
    }

    fn before_market_opens(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        self.record(ctx, "before_market_opens");
        Ok(())
    }

    fn before_market_closes(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        self.record(ctx, "before_market_closes");
        Ok(())
    }

    fn after_market_closes(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        self.record(ctx, "after_market_closes");
        Ok(())
    }
}

/// Two NYSE trading days at an hourly cadence: hooks fire in order once per day, the
/// before-close hook lands at the configured buffer, and the overnight gap is jumped in one
/// step straight to the next open.
#[test]
fn test_lifecycle_hook_ordering_across_days() {
    let open_day1 = session_open();
    let open_day2 = Utc.with_ymd_and_hms(2024, 1, 4, 14, 30, 0).unwrap();
    // Past the day-two close so its end-of-day hooks still fire before the run ends
    let end = Utc.with_ymd_and_hms(2024, 1, 4, 22, 0, 0).unwrap();

    let spy = flat_minutes(Asset::stock("SPY"), open_day1, 100.0, 30);
    let broker = nyse_broker(vec![spy], open_day1, end);
    let config = BacktestConfig::new("hook_recorder", open_day1, end)
        .with_sleeptime("1H")
        .unwrap();

    let log: HookLog = Arc::new(Mutex::new(Vec::new()));
    run_backtest(HookRecorder { log: Arc::clone(&log) }, broker, config).unwrap();

    let log = log.lock().unwrap();
    let names: Vec<&str> = log.iter().map(|(name, _)| name.as_str()).collect();

    // Day one opens the lifecycle
    assert_eq!(names[0], "initialize");
    assert_eq!(names[1], "before_market_opens");
    assert_eq!(names[2], "on_trading_iteration");

    // Each hook fires exactly once per trading day
    let count = |name: &str| names.iter().filter(|n| **n == name).count();
    assert_eq!(count("before_market_opens"), 2);
    assert_eq!(count("before_market_closes"), 2);
    assert_eq!(count("after_market_closes"), 2);

    // The before-close hook lands at close minus the 15 minute default buffer
    let before_close_times: Vec<DateTime<Utc>> = log
        .iter()
        .filter(|(name, _)| name == "before_market_closes")
        .map(|(_, ts)| *ts)
        .collect();
    assert_eq!(
        before_close_times[0],
        Utc.with_ymd_and_hms(2024, 1, 3, 20, 45, 0).unwrap()
    );

    // Ordering within day one: every iteration sits between open and close hooks
    let day1_open_pos = names.iter().position(|n| *n == "before_market_opens").unwrap();
    let day1_close_pos = names.iter().position(|n| *n == "after_market_closes").unwrap();
    let day2_open_pos = names
        .iter()
        .skip(day1_close_pos)
        .position(|n| *n == "before_market_opens")
        .map(|offset| day1_close_pos + offset)
        .unwrap();
    assert!(day1_open_pos < day1_close_pos);
    assert!(day1_close_pos < day2_open_pos);

    // Overnight advancement jumped straight to the day-two open
    let day2_first_iteration = log
        .iter()
        .skip(day2_open_pos)
        .find(|(name, _)| name == "on_trading_iteration")
        .map(|(_, ts)| *ts)
        .unwrap();
    assert_eq!(day2_first_iteration, open_day2);
}

/// The virtual clock never moves backwards and checkpoints are strictly ordered.
#[test]
fn test_clock_is_strictly_monotonic() {
    let open = session_open();
    let end = Utc.with_ymd_and_hms(2024, 1, 5, 21, 0, 0).unwrap();
    let spy = flat_minutes(Asset::stock("SPY"), open, 100.0, 30);
    let broker = nyse_broker(vec![spy], open, end);
    let config = BacktestConfig::new("monotonic", open, end)
        .with_sleeptime("1H")
        .unwrap();

    let log: HookLog = Arc::new(Mutex::new(Vec::new()));
    let summary =
        run_backtest(HookRecorder { log: Arc::clone(&log) }, broker, config).unwrap();

    let points = summary.equity.points();
    for pair in points.windows(2) {
        assert!(pair[0].ts < pair[1].ts, "checkpoints must advance");
    }
}

/// A strategy error during backtesting aborts the run with a strategy error, after invoking
/// `on_bot_crash`.
struct ExplodesOnFirstTick {
    crashed: Arc<Mutex<bool>>,
}

impl Strategy for ExplodesOnFirstTick {
    fn on_trading_iteration(&mut self, _: &mut Context<'_>) -> Result<(), StrategyError> {
        Err(StrategyError::new("synthetic failure"))
    }

    fn on_bot_crash(&mut self, _: &mut Context<'_>, _: &StrategyError) {
        *self.crashed.lock().unwrap() = true;
    }
}

#[test]
fn test_strategy_error_aborts_backtest() {
    let open = session_open();
    let end = open + Duration::minutes(5);
    let spy = flat_minutes(Asset::stock("SPY"), open, 100.0, 5);
    let broker = nyse_broker(vec![spy], open, end);
    let config = BacktestConfig::new("explodes", open, end)
        .with_sleeptime("1M")
        .unwrap();

    let crashed = Arc::new(Mutex::new(false));
    let result = run_backtest(
        ExplodesOnFirstTick {
            crashed: Arc::clone(&crashed),
        },
        broker,
        config,
    );

    assert!(matches!(result, Err(LumibotError::Strategy(_))));
    assert!(*crashed.lock().unwrap());
}

/// `should_continue` returning false stops the run and fires `on_abrupt_closing`.
struct StopsItself {
    ticks: usize,
    abrupt: Arc<Mutex<bool>>,
}

impl Strategy for StopsItself {
    fn on_trading_iteration(&mut self, _: &mut Context<'_>) -> Result<(), StrategyError> {
        self.ticks += 1;
        Ok(())
    }

    fn on_abrupt_closing(&mut self, _: &mut Context<'_>) -> Result<(), StrategyError> {
        *self.abrupt.lock().unwrap() = true;
        Ok(())
    }

    fn should_continue(&self) -> bool {
        self.ticks < 2
    }
}

#[test]
fn test_should_continue_stops_run_abruptly() {
    let open = session_open();
    let end = open + Duration::hours(3);
    let spy = flat_minutes(Asset::stock("SPY"), open, 100.0, 30);
    let broker = nyse_broker(vec![spy], open, end);
    let config = BacktestConfig::new("stops_itself", open, end)
        .with_sleeptime("1M")
        .unwrap();

    let abrupt = Arc::new(Mutex::new(false));
    let summary = run_backtest(
        StopsItself {
            ticks: 0,
            abrupt: Arc::clone(&abrupt),
        },
        broker,
        config,
    )
    .unwrap();

    assert!(*abrupt.lock().unwrap());
    // Two iterations ran before the stop was honored
    assert!(summary.equity.len() <= 3);
}
