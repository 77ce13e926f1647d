use chrono::{Duration, NaiveDate, TimeZone, Utc};
use lumibot::{
    backtest::run_backtest,
    config::BacktestConfig,
    error::StrategyError,
    logging::init_logging,
    strategy::{Context, Strategy},
};
use lumibot_data::{
    bar::{Bar, BarSeries},
    calendar::{Market, TradingCalendar},
    source::BacktestingSource,
    store::BarStore,
    timestep::MINUTE,
};
use lumibot_execution::{broker::SimulatedBroker, order::OrderSide};
use lumibot_instrument::asset::Asset;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Simple moving average of the trailing `length` values.
fn sma(values: &[f64], length: usize) -> Option<f64> {
    if values.len() < length || length == 0 {
        return None;
    }
    Some(values[values.len() - length..].iter().sum::<f64>() / length as f64)
}

/// Classic fast/slow SMA crossover over minute closes: long when the fast average is above
/// the slow one, flat otherwise.
struct SmaCrossover {
    asset: Asset,
    fast: usize,
    slow: usize,
    quantity: Decimal,
}

impl Strategy for SmaCrossover {
    fn on_trading_iteration(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        let Some(bars) = ctx.get_historical_prices(&self.asset, self.slow, None) else {
            // Not enough history yet
            return Ok(());
        };
        let closes = bars.closes().to_vec();
        let (Some(fast), Some(slow)) = (sma(&closes, self.fast), sma(&closes, self.slow)) else {
            return Ok(());
        };

        let position = ctx.get_position(&self.asset);
        if fast > slow && position.is_none() {
            let order = ctx.create_order(self.asset.clone(), self.quantity, OrderSide::Buy);
            ctx.submit_order(order)?;
            ctx.log_message("fast SMA crossed above slow SMA, entering long");
        } else if fast < slow {
            if let Some(position) = position {
                if position.quantity > Decimal::ZERO {
                    let order =
                        ctx.create_order(self.asset.clone(), position.quantity, OrderSide::Sell);
                    ctx.submit_order(order)?;
                    ctx.log_message("fast SMA crossed below slow SMA, exiting");
                }
            }
        }
        Ok(())
    }
}

/// Synthetic trending minute bars for one NYSE session.
fn synthetic_session(asset: Asset) -> BarSeries {
    let open = Utc.with_ymd_and_hms(2024, 1, 3, 14, 30, 0).unwrap();
    let mut series = BarSeries::new(asset, Asset::usd(), MINUTE);
    for minute in 0..390i64 {
        let trend = minute as f64 * 0.02;
        let wave = (minute as f64 / 30.0).sin() * 1.5;
        let price = 100.0 + trend + wave;
        series
            .push(Bar::new(
                open + Duration::minutes(minute),
                price,
                price + 0.25,
                price - 0.25,
                price + 0.1,
                10_000.0,
            ))
            .expect("synthetic bars are monotonic");
    }
    series
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let spy = Asset::stock("SPY");
    let mut store = BarStore::new(MINUTE);
    store.add_series(synthetic_session(spy.clone()));

    let start = Utc.with_ymd_and_hms(2024, 1, 3, 14, 30, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 3, 21, 0, 0).unwrap();
    let source = BacktestingSource::new(store, start, end);
    let calendar = Arc::new(TradingCalendar::new(
        Market::Nyse,
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
    )?);
    let broker = SimulatedBroker::new(Box::new(source), calendar);

    let config = BacktestConfig::new("sma_crossover", start, end).with_sleeptime("5M")?;
    let strategy = SmaCrossover {
        asset: spy,
        fast: 5,
        slow: 20,
        quantity: Decimal::from(10),
    };

    let summary = run_backtest(strategy, broker, config)?;

    println!("strategy:        {}", summary.strategy);
    println!("ending cash:     {:.2}", summary.ending_cash);
    println!("portfolio value: {:.2}", summary.ending_portfolio_value);
    println!("total return:    {:.4}%", summary.total_return * 100.0);
    println!("max drawdown:    {:.4}%", summary.max_drawdown.value * 100.0);
    println!("sharpe (per-tick): {:.3}", summary.equity.sharpe_ratio(0.0));

    Ok(())
}
