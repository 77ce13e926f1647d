mod common;

use common::{flat_minutes, minute_series, nyse_broker, session_open};
use chrono::Duration;
use lumibot::{
    backtest::run_backtest,
    config::BacktestConfig,
    error::StrategyError,
    strategy::{Context, Strategy},
};
use lumibot_execution::order::{OrderRequest, OrderSide, OrderStatus};
use lumibot_instrument::asset::Asset;
use rust_decimal_macros::dec;

/// Buys a fixed quantity on the first iteration, then holds.
struct BuyAndHold {
    asset: Asset,
    quantity: rust_decimal::Decimal,
    bought: bool,
    snapshots: Vec<(f64, f64)>,
}

impl BuyAndHold {
    fn new(asset: Asset, quantity: rust_decimal::Decimal) -> Self {
        Self {
            asset,
            quantity,
            bought: false,
            snapshots: Vec::new(),
        }
    }
}

impl Strategy for BuyAndHold {
    fn on_trading_iteration(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        if !self.bought {
            let order = ctx.create_order(self.asset.clone(), self.quantity, OrderSide::Buy);
            ctx.submit_order(order)?;
            self.bought = true;
        }
        let cash = ctx.get_cash();
        let portfolio = ctx.get_portfolio_value();
        self.snapshots.push((cash, portfolio));
        Ok(())
    }
}

#[test]
fn test_equity_buy_and_hold_one_day() {
    let open = session_open();
    // Bars engineered so the mark right after the fill equals the fill price
    let spy = minute_series(
        Asset::stock("SPY"),
        open,
        &[
            (100.0, 101.0, 99.0, 100.5),
            (100.0, 101.0, 99.5, 100.5),
            (100.5, 101.0, 100.0, 100.8),
        ],
    );
    let broker = nyse_broker(vec![spy], open, open + Duration::minutes(3));
    let config = BacktestConfig::new("buy_and_hold", open, open + Duration::minutes(3))
        .with_sleeptime("1M")
        .unwrap();

    let summary = run_backtest(BuyAndHold::new(Asset::stock("SPY"), dec!(10)), broker, config)
        .unwrap();

    // 10 shares at the 09:30 bar open of 100: cash = 100000 - 1000
    assert_eq!(summary.ending_cash, 99_000.0);

    // Snapshot at 09:31, marked at that bar's open of 100: portfolio still 100,000
    let after_fill = summary.equity.points()[1];
    assert_eq!(after_fill.ts, open + Duration::minutes(1));
    assert_eq!(after_fill.cash, 99_000.0);
    assert_eq!(after_fill.portfolio_value, 100_000.0);
}

/// Submits one sell limit above the market; the next bar gaps through it.
struct GapLimitSeller {
    submitted: Option<lumibot_execution::order::OrderId>,
}

impl Strategy for GapLimitSeller {
    fn on_trading_iteration(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        if self.submitted.is_none() {
            let order = OrderRequest::limit(
                Asset::stock("SPY"),
                dec!(5),
                OrderSide::SellShort,
                dec!(110),
            );
            self.submitted = Some(ctx.submit_order(order)?);
        }
        Ok(())
    }
}

#[test]
fn test_limit_gap_through_fills_at_open() {
    let open = session_open();
    // Execution bar opens at 112, gapping through the 110 sell limit
    let spy = minute_series(
        Asset::stock("SPY"),
        open,
        &[
            (112.0, 113.0, 111.5, 112.5),
            (112.5, 113.0, 112.0, 112.8),
        ],
    );
    let broker = nyse_broker(vec![spy], open, open + Duration::minutes(2));
    let config = BacktestConfig::new("gap_limit", open, open + Duration::minutes(2))
        .with_sleeptime("1M")
        .unwrap();

    let summary = run_backtest(GapLimitSeller { submitted: None }, broker, config).unwrap();

    // Short 5 at the gap open of 112, not the limit of 110: cash = 100000 + 5 * 112
    assert_eq!(summary.ending_cash, 100_560.0);
}

/// Buys then fully sells, capturing the round trip.
struct RoundTrip {
    step: usize,
}

impl Strategy for RoundTrip {
    fn on_trading_iteration(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        match self.step {
            0 => {
                ctx.submit_order(OrderRequest::market(
                    Asset::stock("SPY"),
                    dec!(10),
                    OrderSide::Buy,
                ))?;
            }
            2 => {
                ctx.submit_order(OrderRequest::market(
                    Asset::stock("SPY"),
                    dec!(10),
                    OrderSide::Sell,
                ))?;
            }
            _ => {}
        }
        self.step += 1;
        Ok(())
    }
}

#[test]
fn test_round_trip_returns_position_to_zero() {
    let open = session_open();
    let spy = minute_series(
        Asset::stock("SPY"),
        open,
        &[
            (100.0, 101.0, 99.0, 100.5), // buy fills here at 100
            (101.0, 102.0, 100.5, 101.5),
            (103.0, 104.0, 102.5, 103.5), // sell fills here at 103
            (103.5, 104.0, 103.0, 103.8),
        ],
    );
    let broker = nyse_broker(vec![spy], open, open + Duration::minutes(4));
    let config = BacktestConfig::new("round_trip", open, open + Duration::minutes(4))
        .with_sleeptime("1M")
        .unwrap();

    let summary = run_backtest(RoundTrip { step: 0 }, broker, config).unwrap();

    // cash delta = (sell - buy) * qty = (103 - 100) * 10, no fees configured
    assert_eq!(summary.ending_cash, 100_030.0);
    assert_eq!(summary.ending_portfolio_value, 100_030.0);
}

/// Day order that can never fill expires at the session close.
struct StaleDayOrder {
    order: Option<lumibot_execution::order::OrderId>,
    expirations: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl Strategy for StaleDayOrder {
    fn on_trading_iteration(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        if self.order.is_none() {
            let request = OrderRequest::limit(Asset::stock("SPY"), dec!(1), OrderSide::Buy, dec!(1))
                .with_time_in_force(lumibot_execution::order::TimeInForce::Day);
            self.order = Some(ctx.submit_order(request)?);
        }
        Ok(())
    }

    fn on_canceled_order(&mut self, _: &mut Context<'_>, order: &lumibot_execution::order::Order) {
        if order.status == OrderStatus::Expired {
            self.expirations
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }
}

#[test]
fn test_day_order_expires_at_session_end() {
    let open = session_open();
    let spy = flat_minutes(Asset::stock("SPY"), open, 100.0, 60);
    // Run past the close so the end-of-day sweep fires
    let end = common::session_close() + Duration::hours(1);
    let broker = nyse_broker(vec![spy], open, end);
    let config = BacktestConfig::new("stale_day_order", open, end)
        .with_sleeptime("1H")
        .unwrap();

    let expirations = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let strategy = StaleDayOrder {
        order: None,
        expirations: std::sync::Arc::clone(&expirations),
    };

    let summary = run_backtest(strategy, broker, config).unwrap();

    // Order never filled, so cash is untouched; the end-of-day sweep expired it
    assert_eq!(summary.ending_cash, 100_000.0);
    assert_eq!(expirations.load(std::sync::atomic::Ordering::Relaxed), 1);
}
