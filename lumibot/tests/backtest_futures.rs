mod common;

use common::{minute_series, nyse_broker, session_open};
use chrono::{DateTime, Duration, Utc};
use lumibot::{
    backtest::run_backtest,
    config::BacktestConfig,
    error::StrategyError,
    strategy::{Context, Strategy},
};
use lumibot_execution::{fees::TradingFee, order::OrderSide};
use lumibot_instrument::asset::Asset;
use rust_decimal_macros::dec;

/// Buy one MES contract, hold, then sell - tracking cash and portfolio value at every
/// iteration to verify mark-to-market accounting.
struct SingleTradeTracker {
    mes: Asset,
    iteration: usize,
    sell_on: usize,
    snapshots: Vec<(DateTime<Utc>, f64, f64)>,
}

impl SingleTradeTracker {
    fn new(sell_on: usize) -> Self {
        Self {
            mes: Asset::cont_future("MES"),
            iteration: 0,
            sell_on,
            snapshots: Vec::new(),
        }
    }
}

impl Strategy for SingleTradeTracker {
    fn on_trading_iteration(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        if self.iteration == 0 {
            let order = ctx.create_order(self.mes.clone(), dec!(1), OrderSide::Buy);
            ctx.submit_order(order)?;
        } else if self.iteration == self.sell_on {
            let order = ctx.create_order(self.mes.clone(), dec!(1), OrderSide::Sell);
            ctx.submit_order(order)?;
        }
        self.iteration += 1;

        let now = ctx.get_datetime();
        self.snapshots.push((now, ctx.get_cash(), ctx.get_portfolio_value()));
        Ok(())
    }
}

/// MES single trade with margin, fees and mark-to-market checkpoints:
/// * Buy 1 @ 4700 (margin $1,300, fee $0.50): cash 98,699.50, portfolio 99,999.50.
/// * Marked at 4705: unrealized (4705 - 4700) * 5 = $25, portfolio 100,024.50.
/// * Sell 1 @ 4706 (fee $0.50): realized $30, cash 100,029.00.
#[test]
fn test_mes_single_trade_mark_to_market() {
    let open = session_open();
    let mes = minute_series(
        Asset::cont_future("MES"),
        open,
        &[
            (4700.0, 4702.0, 4699.0, 4701.0), // buy fills at this open
            (4705.0, 4705.5, 4700.5, 4705.0), // marked here while holding
            (4706.0, 4707.0, 4704.0, 4706.5), // sell fills at this open
            (4706.5, 4707.0, 4705.0, 4706.0),
        ],
    );
    let end = open + Duration::minutes(4);
    let broker = nyse_broker(vec![mes], open, end).with_fees(
        vec![TradingFee::flat(dec!(0.50)).taker_only()],
        vec![TradingFee::flat(dec!(0.50)).taker_only()],
    );
    let config = BacktestConfig::new("mes_single_trade", open, end)
        .with_sleeptime("1M")
        .unwrap();

    let summary = run_backtest(SingleTradeTracker::new(2), broker, config).unwrap();

    let points = summary.equity.points();

    // Before the fill: untouched account
    assert_eq!(points[0].cash, 100_000.0);
    assert_eq!(points[0].portfolio_value, 100_000.0);

    // After the buy fill at 4700, marked at the 09:31 open of 4705:
    // cash = 100000 - 1300 - 0.50; portfolio = cash + 1300 margin + 25 unrealized
    assert_eq!(points[1].cash, 98_699.50);
    assert_eq!(points[1].portfolio_value, 100_024.50);

    // After the sell fill at 4706: margin released, realized (4706-4700)*5 = 30
    assert_eq!(summary.ending_cash, 100_029.0);
    assert_eq!(summary.ending_portfolio_value, 100_029.0);
}

/// Portfolio value never includes futures notional - only margin plus unrealized P&L.
#[test]
fn test_futures_portfolio_excludes_notional() {
    let open = session_open();
    let mes = minute_series(
        Asset::cont_future("MES"),
        open,
        &[
            (4700.0, 4700.0, 4700.0, 4700.0),
            (4700.0, 4700.0, 4700.0, 4700.0),
            (4700.0, 4700.0, 4700.0, 4700.0),
        ],
    );
    let end = open + Duration::minutes(3);
    let broker = nyse_broker(vec![mes], open, end);
    let config = BacktestConfig::new("mes_flat", open, end)
        .with_sleeptime("1M")
        .unwrap();

    let summary = run_backtest(SingleTradeTracker::new(usize::MAX), broker, config).unwrap();

    // Flat price, no fees: the account is exactly whole at every checkpoint. Were notional
    // (4700 * 5 = 23,500) added, the portfolio would be far larger.
    for point in summary.equity.points() {
        assert_eq!(point.portfolio_value, 100_000.0);
    }
    assert_eq!(summary.ending_cash, 98_700.0); // margin posted, not spent
}
