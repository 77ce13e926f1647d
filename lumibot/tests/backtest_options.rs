mod common;

use common::{minute_series, nyse_broker, session_open};
use chrono::NaiveDate;
use lumibot::{
    backtest::run_backtest,
    config::BacktestConfig,
    error::StrategyError,
    strategy::{Context, Strategy},
};
use lumibot_execution::order::OrderSide;
use lumibot_instrument::{
    asset::Asset,
    option::{OptionContract, OptionRight},
};
use rust_decimal_macros::dec;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

fn spy_call(strike: rust_decimal::Decimal, right: OptionRight) -> Asset {
    let expiry = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
    Asset::option("SPY", OptionContract::new(expiry, strike, right))
}

/// Buys one contract on the first iteration and holds through expiration.
struct HoldThroughExpiry {
    contract: Asset,
    bought: bool,
    settlements: Arc<AtomicUsize>,
}

impl Strategy for HoldThroughExpiry {
    fn on_trading_iteration(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        if !self.bought {
            let order = ctx.create_order(self.contract.clone(), dec!(1), OrderSide::Buy);
            ctx.submit_order(order)?;
            self.bought = true;
        }
        Ok(())
    }

    fn on_filled_order(
        &mut self,
        _: &mut Context<'_>,
        order: &lumibot_execution::order::Order,
        price: rust_decimal::Decimal,
        _: rust_decimal::Decimal,
    ) {
        // The settlement fill arrives at the clamped intrinsic unit price
        if order.side.is_sell() {
            assert_eq!(price, dec!(10));
            self.settlements.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// In-the-money call held through expiration: settled for intrinsic value at the close,
/// position removed.
#[test]
fn test_itm_call_cash_settles_at_expiration() {
    let open = session_open();
    let call = spy_call(dec!(400), OptionRight::Call);
    let series = vec![
        minute_series(call.clone(), open, &[(5.0, 5.5, 4.9, 5.2), (5.0, 5.6, 4.9, 5.4)]),
        minute_series(
            Asset::stock("SPY"),
            open,
            &[
                (409.0, 410.5, 408.5, 410.0),
                (410.0, 410.5, 409.5, 410.0),
            ],
        ),
    ];
    let end = common::session_close();
    let broker = nyse_broker(series, open, end);
    let config = BacktestConfig::new("itm_expiry", open, end)
        .with_sleeptime("15M")
        .unwrap();

    let settlements = Arc::new(AtomicUsize::new(0));
    let strategy = HoldThroughExpiry {
        contract: call,
        bought: false,
        settlements: Arc::clone(&settlements),
    };

    let summary = run_backtest(strategy, broker, config).unwrap();

    // Premium paid 5.00 * 100 at entry; settlement credits (410 - 400) * 1 * 100
    assert_eq!(summary.ending_cash, 100_500.0);
    assert_eq!(settlements.load(Ordering::Relaxed), 1);
}

/// Out-of-the-money long expires worthless: intrinsic floors at zero, the premium is simply
/// lost.
#[test]
fn test_otm_long_expires_worthless() {
    let open = session_open();
    let put = spy_call(dec!(380), OptionRight::Put);
    let series = vec![
        minute_series(put.clone(), open, &[(2.0, 2.1, 1.9, 2.0), (2.0, 2.1, 1.9, 2.0)]),
        minute_series(
            Asset::stock("SPY"),
            open,
            &[
                (409.0, 410.5, 408.5, 410.0),
                (410.0, 410.5, 409.5, 410.0),
            ],
        ),
    ];
    let end = common::session_close();
    let broker = nyse_broker(series, open, end);
    let config = BacktestConfig::new("otm_expiry", open, end)
        .with_sleeptime("15M")
        .unwrap();

    let settlements = Arc::new(AtomicUsize::new(0));
    struct OtmHold {
        inner: HoldThroughExpiry,
    }
    impl Strategy for OtmHold {
        fn on_trading_iteration(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
            self.inner.on_trading_iteration(ctx)
        }
        fn on_filled_order(
            &mut self,
            _: &mut Context<'_>,
            order: &lumibot_execution::order::Order,
            price: rust_decimal::Decimal,
            _: rust_decimal::Decimal,
        ) {
            if order.side.is_sell() {
                // Long put 380 against SPY at 410: worthless, settled at zero
                assert_eq!(price, dec!(0));
                self.inner.settlements.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let summary = run_backtest(
        OtmHold {
            inner: HoldThroughExpiry {
                contract: put,
                bought: false,
                settlements: Arc::clone(&settlements),
            },
        },
        broker,
        config,
    )
    .unwrap();

    // Premium of 2.00 * 100 lost, nothing credited back
    assert_eq!(summary.ending_cash, 99_800.0);
    assert_eq!(settlements.load(Ordering::Relaxed), 1);
}
