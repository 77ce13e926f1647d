#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use lumibot_data::{
    bar::{Bar, BarSeries},
    calendar::{Market, TradingCalendar},
    source::BacktestingSource,
    store::BarStore,
    timestep::MINUTE,
};
use lumibot_execution::broker::SimulatedBroker;
use lumibot_instrument::asset::Asset;
use std::sync::Arc;

/// 2024-01-03 09:30 ET, the canonical session open used across the scenarios.
pub fn session_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 3, 14, 30, 0).unwrap()
}

/// 2024-01-03 16:00 ET.
pub fn session_close() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 3, 21, 0, 0).unwrap()
}

/// Minute bars for `asset` starting at `start`, one tuple per minute.
pub fn minute_series(
    asset: Asset,
    start: DateTime<Utc>,
    bars: &[(f64, f64, f64, f64)],
) -> BarSeries {
    let mut series = BarSeries::new(asset, Asset::usd(), MINUTE);
    for (offset, (open, high, low, close)) in bars.iter().enumerate() {
        series
            .push(Bar::new(
                start + Duration::minutes(offset as i64),
                *open,
                *high,
                *low,
                *close,
                1_000.0,
            ))
            .unwrap();
    }
    series
}

/// Flat minute bars at a constant price for `count` minutes.
pub fn flat_minutes(asset: Asset, start: DateTime<Utc>, price: f64, count: usize) -> BarSeries {
    let bars: Vec<(f64, f64, f64, f64)> = (0..count)
        .map(|_| (price, price, price, price))
        .collect();
    minute_series(asset, start, &bars)
}

/// Broker over an NYSE January 2024 calendar with the provided series preloaded.
pub fn nyse_broker(
    series_list: Vec<BarSeries>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> SimulatedBroker {
    let mut store = BarStore::new(MINUTE);
    for series in series_list {
        store.add_series(series);
    }
    let source = BacktestingSource::new(store, start, end);
    let calendar = Arc::new(
        TradingCalendar::new(
            Market::Nyse,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap(),
    );
    SimulatedBroker::new(Box::new(source), calendar)
}
