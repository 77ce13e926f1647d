use crate::{
    bar::{BarSeries, Quote},
    store::BarStore,
    timestep::Timestep,
};
use chrono::{DateTime, Duration, Utc};
use fnv::FnvHashMap;
use lumibot_instrument::{asset::Asset, option::OptionChain};
use rust_decimal::Decimal;
use tracing::debug;

/// Bar-selection convention the fill engine uses for this source, preventing look-ahead: an
/// order submitted at `t` may only consume information visible at `t`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FillShift {
    /// Execution reads `bars(now + shift)` - minute vendors use a -1 minute shift so fills
    /// consume the next bar's OHLC, daily vendors shift one day.
    Fixed(Duration),
    /// Frame-loaded custom data: fetch two bars ending two steps back and select the first
    /// bar at-or-after `now`.
    TwoBarSelect,
}

impl FillShift {
    pub fn minutes(minutes: i64) -> Self {
        Self::Fixed(Duration::minutes(minutes))
    }

    pub fn days(days: i64) -> Self {
        Self::Fixed(Duration::days(days))
    }
}

/// Abstract provider of historical bars and the virtual clock, consumed by the simulated
/// broker and the strategy executor.
///
/// Implementations outside this crate wrap vendor caches (Polygon, DataBento, Yahoo,
/// ThetaData); [`BacktestingSource`] serves preloaded in-memory data.
pub trait DataSource: std::fmt::Debug + Send {
    /// Virtual clock accessor.
    fn get_datetime(&self) -> DateTime<Utc>;

    /// Advance the virtual clock. Only the executor calls this.
    fn update_datetime(&mut self, now: DateTime<Utc>);

    fn datetime_start(&self) -> DateTime<Utc>;

    fn datetime_end(&self) -> DateTime<Utc>;

    /// Up to `length` bars ending at-or-before `now + timeshift`, never later than `now`.
    fn get_historical_prices(
        &mut self,
        asset: &Asset,
        length: usize,
        timestep: Option<Timestep>,
        timeshift: Option<Duration>,
        quote: Option<&Asset>,
    ) -> Option<BarSeries>;

    /// Last trade price as of the virtual clock. `None` on missing or NaN close.
    fn get_last_price(&mut self, asset: &Asset, quote: Option<&Asset>) -> Option<Decimal>;

    /// Marking price for portfolio valuation - trade close with a quote-mid fallback for
    /// quote-sourced series. Never used for fills.
    fn get_mark_price(&mut self, asset: &Asset, quote: Option<&Asset>) -> Option<Decimal> {
        self.get_last_price(asset, quote)
    }

    /// Snapshot quote for the asset at the virtual clock.
    fn get_quote(&mut self, asset: &Asset, quote: Option<&Asset>) -> Quote;

    /// Option chain for an underlying, when the source carries one.
    fn get_chains(&self, asset: &Asset) -> Option<OptionChain>;

    /// The source's native bar timestep.
    fn default_timestep(&self) -> Timestep;

    /// Bar-selection convention for fills.
    fn fill_shift(&self) -> FillShift {
        FillShift::minutes(-1)
    }

    /// True when the source's history is known complete, so an empty bar query for an order's
    /// asset means the data genuinely does not exist (the broker cancels instead of waiting).
    fn known_complete(&self) -> bool {
        false
    }
}

/// In-memory [`DataSource`] for backtests: owns the [`BarStore`] and the virtual `now`.
#[derive(Debug)]
pub struct BacktestingSource {
    store: BarStore,
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    fill_shift: FillShift,
    known_complete: bool,
    chains: FnvHashMap<Asset, OptionChain>,
}

impl BacktestingSource {
    pub fn new(store: BarStore, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            store,
            now: start,
            start,
            end,
            fill_shift: FillShift::minutes(-1),
            known_complete: false,
            chains: FnvHashMap::default(),
        }
    }

    pub fn with_fill_shift(mut self, fill_shift: FillShift) -> Self {
        self.fill_shift = fill_shift;
        self
    }

    /// Mark the source's history as complete (frame-loaded data).
    pub fn with_known_complete(mut self) -> Self {
        self.known_complete = true;
        self
    }

    pub fn with_chain(mut self, underlying: Asset, chain: OptionChain) -> Self {
        self.chains.insert(underlying, chain);
        self
    }

    pub fn store(&self) -> &BarStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut BarStore {
        &mut self.store
    }
}

impl DataSource for BacktestingSource {
    fn get_datetime(&self) -> DateTime<Utc> {
        self.now
    }

    fn update_datetime(&mut self, now: DateTime<Utc>) {
        debug_assert!(now >= self.now, "virtual clock must be monotonic");
        self.now = now;
    }

    fn datetime_start(&self) -> DateTime<Utc> {
        self.start
    }

    fn datetime_end(&self) -> DateTime<Utc> {
        self.end
    }

    fn get_historical_prices(
        &mut self,
        asset: &Asset,
        length: usize,
        timestep: Option<Timestep>,
        timeshift: Option<Duration>,
        quote: Option<&Asset>,
    ) -> Option<BarSeries> {
        self.store
            .get_historical_prices(asset, length, timestep, self.now, timeshift, quote)
    }

    fn get_last_price(&mut self, asset: &Asset, quote: Option<&Asset>) -> Option<Decimal> {
        self.store.get_last_price(asset, self.now, quote)
    }

    fn get_mark_price(&mut self, asset: &Asset, quote: Option<&Asset>) -> Option<Decimal> {
        self.store.get_mark_price(asset, self.now, quote)
    }

    fn get_quote(&mut self, asset: &Asset, quote: Option<&Asset>) -> Quote {
        self.store.get_quote(asset, self.now, quote)
    }

    fn get_chains(&self, asset: &Asset) -> Option<OptionChain> {
        let chain = self.chains.get(asset).cloned();
        if chain.is_none() {
            debug!(%asset, "no option chain loaded for asset");
        }
        chain
    }

    fn default_timestep(&self) -> Timestep {
        self.store.default_timestep()
    }

    fn fill_shift(&self) -> FillShift {
        self.fill_shift
    }

    fn known_complete(&self) -> bool {
        self.known_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bar::Bar, timestep::MINUTE};
    use chrono::TimeZone;

    fn source_with_minutes(count: i64) -> BacktestingSource {
        let mut store = BarStore::new(MINUTE);
        let mut series = BarSeries::new(Asset::stock("SPY"), Asset::usd(), MINUTE);
        let base = Utc.with_ymd_and_hms(2024, 1, 3, 14, 30, 0).unwrap();
        for offset in 0..count {
            series
                .push(Bar::new(
                    base + Duration::minutes(offset),
                    100.0 + offset as f64,
                    101.0 + offset as f64,
                    99.0 + offset as f64,
                    100.5 + offset as f64,
                    10.0,
                ))
                .unwrap();
        }
        store.add_series(series);
        BacktestingSource::new(store, base, base + Duration::minutes(count))
    }

    #[test]
    fn test_virtual_clock_gates_history() {
        let mut source = source_with_minutes(100);
        let base = source.datetime_start();

        // At the start only the first bar is visible
        let bars = source
            .get_historical_prices(&Asset::stock("SPY"), 1, None, None, None)
            .unwrap();
        assert_eq!(*bars.timestamps().last().unwrap(), base);

        source.update_datetime(base + Duration::minutes(10));
        let bars = source
            .get_historical_prices(&Asset::stock("SPY"), 5, None, None, None)
            .unwrap();
        assert_eq!(
            *bars.timestamps().last().unwrap(),
            base + Duration::minutes(10)
        );
    }

    #[test]
    fn test_last_price_follows_clock() {
        let mut source = source_with_minutes(100);
        let base = source.datetime_start();

        source.update_datetime(base + Duration::minutes(2));
        // Exactly on bar 2: its open
        assert_eq!(
            source.get_last_price(&Asset::stock("SPY"), None),
            Decimal::from_f64_retain(102.0)
        );
    }
}
