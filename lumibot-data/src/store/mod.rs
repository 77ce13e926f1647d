use crate::{
    bar::{BarSeries, Quote},
    timestep::{Timestep, MINUTE},
};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::{America::New_York, Tz};
use indexmap::IndexMap;
use lumibot_instrument::asset::Asset;
use rust_decimal::{prelude::FromPrimitive, Decimal};
use tracing::{debug, warn};

/// Timestep aggregation of minute data to higher timeframes.
pub mod aggregate;

/// Sliding-window trims (and the memory check) run every this many store accesses, because
/// size calculations are O(entries).
pub const TRIM_FREQUENCY_BARS: u32 = 1000;

/// Number of bars of an entry's own timestep retained behind the virtual `now` by a trim.
pub const HISTORY_WINDOW_BARS: i32 = 5000;

/// Default total-bytes cap across source series and the aggregation cache.
pub const MAX_STORAGE_BYTES: usize = 1_000_000_000;

/// Key of one [`BarSeries`] entry in the store.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct StoreKey {
    pub asset: Asset,
    pub quote: Asset,
    pub timestep: Timestep,
}

/// Owner of all historical bars consumed during a backtest.
///
/// Entries live in insertion-ordered maps that double as LRU queues: every access moves the
/// entry to the back, and eviction pops from the front. Aggregated views of minute data are
/// cached separately and evicted first when the byte cap is exceeded.
#[derive(Debug)]
pub struct BarStore {
    store: IndexMap<StoreKey, BarSeries>,
    aggregated: IndexMap<StoreKey, BarSeries>,
    market_tz: Tz,
    default_timestep: Timestep,
    max_storage_bytes: usize,
    access_count: u32,
}

impl BarStore {
    pub fn new(default_timestep: Timestep) -> Self {
        Self {
            store: IndexMap::new(),
            aggregated: IndexMap::new(),
            market_tz: New_York,
            default_timestep,
            max_storage_bytes: MAX_STORAGE_BYTES,
            access_count: 0,
        }
    }

    pub fn with_market_tz(mut self, tz: Tz) -> Self {
        self.market_tz = tz;
        self
    }

    pub fn with_max_storage_bytes(mut self, bytes: usize) -> Self {
        self.max_storage_bytes = bytes;
        self
    }

    pub fn default_timestep(&self) -> Timestep {
        self.default_timestep
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Register a series under its `(asset, quote, timestep)` key, replacing any prior entry.
    pub fn add_series(&mut self, series: BarSeries) {
        let key = StoreKey {
            asset: series.asset.clone(),
            quote: series.quote_asset.clone(),
            timestep: series.timestep,
        };
        self.store.insert(key, series);
    }

    /// Direct row count of the stored entry, for window-trim verification.
    pub fn series_len(&self, asset: &Asset, quote: Option<&Asset>, timestep: Timestep) -> Option<usize> {
        let key = self.resolve_key(asset, quote, Some(timestep))?;
        self.store.get(&key).map(BarSeries::len)
    }

    /// Total approximate bytes held across source entries and the aggregation cache.
    pub fn total_bytes(&self) -> usize {
        self.store
            .values()
            .chain(self.aggregated.values())
            .map(BarSeries::approx_bytes)
            .sum()
    }

    /// Return up to `length` bars ending at-or-before `now + timeshift`, at the requested
    /// timestep, in chronological order. Bars with `ts > now` are never returned.
    ///
    /// `None` (logged at debug, never an error) when the asset has no data in range, the
    /// window would require future bars, or the requested length exceeds available history.
    pub fn get_historical_prices(
        &mut self,
        asset: &Asset,
        length: usize,
        timestep: Option<Timestep>,
        now: DateTime<Utc>,
        timeshift: Option<Duration>,
        quote: Option<&Asset>,
    ) -> Option<BarSeries> {
        self.on_access(now);

        let timestep = timestep.unwrap_or(self.default_timestep);
        let shift = timeshift.unwrap_or_else(Duration::zero);
        if shift > Duration::zero() {
            debug!(%asset, ?shift, "rejecting look-ahead timeshift");
            return None;
        }
        let effective_now = now + shift;

        // Direct data at the requested timestep is preferred over aggregation
        if let Some(key) = self.direct_key(asset, quote, timestep) {
            self.touch_store(&key);
            let series = self.store.get(&key)?;
            return Self::serve_window(series, effective_now, length);
        }

        if timestep.is_aggregatable_from_minute() {
            if let Some(result) = self.serve_aggregated(asset, quote, timestep, effective_now, length)
            {
                return Some(result);
            }
        }

        debug!(%asset, %timestep, length, "no historical data for request");
        None
    }

    /// Last trade price as of `now`: the open of the bar exactly at `now`, else the close of
    /// the most recent earlier bar. `None` on missing data or NaN close.
    pub fn get_last_price(
        &mut self,
        asset: &Asset,
        now: DateTime<Utc>,
        quote: Option<&Asset>,
    ) -> Option<Decimal> {
        let key = self.resolve_key(asset, quote, None)?;
        self.touch_store(&key);
        let price = self.store.get(&key)?.last_price(now)?;
        Decimal::from_f64(price)
    }

    /// Marking price as of `now` - trade close, falling back to the quote mid for
    /// quote-sourced series. Used for portfolio valuation, never for fills.
    pub fn get_mark_price(
        &mut self,
        asset: &Asset,
        now: DateTime<Utc>,
        quote: Option<&Asset>,
    ) -> Option<Decimal> {
        let key = self.resolve_key(asset, quote, None)?;
        self.touch_store(&key);
        let price = self.store.get(&key)?.mark_price(now)?;
        Decimal::from_f64(price)
    }

    /// Snapshot quote for `asset` as of `now` - the current bar as a record including bid/ask
    /// when present.
    pub fn get_quote(&mut self, asset: &Asset, now: DateTime<Utc>, quote: Option<&Asset>) -> Quote {
        match self.resolve_key(asset, quote, None) {
            Some(key) => {
                self.touch_store(&key);
                match self.store.get(&key) {
                    Some(series) => series.quote(now),
                    None => Quote::empty(asset.clone()),
                }
            }
            None => Quote::empty(asset.clone()),
        }
    }

    fn serve_window(series: &BarSeries, effective_now: DateTime<Utc>, length: usize) -> Option<BarSeries> {
        let end = series.index_at_or_before(effective_now)?;
        let window = series.window(end, length);
        if window.is_none() {
            debug!(
                asset = %series.asset,
                timestep = %series.timestep,
                available = end + 1,
                requested = length,
                "length exceeds available history"
            );
        }
        window
    }

    fn serve_aggregated(
        &mut self,
        asset: &Asset,
        quote: Option<&Asset>,
        target: Timestep,
        effective_now: DateTime<Utc>,
        length: usize,
    ) -> Option<BarSeries> {
        let source_key = self.direct_key(asset, quote, MINUTE)?;
        let agg_key = StoreKey {
            asset: source_key.asset.clone(),
            quote: source_key.quote.clone(),
            timestep: target,
        };

        if !self.aggregated.contains_key(&agg_key) {
            let source = self.store.get(&source_key)?;
            let aggregated = aggregate::aggregate_minute_series(source, target, self.market_tz)?;
            self.aggregated.insert(agg_key.clone(), aggregated);
        }
        self.touch_store(&source_key);
        self.touch_aggregated(&agg_key);

        let series = self.aggregated.get(&agg_key)?;
        match Self::serve_window(series, effective_now, length) {
            Some(window) => Some(window),
            None => {
                // Aggregated slice is insufficient - evict the stale cache entry so the next
                // request rebuilds from whatever minute history remains
                warn!(
                    %asset,
                    timestep = %target,
                    requested = length,
                    "aggregated cache insufficient, evicting entry"
                );
                self.aggregated.shift_remove(&agg_key);
                None
            }
        }
    }

    /// Exact-key lookup with the USD-forex quote fallback used for crypto tuple keys.
    fn direct_key(&self, asset: &Asset, quote: Option<&Asset>, timestep: Timestep) -> Option<StoreKey> {
        let mut candidates = Vec::with_capacity(2);
        candidates.push(StoreKey {
            asset: asset.clone(),
            quote: quote.cloned().unwrap_or_else(Asset::usd),
            timestep,
        });
        if quote.is_some() {
            candidates.push(StoreKey {
                asset: asset.clone(),
                quote: Asset::usd(),
                timestep,
            });
        }
        candidates.into_iter().find(|key| self.store.contains_key(key))
    }

    /// Locate the store key for an asset: the entry under the default timestep wins, then any
    /// timestep in insertion order.
    fn resolve_key(&self, asset: &Asset, quote: Option<&Asset>, timestep: Option<Timestep>) -> Option<StoreKey> {
        if let Some(timestep) = timestep {
            return self.direct_key(asset, quote, timestep);
        }
        if let Some(key) = self.direct_key(asset, quote, self.default_timestep) {
            return Some(key);
        }
        self.store
            .keys()
            .find(|key| {
                key.asset == *asset && quote.map(|quote| key.quote == *quote).unwrap_or(true)
            })
            .cloned()
    }

    fn touch_store(&mut self, key: &StoreKey) {
        if let Some(series) = self.store.shift_remove(key) {
            self.store.insert(key.clone(), series);
        }
    }

    fn touch_aggregated(&mut self, key: &StoreKey) {
        if let Some(series) = self.aggregated.shift_remove(key) {
            self.aggregated.insert(key.clone(), series);
        }
    }

    /// Periodic maintenance: every [`TRIM_FREQUENCY_BARS`] accesses, trim each entry to its
    /// own sliding window and enforce the byte cap.
    fn on_access(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        if self.access_count < TRIM_FREQUENCY_BARS {
            return;
        }
        self.access_count = 0;
        self.trim_sliding_windows(now);
        self.enforce_memory_limits();
    }

    /// Trim every entry to `[now - HISTORY_WINDOW_BARS * timestep, ∞)`.
    ///
    /// Each entry trims with its own timestep: a backtest mixing 1m/5m/1h/1d for one symbol
    /// trims each independently. Aggregated caches derived from a trimmed minute source are
    /// dropped alongside it.
    fn trim_sliding_windows(&mut self, now: DateTime<Utc>) {
        let mut trimmed_minute_sources = Vec::new();
        let mut trimmed_entries = 0usize;

        for (key, series) in self.store.iter_mut() {
            let window = series.timestep.duration() * HISTORY_WINDOW_BARS;
            let cutoff = now - window;
            let removed = series.trim_before(cutoff);
            if removed > 0 {
                trimmed_entries += 1;
                if series.timestep == MINUTE {
                    trimmed_minute_sources.push((key.asset.clone(), key.quote.clone()));
                }
            }
        }

        for (asset, quote) in trimmed_minute_sources {
            self.aggregated
                .retain(|key, _| !(key.asset == asset && key.quote == quote));
        }

        for series in self.aggregated.values_mut() {
            let window = series.timestep.duration() * HISTORY_WINDOW_BARS;
            series.trim_before(now - window);
        }

        if trimmed_entries > 0 {
            debug!(trimmed_entries, "sliding window trimmed store entries");
        }
    }

    /// Two-tier LRU eviction until under the byte cap: aggregated cache entries first, then
    /// source series.
    fn enforce_memory_limits(&mut self) {
        let mut used = self.total_bytes();
        if used <= self.max_storage_bytes {
            return;
        }

        warn!(
            used_bytes = used,
            cap_bytes = self.max_storage_bytes,
            "bar store exceeds memory cap, evicting LRU entries"
        );

        let mut evicted_aggregated = 0usize;
        while used > self.max_storage_bytes && !self.aggregated.is_empty() {
            if let Some((_, series)) = self.aggregated.shift_remove_index(0) {
                used -= series.approx_bytes().min(used);
                evicted_aggregated += 1;
            }
        }

        let mut evicted_source = 0usize;
        while used > self.max_storage_bytes && !self.store.is_empty() {
            if let Some((key, series)) = self.store.shift_remove_index(0) {
                used -= series.approx_bytes().min(used);
                evicted_source += 1;
                debug!(asset = %key.asset, timestep = %key.timestep, "evicted source series");
            }
        }

        warn!(
            evicted_aggregated,
            evicted_source,
            remaining_bytes = used,
            "memory cap eviction complete"
        );
    }
}
